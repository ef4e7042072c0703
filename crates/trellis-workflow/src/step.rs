use serde::{Deserialize, Serialize};

use crate::action::StepAction;

/// What to do when a step's action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorAction {
  /// Re-attempt up to `retries` times; exhausting retries falls through to
  /// `fail`.
  Retry,
  /// Record the failure but advance to the next step.
  Skip,
  /// Record the failure and stop the execution.
  #[default]
  Fail,
  /// As `fail`, plus a notification to the workflow's configured recipients.
  Notify,
}

fn default_retry_delay_ms() -> u64 {
  1000
}

/// Per-step error policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnErrorPolicy {
  #[serde(default)]
  pub action: OnErrorAction,
  #[serde(default)]
  pub retries: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

impl Default for OnErrorPolicy {
  fn default() -> Self {
    Self {
      action: OnErrorAction::default(),
      retries: 0,
      retry_delay_ms: default_retry_delay_ms(),
    }
  }
}

fn default_enabled() -> bool {
  true
}

/// One action in a workflow's ordered chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  /// Unique within the owning workflow.
  pub id: String,
  pub name: String,
  #[serde(flatten)]
  pub action: StepAction,
  #[serde(default)]
  pub on_error: OnErrorPolicy,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

impl Step {
  pub fn new(id: impl Into<String>, name: impl Into<String>, action: StepAction) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      action,
      on_error: OnErrorPolicy::default(),
      enabled: true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_step_deserializes_with_flattened_action() {
    let step: Step = serde_json::from_value(json!({
      "id": "notify",
      "name": "Notify sales",
      "type": "send_notification",
      "action": {
        "recipients": ["sales"],
        "message": "Deal won"
      }
    }))
    .unwrap();

    assert_eq!(step.id, "notify");
    assert!(step.enabled);
    assert_eq!(step.on_error.action, OnErrorAction::Fail);
    assert_eq!(step.on_error.retries, 0);
    assert_eq!(step.action.kind(), "send_notification");
  }

  #[test]
  fn test_on_error_policy_overrides() {
    let step: Step = serde_json::from_value(json!({
      "id": "hook",
      "name": "Call webhook",
      "type": "webhook",
      "action": { "url": "https://example.com" },
      "on_error": { "action": "retry", "retries": 3, "retry_delay_ms": 250 },
      "enabled": false
    }))
    .unwrap();

    assert!(!step.enabled);
    assert_eq!(step.on_error.action, OnErrorAction::Retry);
    assert_eq!(step.on_error.retries, 3);
    assert_eq!(step.on_error.retry_delay_ms, 250);
  }
}
