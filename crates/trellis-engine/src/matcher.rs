//! Trigger matching.
//!
//! Given an incoming event and a workspace, selects the active definitions
//! whose trigger type matches and whose trigger-level filter config accepts
//! the payload. Pure filtering; an empty result is the normal "no automation
//! configured" case, not an error.

use serde_json::Value;
use trellis_workflow::{Trigger, TriggerEvent, WorkflowDefinition, WorkflowStatus};

/// Filter definitions down to those the event should start.
pub fn matching_workflows<'a>(
  event: &TriggerEvent,
  workspace_id: &str,
  definitions: &'a [WorkflowDefinition],
) -> Vec<&'a WorkflowDefinition> {
  definitions
    .iter()
    .filter(|def| def.status == WorkflowStatus::Active)
    .filter(|def| def.workspace_id == workspace_id)
    .filter(|def| def.trigger.trigger_type == event.event_type)
    .filter(|def| trigger_accepts(&def.trigger, &event.payload))
    .collect()
}

/// Key/value subset match of the trigger config against the payload.
///
/// Every config entry must be present in the payload with an equal value; a
/// definition whose config keys are absent or different is excluded.
pub fn trigger_accepts(trigger: &Trigger, payload: &Value) -> bool {
  trigger
    .config
    .iter()
    .all(|(key, expected)| payload.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use trellis_workflow::{SendNotificationConfig, Step, StepAction, TriggerType};

  fn active_definition(trigger: Trigger) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("ws-1", "wf", trigger);
    def.steps = vec![Step::new(
      "notify",
      "Notify",
      StepAction::SendNotification(SendNotificationConfig {
        recipients: vec!["ops".to_string()],
        message: "hi".to_string(),
        channel: None,
      }),
    )];
    def.activate().unwrap();
    def
  }

  #[test]
  fn test_matches_active_same_type_same_workspace() {
    let defs = vec![active_definition(Trigger::new(TriggerType::DealWon))];
    let event = TriggerEvent::new(TriggerType::DealWon, json!({}));

    assert_eq!(matching_workflows(&event, "ws-1", &defs).len(), 1);
    assert!(matching_workflows(&event, "ws-other", &defs).is_empty());

    let other = TriggerEvent::new(TriggerType::ContactCreated, json!({}));
    assert!(matching_workflows(&other, "ws-1", &defs).is_empty());
  }

  #[test]
  fn test_inactive_definitions_never_match() {
    let mut def = active_definition(Trigger::new(TriggerType::DealWon));
    def.pause().unwrap();
    let defs = vec![def];
    let event = TriggerEvent::new(TriggerType::DealWon, json!({}));
    assert!(matching_workflows(&event, "ws-1", &defs).is_empty());
  }

  #[test]
  fn test_trigger_config_subset_match() {
    let mut trigger = Trigger::new(TriggerType::LeadQualified);
    trigger.config.insert("min_interest".to_string(), json!("high"));

    assert!(trigger_accepts(&trigger, &json!({"min_interest": "high", "extra": 1})));
    assert!(!trigger_accepts(&trigger, &json!({"min_interest": "low"})));
    assert!(!trigger_accepts(&trigger, &json!({})));
  }

  #[test]
  fn test_no_match_is_empty_not_error() {
    let event = TriggerEvent::new(TriggerType::Manual, json!({}));
    let matched = matching_workflows(&event, "ws-1", &[]);
    assert!(matched.is_empty());
  }
}
