use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// The action a step performs, tagged by step type.
///
/// Each variant carries the strongly-typed config for that action kind.
/// Unknown step types fail deserialization, so a definition with a bad type
/// is rejected when it is saved, never during an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "action", rename_all = "snake_case")]
pub enum StepAction {
  CreateContact(CreateEntityConfig),
  CreateLead(CreateEntityConfig),
  CreateDeal(CreateEntityConfig),
  CreateProject(CreateEntityConfig),
  ScoreLead(ScoreLeadConfig),
  EnrichContact(EnrichContactConfig),
  SendEmail(SendEmailConfig),
  SendNotification(SendNotificationConfig),
  UpdateField(UpdateFieldConfig),
  AddTag(AddTagConfig),
  AssignUser(AssignUserConfig),
  Webhook(WebhookConfig),
  Wait(WaitConfig),
  Condition(ConditionConfig),
}

impl StepAction {
  /// The step type tag, for logging and display.
  pub fn kind(&self) -> &'static str {
    match self {
      StepAction::CreateContact(_) => "create_contact",
      StepAction::CreateLead(_) => "create_lead",
      StepAction::CreateDeal(_) => "create_deal",
      StepAction::CreateProject(_) => "create_project",
      StepAction::ScoreLead(_) => "score_lead",
      StepAction::EnrichContact(_) => "enrich_contact",
      StepAction::SendEmail(_) => "send_email",
      StepAction::SendNotification(_) => "send_notification",
      StepAction::UpdateField(_) => "update_field",
      StepAction::AddTag(_) => "add_tag",
      StepAction::AssignUser(_) => "assign_user",
      StepAction::Webhook(_) => "webhook",
      StepAction::Wait(_) => "wait",
      StepAction::Condition(_) => "condition",
    }
  }
}

/// Config for the entity-creating actions (contact, lead, deal, project).
///
/// Field values may contain `{{step.<id>.<field>}}` / `{{trigger.<field>}}`
/// placeholders, resolved against the execution context before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityConfig {
  #[serde(default)]
  pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreLeadConfig {
  pub lead_id: String,
  #[serde(default)]
  pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichContactConfig {
  pub contact_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailConfig {
  pub to: String,
  pub subject: String,
  #[serde(default)]
  pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendNotificationConfig {
  pub recipients: Vec<String>,
  pub message: String,
  #[serde(default)]
  pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFieldConfig {
  pub entity_type: String,
  pub entity_id: String,
  pub field: String,
  pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddTagConfig {
  pub entity_type: String,
  pub entity_id: String,
  pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignUserConfig {
  pub entity_type: String,
  pub entity_id: String,
  pub user_id: String,
}

fn default_method() -> String {
  "POST".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub body: Option<serde_json::Value>,
}

/// Config for the `wait` step. Suspends the current execution only; no
/// external call is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
  pub duration_ms: u64,
}

/// Config for the `condition` step: evaluates its conditions against the
/// execution context and redirects to `then_step` or `else_step`.
///
/// An absent branch target means "fall through to the next step in order".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
  pub conditions: Vec<Condition>,
  #[serde(default)]
  pub then_step: Option<String>,
  #[serde(default)]
  pub else_step: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_action_deserializes_from_type_tag() {
    let action: StepAction = serde_json::from_value(json!({
      "type": "send_email",
      "action": {
        "to": "{{trigger.email}}",
        "subject": "Welcome"
      }
    }))
    .unwrap();

    assert_eq!(action.kind(), "send_email");
    match action {
      StepAction::SendEmail(config) => {
        assert_eq!(config.to, "{{trigger.email}}");
        assert_eq!(config.body, "");
      }
      other => panic!("unexpected action: {other:?}"),
    }
  }

  #[test]
  fn test_unknown_step_type_is_rejected() {
    let result: Result<StepAction, _> = serde_json::from_value(json!({
      "type": "launch_rocket",
      "action": {}
    }));
    assert!(result.is_err());
  }

  #[test]
  fn test_webhook_defaults_to_post() {
    let action: StepAction = serde_json::from_value(json!({
      "type": "webhook",
      "action": { "url": "https://example.com/hook" }
    }))
    .unwrap();

    match action {
      StepAction::Webhook(config) => assert_eq!(config.method, "POST"),
      other => panic!("unexpected action: {other:?}"),
    }
  }
}
