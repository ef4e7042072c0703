use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of events that can activate a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
  EmailResponse,
  AiInteraction,
  BookingConfirmed,
  DealWon,
  LeadQualified,
  ContactCreated,
  Webhook,
  Schedule,
  Manual,
}

impl TriggerType {
  /// Stable string form, used for database filtering and display.
  pub fn as_str(&self) -> &'static str {
    match self {
      TriggerType::EmailResponse => "email_response",
      TriggerType::AiInteraction => "ai_interaction",
      TriggerType::BookingConfirmed => "booking_confirmed",
      TriggerType::DealWon => "deal_won",
      TriggerType::LeadQualified => "lead_qualified",
      TriggerType::ContactCreated => "contact_created",
      TriggerType::Webhook => "webhook",
      TriggerType::Schedule => "schedule",
      TriggerType::Manual => "manual",
    }
  }
}

impl std::fmt::Display for TriggerType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for TriggerType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "email_response" => Ok(TriggerType::EmailResponse),
      "ai_interaction" => Ok(TriggerType::AiInteraction),
      "booking_confirmed" => Ok(TriggerType::BookingConfirmed),
      "deal_won" => Ok(TriggerType::DealWon),
      "lead_qualified" => Ok(TriggerType::LeadQualified),
      "contact_created" => Ok(TriggerType::ContactCreated),
      "webhook" => Ok(TriggerType::Webhook),
      "schedule" => Ok(TriggerType::Schedule),
      "manual" => Ok(TriggerType::Manual),
      other => Err(format!("unknown trigger type: {other}")),
    }
  }
}

/// Trigger section of a workflow definition.
///
/// `config` is an optional key/value filter applied against the event payload
/// by the trigger matcher: a definition only fires when every config entry is
/// present in the payload with an equal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
  #[serde(rename = "type")]
  pub trigger_type: TriggerType,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

impl Trigger {
  pub fn new(trigger_type: TriggerType) -> Self {
    Self {
      trigger_type,
      config: serde_json::Map::new(),
    }
  }
}

/// An event submitted to the engine to start workflow executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
  pub event_type: TriggerType,
  pub payload: serde_json::Value,
  pub triggered_at: DateTime<Utc>,
}

impl TriggerEvent {
  pub fn new(event_type: TriggerType, payload: serde_json::Value) -> Self {
    Self {
      event_type,
      payload,
      triggered_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_trigger_type_round_trips_through_str() {
    for t in [
      TriggerType::EmailResponse,
      TriggerType::DealWon,
      TriggerType::Schedule,
      TriggerType::Manual,
    ] {
      assert_eq!(t.as_str().parse::<TriggerType>().unwrap(), t);
    }
  }

  #[test]
  fn test_trigger_deserializes_without_config() {
    let trigger: Trigger = serde_json::from_value(json!({"type": "deal_won"})).unwrap();
    assert_eq!(trigger.trigger_type, TriggerType::DealWon);
    assert!(trigger.config.is_empty());
  }
}
