use serde::{Deserialize, Serialize};

/// Comparison operator for a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
  Equals,
  NotEquals,
  GreaterThan,
  LessThan,
  Contains,
  NotContains,
  Exists,
  NotExists,
}

/// How a condition combines with the one that follows it.
///
/// Conditions are folded left-to-right: each condition's operator describes
/// the combination with the *next* condition in the list. This is deliberate
/// legacy behavior (no AND-over-OR precedence) and existing automations
/// depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicalOperator {
  #[default]
  #[serde(rename = "AND")]
  And,
  #[serde(rename = "OR")]
  Or,
}

/// A single condition evaluated against the execution context.
///
/// `field` is a dotted path into the context (`trigger.foo`,
/// `step.<id>.<key>`). An unresolved path behaves as an absent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: String,
  pub operator: ConditionOperator,
  #[serde(default)]
  pub value: serde_json::Value,
  #[serde(default)]
  pub logical_operator: LogicalOperator,
}

impl Condition {
  pub fn new(field: impl Into<String>, operator: ConditionOperator, value: serde_json::Value) -> Self {
    Self {
      field: field.into(),
      operator,
      value,
      logical_operator: LogicalOperator::default(),
    }
  }

  pub fn or(mut self) -> Self {
    self.logical_operator = LogicalOperator::Or;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_condition_deserializes_with_defaults() {
    let condition: Condition = serde_json::from_value(json!({
      "field": "trigger.status",
      "operator": "equals",
      "value": "won"
    }))
    .unwrap();

    assert_eq!(condition.operator, ConditionOperator::Equals);
    assert_eq!(condition.logical_operator, LogicalOperator::And);
  }

  #[test]
  fn test_operator_names_are_camel_case() {
    let condition: Condition = serde_json::from_value(json!({
      "field": "trigger.score",
      "operator": "greaterThan",
      "value": 50,
      "logical_operator": "OR"
    }))
    .unwrap();

    assert_eq!(condition.operator, ConditionOperator::GreaterThan);
    assert_eq!(condition.logical_operator, LogicalOperator::Or);
  }

  #[test]
  fn test_unknown_operator_is_rejected() {
    let result: Result<Condition, _> = serde_json::from_value(json!({
      "field": "trigger.score",
      "operator": "regexMatch",
      "value": ".*"
    }));
    assert!(result.is_err());
  }
}
