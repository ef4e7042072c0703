//! Condition evaluation.
//!
//! Pure functions over the execution context; safe to call repeatedly for
//! dry runs. Comparison failures (non-numeric operands for ordering
//! operators) evaluate to `false`, never panic.

use serde_json::Value;
use trellis_workflow::{Condition, ConditionOperator, LogicalOperator};

use crate::context::ExecutionContext;

/// Evaluate a condition list against the context.
///
/// Conditions fold left-to-right: each condition's `logical_operator`
/// combines the accumulated result with the *next* condition. This is a flat
/// left-fold, not boolean-algebra precedence; existing automations rely on
/// the literal behavior. An empty list is true.
pub fn evaluate(conditions: &[Condition], context: &ExecutionContext) -> bool {
  let mut iter = conditions.iter();
  let Some(first) = iter.next() else {
    return true;
  };

  let mut result = evaluate_one(first, context);
  let mut combine = first.logical_operator;
  for condition in iter {
    let value = evaluate_one(condition, context);
    result = match combine {
      LogicalOperator::And => result && value,
      LogicalOperator::Or => result || value,
    };
    combine = condition.logical_operator;
  }
  result
}

fn evaluate_one(condition: &Condition, context: &ExecutionContext) -> bool {
  let actual = context.lookup(&condition.field);
  let expected = &condition.value;

  match condition.operator {
    ConditionOperator::Equals => actual.unwrap_or(&Value::Null) == expected,
    ConditionOperator::NotEquals => actual.unwrap_or(&Value::Null) != expected,
    ConditionOperator::GreaterThan => match (actual.and_then(as_number), as_number(expected)) {
      (Some(a), Some(b)) => a > b,
      _ => false,
    },
    ConditionOperator::LessThan => match (actual.and_then(as_number), as_number(expected)) {
      (Some(a), Some(b)) => a < b,
      _ => false,
    },
    ConditionOperator::Contains => contains(actual, expected),
    ConditionOperator::NotContains => !contains(actual, expected),
    ConditionOperator::Exists => matches!(actual, Some(v) if !v.is_null()),
    ConditionOperator::NotExists => !matches!(actual, Some(v) if !v.is_null()),
  }
}

/// Numeric coercion: numbers directly, numeric strings parsed.
fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Substring for strings, membership for arrays.
fn contains(actual: Option<&Value>, expected: &Value) -> bool {
  match actual {
    Some(Value::String(haystack)) => match expected.as_str() {
      Some(needle) => haystack.contains(needle),
      None => false,
    },
    Some(Value::Array(items)) => items.contains(expected),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> ExecutionContext {
    let mut ctx = ExecutionContext::seeded(json!({
      "status": "won",
      "value": 1200,
      "value_text": "90",
      "owner": null,
      "tags": ["vip", "travel"]
    }));
    ctx.insert_step_output("score", json!({ "score": 75 }));
    ctx
  }

  fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
    Condition::new(field, operator, value)
  }

  #[test]
  fn test_equals_uses_deep_equality() {
    let ctx = context();
    assert!(evaluate(
      &[cond("trigger.status", ConditionOperator::Equals, json!("won"))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.tags", ConditionOperator::Equals, json!(["vip", "travel"]))],
      &ctx
    ));
    assert!(!evaluate(
      &[cond("trigger.status", ConditionOperator::NotEquals, json!("won"))],
      &ctx
    ));
  }

  #[test]
  fn test_missing_path_behaves_as_null() {
    let ctx = context();
    assert!(evaluate(
      &[cond("trigger.nothing", ConditionOperator::Equals, json!(null))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.nothing", ConditionOperator::NotExists, json!(null))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.owner", ConditionOperator::NotExists, json!(null))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.status", ConditionOperator::Exists, json!(null))],
      &ctx
    ));
  }

  #[test]
  fn test_numeric_comparison_with_coercion() {
    let ctx = context();
    assert!(evaluate(
      &[cond("trigger.value", ConditionOperator::GreaterThan, json!(1000))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.value_text", ConditionOperator::LessThan, json!(100))],
      &ctx
    ));
    // Non-numeric operand evaluates false rather than crashing.
    assert!(!evaluate(
      &[cond("trigger.status", ConditionOperator::GreaterThan, json!(10))],
      &ctx
    ));
    assert!(!evaluate(
      &[cond("trigger.value", ConditionOperator::LessThan, json!("abc"))],
      &ctx
    ));
  }

  #[test]
  fn test_contains_strings_and_arrays() {
    let ctx = context();
    assert!(evaluate(
      &[cond("trigger.status", ConditionOperator::Contains, json!("wo"))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.tags", ConditionOperator::Contains, json!("vip"))],
      &ctx
    ));
    assert!(evaluate(
      &[cond("trigger.tags", ConditionOperator::NotContains, json!("cold"))],
      &ctx
    ));
    assert!(!evaluate(
      &[cond("trigger.value", ConditionOperator::Contains, json!(2))],
      &ctx
    ));
  }

  #[test]
  fn test_left_fold_combination() {
    let ctx = context();
    // false AND true OR true: folded as ((false && true) || true) = true.
    let conditions = vec![
      cond("trigger.status", ConditionOperator::Equals, json!("lost")),
      cond("step.score.score", ConditionOperator::GreaterThan, json!(50)).or(),
      cond("trigger.tags", ConditionOperator::Contains, json!("vip")),
    ];
    // First condition's AND applies between conditions 1 and 2; the OR on
    // condition 2 applies between 2 and 3.
    assert!(evaluate(&conditions, &ctx));

    // true OR false AND false: folded as ((true || false) && false) = false,
    // unlike standard precedence which would yield true.
    let conditions = vec![
      cond("trigger.status", ConditionOperator::Equals, json!("won")).or(),
      cond("trigger.status", ConditionOperator::Equals, json!("lost")),
      cond("trigger.tags", ConditionOperator::Contains, json!("cold")),
    ];
    assert!(!evaluate(&conditions, &ctx));
  }

  #[test]
  fn test_empty_conditions_are_true() {
    assert!(evaluate(&[], &context()));
  }

  #[test]
  fn test_evaluation_is_pure() {
    let ctx = context();
    let conditions = vec![cond("trigger.value", ConditionOperator::GreaterThan, json!(1000))];
    let first = evaluate(&conditions, &ctx);
    for _ in 0..10 {
      assert_eq!(evaluate(&conditions, &ctx), first);
    }
  }
}
