//! Per-execution scratchpad and placeholder resolution.
//!
//! The context is seeded with the trigger payload under `trigger` and
//! extended with each completed step's output under `step.<id>`. Steps read
//! prior outputs through dotted-path lookup, and action configs may embed
//! `{{path}}` placeholders that are substituted before dispatch.
//!
//! Resolution is a plain lookup pass over the context map. There is no
//! template engine and no expression evaluation.

use serde_json::{Map, Value};

/// The per-execution key-value scratchpad. Private to one execution, never
/// shared.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  root: Map<String, Value>,
}

impl ExecutionContext {
  /// Seed a fresh context with the trigger payload.
  pub fn seeded(trigger_payload: Value) -> Self {
    let mut root = Map::new();
    root.insert("trigger".to_string(), trigger_payload);
    root.insert("step".to_string(), Value::Object(Map::new()));
    Self { root }
  }

  /// Record a completed step's output at `step.<id>`.
  pub fn insert_step_output(&mut self, step_id: &str, output: Value) {
    if let Some(Value::Object(steps)) = self.root.get_mut("step") {
      steps.insert(step_id.to_string(), output);
    }
  }

  /// Dotted-path lookup (`trigger.foo.bar`, `step.<id>.<field>`). Numeric
  /// segments index into arrays. Returns `None` for any unresolved segment.
  pub fn lookup(&self, path: &str) -> Option<&Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = self.root.get(first)?;

    for segment in segments {
      current = match current {
        Value::Object(map) => map.get(segment)?,
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
        _ => return None,
      };
    }
    Some(current)
  }

  /// Substitute `{{path}}` placeholders throughout a JSON value.
  ///
  /// A string that is exactly one placeholder is replaced by the looked-up
  /// value with its JSON type preserved; placeholders embedded in a larger
  /// string interpolate a display form. Unresolved placeholders become null
  /// (whole-string) or the empty string (embedded).
  pub fn resolve_placeholders(&self, value: &Value) -> Value {
    match value {
      Value::String(s) => self.resolve_string(s),
      Value::Array(items) => {
        Value::Array(items.iter().map(|v| self.resolve_placeholders(v)).collect())
      }
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), self.resolve_placeholders(v)))
          .collect(),
      ),
      other => other.clone(),
    }
  }

  fn resolve_string(&self, s: &str) -> Value {
    // Whole-string placeholder keeps the value's type.
    if let Some(path) = single_placeholder(s) {
      return self.lookup(path).cloned().unwrap_or(Value::Null);
    }
    if !s.contains("{{") {
      return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
      out.push_str(&rest[..start]);
      let after = &rest[start + 2..];
      match after.find("}}") {
        Some(end) => {
          let path = after[..end].trim();
          if let Some(found) = self.lookup(path) {
            out.push_str(&display_form(found));
          }
          rest = &after[end + 2..];
        }
        None => {
          // Unterminated placeholder, keep the text as written.
          out.push_str(&rest[start..]);
          rest = "";
        }
      }
    }
    out.push_str(rest);
    Value::String(out)
  }
}

/// If the whole string is a single `{{path}}`, return the inner path.
fn single_placeholder(s: &str) -> Option<&str> {
  let trimmed = s.trim();
  let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
  let path = inner.trim();
  if path.is_empty() || path.contains("{{") || path.contains("}}") {
    return None;
  }
  Some(path)
}

fn display_form(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> ExecutionContext {
    let mut ctx = ExecutionContext::seeded(json!({
      "email": "ada@example.com",
      "deal": { "value": 1200 },
      "tags": ["vip", "travel"]
    }));
    ctx.insert_step_output("create_lead", json!({ "id": "lead-7", "score": 82 }));
    ctx
  }

  #[test]
  fn test_lookup_dotted_paths() {
    let ctx = context();
    assert_eq!(ctx.lookup("trigger.email"), Some(&json!("ada@example.com")));
    assert_eq!(ctx.lookup("trigger.deal.value"), Some(&json!(1200)));
    assert_eq!(ctx.lookup("trigger.tags.1"), Some(&json!("travel")));
    assert_eq!(ctx.lookup("step.create_lead.id"), Some(&json!("lead-7")));
    assert_eq!(ctx.lookup("trigger.missing"), None);
    assert_eq!(ctx.lookup("step.other.id"), None);
  }

  #[test]
  fn test_whole_string_placeholder_preserves_type() {
    let ctx = context();
    let resolved = ctx.resolve_placeholders(&json!("{{step.create_lead.score}}"));
    assert_eq!(resolved, json!(82));
  }

  #[test]
  fn test_embedded_placeholder_interpolates() {
    let ctx = context();
    let resolved =
      ctx.resolve_placeholders(&json!("Lead {{step.create_lead.id}} scored {{step.create_lead.score}}"));
    assert_eq!(resolved, json!("Lead lead-7 scored 82"));
  }

  #[test]
  fn test_unresolved_placeholders() {
    let ctx = context();
    assert_eq!(ctx.resolve_placeholders(&json!("{{trigger.nope}}")), json!(null));
    assert_eq!(ctx.resolve_placeholders(&json!("x {{trigger.nope}} y")), json!("x  y"));
  }

  #[test]
  fn test_resolution_recurses_into_objects_and_arrays() {
    let ctx = context();
    let resolved = ctx.resolve_placeholders(&json!({
      "lead": "{{step.create_lead.id}}",
      "nested": { "email": "{{trigger.email}}" },
      "list": ["{{trigger.deal.value}}", "literal"]
    }));
    assert_eq!(
      resolved,
      json!({
        "lead": "lead-7",
        "nested": { "email": "ada@example.com" },
        "list": [1200, "literal"]
      })
    );
  }

  #[test]
  fn test_plain_strings_pass_through() {
    let ctx = context();
    assert_eq!(ctx.resolve_placeholders(&json!("no placeholders")), json!("no placeholders"));
    assert_eq!(ctx.resolve_placeholders(&json!("dangling {{ brace")), json!("dangling {{ brace"));
  }
}
