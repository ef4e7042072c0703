use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::StepAction;
use crate::condition::Condition;
use crate::error::DefinitionError;
use crate::step::Step;
use crate::trigger::Trigger;

/// Lifecycle status of a workflow definition.
///
/// Only `active` definitions are eligible for triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Draft,
  Active,
  Paused,
  Archived,
}

impl WorkflowStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkflowStatus::Draft => "draft",
      WorkflowStatus::Active => "active",
      WorkflowStatus::Paused => "paused",
      WorkflowStatus::Archived => "archived",
    }
  }
}

impl std::fmt::Display for WorkflowStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for WorkflowStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "draft" => Ok(WorkflowStatus::Draft),
      "active" => Ok(WorkflowStatus::Active),
      "paused" => Ok(WorkflowStatus::Paused),
      "archived" => Ok(WorkflowStatus::Archived),
      other => Err(format!("unknown workflow status: {other}")),
    }
  }
}

/// Execution-level policy for a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
  /// Whole-execution budget. When exceeded the execution is forced to
  /// `failed` regardless of current step state.
  #[serde(default)]
  pub timeout_ms: Option<u64>,
  /// Cap on per-step retries; a step's own `on_error.retries` is clamped to
  /// this when set.
  #[serde(default)]
  pub max_retries: Option<u32>,
  /// Downgrades a fatal step failure to skip behavior for execution-status
  /// purposes.
  #[serde(default)]
  pub continue_on_error: bool,
  #[serde(default)]
  pub notify_on_success: bool,
  #[serde(default)]
  pub notify_on_failure: bool,
  #[serde(default)]
  pub notification_recipients: Vec<String>,
}

/// Roll-up statistics, recomputed by the store after every execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
  #[serde(default)]
  pub total_executions: u64,
  #[serde(default)]
  pub successful_executions: u64,
  #[serde(default)]
  pub failed_executions: u64,
  /// Running mean over all executions.
  #[serde(default)]
  pub average_duration_ms: f64,
  #[serde(default)]
  pub last_executed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_success_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_failure_at: Option<DateTime<Utc>>,
}

impl WorkflowStats {
  pub fn success_rate(&self) -> f64 {
    if self.total_executions == 0 {
      return 0.0;
    }
    self.successful_executions as f64 / self.total_executions as f64
  }
}

/// A workflow definition: the blueprint an operator edits.
///
/// `version` increases by exactly 1 whenever `steps` or `conditions` change
/// (via [`set_steps`](Self::set_steps) / [`set_conditions`](Self::set_conditions));
/// the store checks the pre-edit version on save so concurrent edits conflict
/// instead of silently overwriting each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
  /// Generated when absent, so hand-written definition files can omit it.
  #[serde(default = "generate_workflow_id")]
  pub workflow_id: String,
  #[serde(default = "default_workspace")]
  pub workspace_id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default = "default_version")]
  pub version: u32,
  pub trigger: Trigger,
  #[serde(default)]
  pub steps: Vec<Step>,
  /// Workflow-level gate, evaluated against the seeded context before the
  /// first step runs.
  #[serde(default)]
  pub conditions: Vec<Condition>,
  #[serde(default = "default_status")]
  pub status: WorkflowStatus,
  #[serde(default)]
  pub stats: WorkflowStats,
  #[serde(default)]
  pub config: WorkflowConfig,
  #[serde(default = "Utc::now")]
  pub created_at: DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
  1
}

fn generate_workflow_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

fn default_workspace() -> String {
  "default".to_string()
}

fn default_status() -> WorkflowStatus {
  WorkflowStatus::Draft
}

/// Maximum allowed per-step retries.
pub const MAX_STEP_RETRIES: u32 = 5;

impl WorkflowDefinition {
  /// Create a new draft definition with a generated id.
  pub fn new(workspace_id: impl Into<String>, name: impl Into<String>, trigger: Trigger) -> Self {
    let now = Utc::now();
    Self {
      workflow_id: uuid::Uuid::new_v4().to_string(),
      workspace_id: workspace_id.into(),
      name: name.into(),
      description: String::new(),
      version: 1,
      trigger,
      steps: Vec::new(),
      conditions: Vec::new(),
      status: WorkflowStatus::Draft,
      stats: WorkflowStats::default(),
      config: WorkflowConfig::default(),
      created_at: now,
      updated_at: now,
    }
  }

  /// Look up a step by id.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.id == step_id)
  }

  /// Position of a step within the chain.
  pub fn step_index(&self, step_id: &str) -> Option<usize> {
    self.steps.iter().position(|s| s.id == step_id)
  }

  /// Structural validation, applied at save time.
  ///
  /// Branch targets must point forward in the chain so every execution
  /// attempts each step at most once.
  pub fn validate(&self) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for (index, step) in self.steps.iter().enumerate() {
      if !seen.insert(step.id.as_str()) {
        return Err(DefinitionError::DuplicateStepId(step.id.clone()));
      }
      if step.on_error.retries > MAX_STEP_RETRIES {
        return Err(DefinitionError::RetriesOutOfRange {
          step_id: step.id.clone(),
          retries: step.on_error.retries,
          max: MAX_STEP_RETRIES,
        });
      }
      match &step.action {
        StepAction::Wait(config) if config.duration_ms == 0 => {
          return Err(DefinitionError::ZeroWaitDuration {
            step_id: step.id.clone(),
          });
        }
        StepAction::Condition(config) => {
          for target in [&config.then_step, &config.else_step].into_iter().flatten() {
            match self.steps.iter().position(|s| &s.id == target) {
              None => {
                return Err(DefinitionError::UnknownBranchTarget {
                  step_id: step.id.clone(),
                  target: target.clone(),
                });
              }
              Some(target_index) if target_index <= index => {
                return Err(DefinitionError::BackwardBranchTarget {
                  step_id: step.id.clone(),
                  target: target.clone(),
                });
              }
              Some(_) => {}
            }
          }
        }
        _ => {}
      }
    }
    Ok(())
  }

  /// Replace the step chain, bumping the version.
  pub fn set_steps(&mut self, steps: Vec<Step>) -> Result<(), DefinitionError> {
    self.steps = steps;
    self.validate()?;
    self.version += 1;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Replace the workflow-level conditions, bumping the version.
  pub fn set_conditions(&mut self, conditions: Vec<Condition>) {
    self.conditions = conditions;
    self.version += 1;
    self.updated_at = Utc::now();
  }

  /// Activate the definition. Requires a valid chain with at least one
  /// enabled step.
  pub fn activate(&mut self) -> Result<(), DefinitionError> {
    match self.status {
      WorkflowStatus::Draft | WorkflowStatus::Paused => {}
      from => {
        return Err(DefinitionError::InvalidStatusTransition {
          from: from.to_string(),
          to: WorkflowStatus::Active.to_string(),
        });
      }
    }
    self.validate()?;
    if !self.steps.iter().any(|s| s.enabled) {
      return Err(DefinitionError::NoEnabledSteps);
    }
    self.status = WorkflowStatus::Active;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Pause an active definition.
  pub fn pause(&mut self) -> Result<(), DefinitionError> {
    if self.status != WorkflowStatus::Active {
      return Err(DefinitionError::InvalidStatusTransition {
        from: self.status.to_string(),
        to: WorkflowStatus::Paused.to_string(),
      });
    }
    self.status = WorkflowStatus::Paused;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Resume a paused definition.
  pub fn resume(&mut self) -> Result<(), DefinitionError> {
    if self.status != WorkflowStatus::Paused {
      return Err(DefinitionError::InvalidStatusTransition {
        from: self.status.to_string(),
        to: WorkflowStatus::Active.to_string(),
      });
    }
    self.activate()
  }

  /// Archive the definition. Archived definitions never trigger and cannot
  /// be re-activated.
  pub fn archive(&mut self) -> Result<(), DefinitionError> {
    if self.status == WorkflowStatus::Archived {
      return Err(DefinitionError::InvalidStatusTransition {
        from: self.status.to_string(),
        to: WorkflowStatus::Archived.to_string(),
      });
    }
    self.status = WorkflowStatus::Archived;
    self.updated_at = Utc::now();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::{ConditionConfig, SendNotificationConfig, StepAction, WaitConfig};
  use crate::trigger::TriggerType;

  fn notify_step(id: &str) -> Step {
    Step::new(
      id,
      "Notify",
      StepAction::SendNotification(SendNotificationConfig {
        recipients: vec!["ops".to_string()],
        message: "hello".to_string(),
        channel: None,
      }),
    )
  }

  fn definition_with_steps(steps: Vec<Step>) -> WorkflowDefinition {
    let mut def =
      WorkflowDefinition::new("ws-1", "Test workflow", Trigger::new(TriggerType::DealWon));
    def.steps = steps;
    def
  }

  #[test]
  fn test_duplicate_step_ids_rejected() {
    let def = definition_with_steps(vec![notify_step("a"), notify_step("a")]);
    assert!(matches!(
      def.validate(),
      Err(DefinitionError::DuplicateStepId(id)) if id == "a"
    ));
  }

  #[test]
  fn test_retries_above_cap_rejected() {
    let mut step = notify_step("a");
    step.on_error.retries = 6;
    let def = definition_with_steps(vec![step]);
    assert!(matches!(
      def.validate(),
      Err(DefinitionError::RetriesOutOfRange { retries: 6, .. })
    ));
  }

  #[test]
  fn test_branch_target_must_exist() {
    let branch = Step::new(
      "gate",
      "Gate",
      StepAction::Condition(ConditionConfig {
        conditions: vec![],
        then_step: Some("missing".to_string()),
        else_step: None,
      }),
    );
    let def = definition_with_steps(vec![branch, notify_step("a")]);
    assert!(matches!(
      def.validate(),
      Err(DefinitionError::UnknownBranchTarget { target, .. }) if target == "missing"
    ));
  }

  #[test]
  fn test_backward_branch_target_rejected() {
    let branch = Step::new(
      "gate",
      "Gate",
      StepAction::Condition(ConditionConfig {
        conditions: vec![],
        then_step: Some("gate".to_string()),
        else_step: None,
      }),
    );
    let def = definition_with_steps(vec![notify_step("a"), branch]);
    assert!(matches!(
      def.validate(),
      Err(DefinitionError::BackwardBranchTarget { target, .. }) if target == "gate"
    ));
  }

  #[test]
  fn test_zero_wait_duration_rejected() {
    let wait = Step::new("pause", "Pause", StepAction::Wait(WaitConfig { duration_ms: 0 }));
    let def = definition_with_steps(vec![wait]);
    assert!(matches!(
      def.validate(),
      Err(DefinitionError::ZeroWaitDuration { .. })
    ));
  }

  #[test]
  fn test_activation_requires_enabled_step() {
    let mut disabled = notify_step("a");
    disabled.enabled = false;
    let mut def = definition_with_steps(vec![disabled]);
    assert!(matches!(def.activate(), Err(DefinitionError::NoEnabledSteps)));

    let mut def = definition_with_steps(vec![notify_step("a")]);
    def.activate().unwrap();
    assert_eq!(def.status, WorkflowStatus::Active);
  }

  #[test]
  fn test_set_steps_bumps_version_once() {
    let mut def = definition_with_steps(vec![]);
    assert_eq!(def.version, 1);
    def.set_steps(vec![notify_step("a")]).unwrap();
    assert_eq!(def.version, 2);
    def.set_conditions(vec![]);
    assert_eq!(def.version, 3);
  }

  #[test]
  fn test_status_transitions() {
    let mut def = definition_with_steps(vec![notify_step("a")]);
    assert!(def.pause().is_err());
    def.activate().unwrap();
    def.pause().unwrap();
    def.resume().unwrap();
    def.archive().unwrap();
    assert!(def.activate().is_err());
    assert!(def.archive().is_err());
  }
}
