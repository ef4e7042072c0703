use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_workflow::{Step, TriggerEvent, TriggerType, WorkflowDefinition};

/// Status of a workflow execution.
///
/// `Running` is the only non-terminal state; an execution transitions to
/// exactly one terminal state, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ExecutionStatus::Running)
  }
}

/// Status of a single step attempt within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
}

/// Snapshot of the triggering event, decoupled from the definition so later
/// edits don't retroactively alter history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
  pub event_type: TriggerType,
  pub payload: serde_json::Value,
  pub triggered_at: DateTime<Utc>,
}

impl From<&TriggerEvent> for TriggerSnapshot {
  fn from(event: &TriggerEvent) -> Self {
    Self {
      event_type: event.event_type,
      payload: event.payload.clone(),
      triggered_at: event.triggered_at,
    }
  }
}

/// Per-step record, appended as the execution proceeds and never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
  pub step_id: String,
  pub name: String,
  pub status: StepStatus,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
  /// The step's action config as written, before placeholder resolution.
  pub input: serde_json::Value,
  pub output: Option<serde_json::Value>,
  pub error: Option<String>,
  /// Retries performed beyond the initial attempt.
  pub retries: u32,
}

impl StepRecord {
  pub fn started(step: &Step) -> Self {
    Self {
      step_id: step.id.clone(),
      name: step.name.clone(),
      status: StepStatus::Running,
      started_at: Utc::now(),
      completed_at: None,
      duration_ms: None,
      input: serde_json::to_value(&step.action).unwrap_or(serde_json::Value::Null),
      output: None,
      error: None,
      retries: 0,
    }
  }

  /// Close out the record with a final status.
  pub fn finish(
    &mut self,
    status: StepStatus,
    output: Option<serde_json::Value>,
    error: Option<String>,
  ) {
    let now = Utc::now();
    self.status = status;
    self.completed_at = Some(now);
    self.duration_ms = Some((now - self.started_at).num_milliseconds());
    self.output = output;
    self.error = error;
  }
}

/// Denormalized side-effect counters, incremented as steps complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResults {
  /// Entities created, keyed by entity type.
  #[serde(default)]
  pub entities_created: BTreeMap<String, u64>,
  #[serde(default)]
  pub emails_sent: u64,
  #[serde(default)]
  pub notifications_sent: u64,
  #[serde(default)]
  pub webhooks_called: u64,
  #[serde(default)]
  pub entities_updated: u64,
}

/// Durable cross-reference to an entity a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEntityRef {
  pub entity_type: String,
  pub id: String,
  pub step_id: String,
}

/// Step counters maintained incrementally by the runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
  pub total_steps: u32,
  pub completed_steps: u32,
  pub failed_steps: u32,
  pub skipped_steps: u32,
}

/// One run instance of a workflow, immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
  pub execution_id: String,
  pub workflow_id: String,
  pub workspace_id: String,
  /// Definition version in effect at trigger time.
  pub workflow_version: u32,
  pub status: ExecutionStatus,
  pub trigger: TriggerSnapshot,
  pub steps: Vec<StepRecord>,
  pub results: ExecutionResults,
  pub created_entities: Vec<CreatedEntityRef>,
  pub metrics: ExecutionMetrics,
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
}

impl WorkflowExecution {
  /// Start a new record in `running` state for a matched definition.
  pub fn begin(execution_id: String, definition: &WorkflowDefinition, event: &TriggerEvent) -> Self {
    Self {
      execution_id,
      workflow_id: definition.workflow_id.clone(),
      workspace_id: definition.workspace_id.clone(),
      workflow_version: definition.version,
      status: ExecutionStatus::Running,
      trigger: TriggerSnapshot::from(event),
      steps: Vec::new(),
      results: ExecutionResults::default(),
      created_entities: Vec::new(),
      metrics: ExecutionMetrics::default(),
      error: None,
      started_at: Utc::now(),
      completed_at: None,
      duration_ms: None,
    }
  }
}
