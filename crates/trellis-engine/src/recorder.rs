//! Execution recording.
//!
//! Persists step-by-step progress incrementally, not only at the end, so an
//! in-progress or crashed execution is always inspectable. On finalization
//! the owning definition's roll-up stats are pushed through the store's
//! atomic counter update.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;
use trellis_store::{
  ExecutionStatus, StepRecord, StepStatus, Store, StoreError, WorkflowExecution,
};
use trellis_workflow::{Step, TriggerEvent, WorkflowDefinition};

/// Persists execution state through the store.
#[derive(Clone)]
pub struct ExecutionRecorder {
  store: Arc<dyn Store>,
}

impl ExecutionRecorder {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Create the execution record in `running` state.
  pub async fn begin(
    &self,
    execution_id: String,
    definition: &WorkflowDefinition,
    event: &TriggerEvent,
  ) -> Result<WorkflowExecution, StoreError> {
    let execution = WorkflowExecution::begin(execution_id, definition, event);
    self.store.create_execution(&execution).await?;
    Ok(execution)
  }

  /// Append a step record in `running` state; returns its position.
  pub async fn step_started(
    &self,
    execution: &mut WorkflowExecution,
    step: &Step,
  ) -> Result<usize, StoreError> {
    let record = StepRecord::started(step);
    execution.steps.push(record);
    execution.metrics.total_steps += 1;
    let seq = execution.steps.len() - 1;
    self
      .store
      .upsert_step(&execution.execution_id, seq as u32, &execution.steps[seq])
      .await?;
    Ok(seq)
  }

  /// Close out a step record and persist both the step row and the
  /// execution's counters.
  pub async fn step_finished(
    &self,
    execution: &mut WorkflowExecution,
    seq: usize,
    status: StepStatus,
    output: Option<serde_json::Value>,
    error: Option<String>,
    retries: u32,
  ) -> Result<(), StoreError> {
    {
      let record = &mut execution.steps[seq];
      record.retries = retries;
      record.finish(status, output, error);
    }
    match status {
      StepStatus::Completed => execution.metrics.completed_steps += 1,
      StepStatus::Failed => execution.metrics.failed_steps += 1,
      StepStatus::Skipped => execution.metrics.skipped_steps += 1,
      StepStatus::Pending | StepStatus::Running => {}
    }
    self
      .store
      .upsert_step(&execution.execution_id, seq as u32, &execution.steps[seq])
      .await?;
    self.store.update_execution(execution).await
  }

  /// Persist an updated retry count on a still-running step row.
  pub async fn step_retrying(
    &self,
    execution: &mut WorkflowExecution,
    seq: usize,
    retries: u32,
  ) -> Result<(), StoreError> {
    execution.steps[seq].retries = retries;
    self
      .store
      .upsert_step(&execution.execution_id, seq as u32, &execution.steps[seq])
      .await
  }

  /// Append an already-skipped step record (disabled steps never start).
  pub async fn step_skipped(
    &self,
    execution: &mut WorkflowExecution,
    step: &Step,
  ) -> Result<(), StoreError> {
    let mut record = StepRecord::started(step);
    record.finish(StepStatus::Skipped, None, None);
    execution.steps.push(record);
    execution.metrics.total_steps += 1;
    execution.metrics.skipped_steps += 1;
    let seq = execution.steps.len() - 1;
    self
      .store
      .upsert_step(&execution.execution_id, seq as u32, &execution.steps[seq])
      .await?;
    self.store.update_execution(execution).await
  }

  /// Transition the execution to a terminal status, exactly once, and push
  /// aggregate counters onto the owning definition.
  ///
  /// A step still `running` at this point was aborted by the supervising
  /// timeout; it is closed out as `failed` so step counters stay consistent
  /// with the appended records.
  #[instrument(name = "execution_finalize", skip(self, execution), fields(execution_id = %execution.execution_id, status = ?status))]
  pub async fn finalize(
    &self,
    execution: &mut WorkflowExecution,
    status: ExecutionStatus,
    error: Option<String>,
  ) -> Result<(), StoreError> {
    debug_assert!(status.is_terminal());
    let now = Utc::now();
    execution.status = status;
    execution.error = error;
    execution.completed_at = Some(now);
    execution.duration_ms = Some((now - execution.started_at).num_milliseconds());

    for seq in 0..execution.steps.len() {
      if execution.steps[seq].status == StepStatus::Running {
        let reason = execution
          .error
          .clone()
          .unwrap_or_else(|| "execution aborted".to_string());
        execution.steps[seq].finish(StepStatus::Failed, None, Some(reason));
        execution.metrics.failed_steps += 1;
        self
          .store
          .upsert_step(&execution.execution_id, seq as u32, &execution.steps[seq])
          .await?;
      }
    }

    self.store.update_execution(execution).await?;

    let success = status == ExecutionStatus::Completed;
    self
      .store
      .increment_stats(
        &execution.workflow_id,
        success,
        execution.duration_ms.unwrap_or(0),
        now,
      )
      .await
  }
}
