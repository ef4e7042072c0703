//! Trellis Store
//!
//! This crate provides the storage trait and implementations for workflow
//! definitions and execution records. Data is persisted to SQLite.
//!
//! The [`Store`] trait defines operations for:
//! - Saving definitions with optimistic version checking
//! - Listing active definitions for trigger matching
//! - Creating and incrementally updating execution records and step rows
//! - Querying execution history, newest-first
//! - Atomically pushing roll-up statistics onto a definition

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{
  CreatedEntityRef, ExecutionMetrics, ExecutionResults, ExecutionStatus, StepRecord, StepStatus,
  TriggerSnapshot, WorkflowExecution,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trellis_workflow::{TriggerType, WorkflowDefinition};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A save raced with another edit of the same definition.
  #[error("version conflict on workflow {workflow_id}: expected version {expected}")]
  VersionConflict { workflow_id: String, expected: u32 },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A stored blob failed to (de)serialize.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage trait for workflow definitions and executions.
#[async_trait]
pub trait Store: Send + Sync {
  /// Persist a new workflow definition.
  async fn create_workflow(&self, definition: &WorkflowDefinition) -> Result<(), StoreError>;

  /// Get a workflow definition by id.
  async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, StoreError>;

  /// Save an edited definition. `expected_version` is the version the edit
  /// was based on; a mismatch fails with [`StoreError::VersionConflict`].
  async fn update_workflow(
    &self,
    definition: &WorkflowDefinition,
    expected_version: u32,
  ) -> Result<(), StoreError>;

  /// List all definitions in a workspace.
  async fn list_workflows(&self, workspace_id: &str) -> Result<Vec<WorkflowDefinition>, StoreError>;

  /// List active definitions in a workspace whose trigger type matches.
  async fn list_triggerable(
    &self,
    workspace_id: &str,
    trigger_type: TriggerType,
  ) -> Result<Vec<WorkflowDefinition>, StoreError>;

  /// Push one terminated execution into the definition's roll-up stats.
  ///
  /// The counter/running-mean update must be atomic per definition so
  /// concurrent terminations never lose updates.
  async fn increment_stats(
    &self,
    workflow_id: &str,
    success: bool,
    duration_ms: i64,
    finished_at: DateTime<Utc>,
  ) -> Result<(), StoreError>;

  /// Create a new execution record.
  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

  /// Get an execution record by id, with its step rows.
  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, StoreError>;

  /// Persist the current state of an execution record (status, counters,
  /// error, completion timestamps). Step rows are written separately.
  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

  /// Insert or update one step row, keyed by execution and position.
  async fn upsert_step(
    &self,
    execution_id: &str,
    seq: u32,
    step: &StepRecord,
  ) -> Result<(), StoreError>;

  /// List executions for a workflow, newest-first.
  async fn list_executions(
    &self,
    workflow_id: &str,
    limit: u32,
  ) -> Result<Vec<WorkflowExecution>, StoreError>;
}
