use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use trellis_workflow::{
  Condition, Step, Trigger, TriggerType, WorkflowConfig, WorkflowDefinition, WorkflowStats,
  WorkflowStatus,
};

use crate::types::{
  CreatedEntityRef, ExecutionMetrics, ExecutionResults, ExecutionStatus, StepRecord, StepStatus,
  TriggerSnapshot, WorkflowExecution,
};
use crate::{Store, StoreError};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database at the given path or URL.
  pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
    let options: SqliteConnectOptions = url.parse::<SqliteConnectOptions>()?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self::new(pool))
  }

  /// Open an in-memory database.
  ///
  /// The pool is pinned to a single connection: each SQLite in-memory
  /// connection is its own database, so additional connections would see
  /// nothing.
  pub async fn in_memory() -> Result<Self, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

#[derive(FromRow)]
struct WorkflowRow {
  workflow_id: String,
  workspace_id: String,
  name: String,
  description: String,
  version: i64,
  trigger: Json<Trigger>,
  steps: Json<Vec<Step>>,
  conditions: Json<Vec<Condition>>,
  status: String,
  config: Json<WorkflowConfig>,
  total_executions: i64,
  successful_executions: i64,
  failed_executions: i64,
  average_duration_ms: f64,
  last_executed_at: Option<DateTime<Utc>>,
  last_success_at: Option<DateTime<Utc>>,
  last_failure_at: Option<DateTime<Utc>>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for WorkflowDefinition {
  type Error = StoreError;

  fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
    let status: WorkflowStatus = serde_json::from_value(serde_json::Value::String(row.status))?;
    Ok(WorkflowDefinition {
      workflow_id: row.workflow_id,
      workspace_id: row.workspace_id,
      name: row.name,
      description: row.description,
      version: row.version as u32,
      trigger: row.trigger.0,
      steps: row.steps.0,
      conditions: row.conditions.0,
      status,
      stats: WorkflowStats {
        total_executions: row.total_executions as u64,
        successful_executions: row.successful_executions as u64,
        failed_executions: row.failed_executions as u64,
        average_duration_ms: row.average_duration_ms,
        last_executed_at: row.last_executed_at,
        last_success_at: row.last_success_at,
        last_failure_at: row.last_failure_at,
      },
      config: row.config.0,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(FromRow)]
struct ExecutionRow {
  execution_id: String,
  workflow_id: String,
  workspace_id: String,
  workflow_version: i64,
  status: ExecutionStatus,
  trigger: Json<TriggerSnapshot>,
  results: Json<ExecutionResults>,
  created_entities: Json<Vec<CreatedEntityRef>>,
  metrics: Json<ExecutionMetrics>,
  error: Option<String>,
  started_at: DateTime<Utc>,
  completed_at: Option<DateTime<Utc>>,
  duration_ms: Option<i64>,
}

impl ExecutionRow {
  fn into_execution(self, steps: Vec<StepRecord>) -> WorkflowExecution {
    WorkflowExecution {
      execution_id: self.execution_id,
      workflow_id: self.workflow_id,
      workspace_id: self.workspace_id,
      workflow_version: self.workflow_version as u32,
      status: self.status,
      trigger: self.trigger.0,
      steps,
      results: self.results.0,
      created_entities: self.created_entities.0,
      metrics: self.metrics.0,
      error: self.error,
      started_at: self.started_at,
      completed_at: self.completed_at,
      duration_ms: self.duration_ms,
    }
  }
}

#[derive(FromRow)]
struct StepRow {
  step_id: String,
  name: String,
  status: StepStatus,
  started_at: DateTime<Utc>,
  completed_at: Option<DateTime<Utc>>,
  duration_ms: Option<i64>,
  input: Json<serde_json::Value>,
  output: Option<Json<serde_json::Value>>,
  error: Option<String>,
  retries: i64,
}

impl From<StepRow> for StepRecord {
  fn from(row: StepRow) -> Self {
    StepRecord {
      step_id: row.step_id,
      name: row.name,
      status: row.status,
      started_at: row.started_at,
      completed_at: row.completed_at,
      duration_ms: row.duration_ms,
      input: row.input.0,
      output: row.output.map(|o| o.0),
      error: row.error,
      retries: row.retries as u32,
    }
  }
}

impl SqliteStore {
  async fn load_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, StoreError> {
    let rows: Vec<StepRow> = sqlx::query_as(
      r#"
      SELECT step_id, name, status, started_at, completed_at, duration_ms, input, output, error, retries
      FROM execution_steps
      WHERE execution_id = ?
      ORDER BY seq ASC
      "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(StepRecord::from).collect())
  }
}

const WORKFLOW_COLUMNS: &str = "workflow_id, workspace_id, name, description, version, trigger, \
   steps, conditions, status, config, total_executions, successful_executions, failed_executions, \
   average_duration_ms, last_executed_at, last_success_at, last_failure_at, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "execution_id, workflow_id, workspace_id, workflow_version, \
   status, trigger, results, created_entities, metrics, error, started_at, completed_at, \
   duration_ms";

#[async_trait::async_trait]
impl Store for SqliteStore {
  async fn create_workflow(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO workflow_definitions
        (workflow_id, workspace_id, name, description, version, trigger_type, trigger, steps,
         conditions, status, config, total_executions, successful_executions, failed_executions,
         average_duration_ms, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0, ?, ?)
      "#,
    )
    .bind(&definition.workflow_id)
    .bind(&definition.workspace_id)
    .bind(&definition.name)
    .bind(&definition.description)
    .bind(definition.version as i64)
    .bind(definition.trigger.trigger_type.as_str())
    .bind(Json(&definition.trigger))
    .bind(Json(&definition.steps))
    .bind(Json(&definition.conditions))
    .bind(definition.status.as_str())
    .bind(Json(&definition.config))
    .bind(definition.created_at)
    .bind(definition.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, StoreError> {
    let row: Option<WorkflowRow> = sqlx::query_as(&format!(
      "SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions WHERE workflow_id = ?"
    ))
    .bind(workflow_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or_else(|| StoreError::NotFound(format!("workflow {workflow_id}")))?
      .try_into()
  }

  async fn update_workflow(
    &self,
    definition: &WorkflowDefinition,
    expected_version: u32,
  ) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_definitions
      SET name = ?, description = ?, version = ?, trigger_type = ?, trigger = ?, steps = ?,
          conditions = ?, status = ?, config = ?, updated_at = ?
      WHERE workflow_id = ? AND version = ?
      "#,
    )
    .bind(&definition.name)
    .bind(&definition.description)
    .bind(definition.version as i64)
    .bind(definition.trigger.trigger_type.as_str())
    .bind(Json(&definition.trigger))
    .bind(Json(&definition.steps))
    .bind(Json(&definition.conditions))
    .bind(definition.status.as_str())
    .bind(Json(&definition.config))
    .bind(definition.updated_at)
    .bind(&definition.workflow_id)
    .bind(expected_version as i64)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::VersionConflict {
        workflow_id: definition.workflow_id.clone(),
        expected: expected_version,
      });
    }
    Ok(())
  }

  async fn list_workflows(&self, workspace_id: &str) -> Result<Vec<WorkflowDefinition>, StoreError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
      "SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions WHERE workspace_id = ? ORDER BY created_at DESC"
    ))
    .bind(workspace_id)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(WorkflowDefinition::try_from).collect()
  }

  async fn list_triggerable(
    &self,
    workspace_id: &str,
    trigger_type: TriggerType,
  ) -> Result<Vec<WorkflowDefinition>, StoreError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
      "SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions \
       WHERE workspace_id = ? AND status = 'active' AND trigger_type = ?"
    ))
    .bind(workspace_id)
    .bind(trigger_type.as_str())
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(WorkflowDefinition::try_from).collect()
  }

  async fn increment_stats(
    &self,
    workflow_id: &str,
    success: bool,
    duration_ms: i64,
    finished_at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    // Single statement: every right-hand side reads the pre-update row, so
    // concurrent terminations serialize on the database without a
    // read-modify-write race. The running mean uses the old average and the
    // old total.
    let result = sqlx::query(
      r#"
      UPDATE workflow_definitions
      SET average_duration_ms =
            (average_duration_ms * total_executions + ?1) / (total_executions + 1),
          total_executions = total_executions + 1,
          successful_executions = successful_executions + ?2,
          failed_executions = failed_executions + (1 - ?2),
          last_executed_at = ?3,
          last_success_at = CASE WHEN ?2 = 1 THEN ?3 ELSE last_success_at END,
          last_failure_at = CASE WHEN ?2 = 0 THEN ?3 ELSE last_failure_at END
      WHERE workflow_id = ?4
      "#,
    )
    .bind(duration_ms)
    .bind(if success { 1i64 } else { 0i64 })
    .bind(finished_at)
    .bind(workflow_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(format!("workflow {workflow_id}")));
    }
    Ok(())
  }

  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO workflow_executions
        (execution_id, workflow_id, workspace_id, workflow_version, status, trigger, results,
         created_entities, metrics, error, started_at, completed_at, duration_ms)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(&execution.workspace_id)
    .bind(execution.workflow_version as i64)
    .bind(execution.status)
    .bind(Json(&execution.trigger))
    .bind(Json(&execution.results))
    .bind(Json(&execution.created_entities))
    .bind(Json(&execution.metrics))
    .bind(&execution.error)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(execution.duration_ms)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, StoreError> {
    let row: Option<ExecutionRow> = sqlx::query_as(&format!(
      "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE execution_id = ?"
    ))
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?;

    let row = row.ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
    let steps = self.load_steps(execution_id).await?;
    Ok(row.into_execution(steps))
  }

  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      UPDATE workflow_executions
      SET status = ?, results = ?, created_entities = ?, metrics = ?, error = ?,
          completed_at = ?, duration_ms = ?
      WHERE execution_id = ?
      "#,
    )
    .bind(execution.status)
    .bind(Json(&execution.results))
    .bind(Json(&execution.created_entities))
    .bind(Json(&execution.metrics))
    .bind(&execution.error)
    .bind(execution.completed_at)
    .bind(execution.duration_ms)
    .bind(&execution.execution_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn upsert_step(
    &self,
    execution_id: &str,
    seq: u32,
    step: &StepRecord,
  ) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO execution_steps
        (execution_id, seq, step_id, name, status, started_at, completed_at, duration_ms,
         input, output, error, retries)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT(execution_id, seq) DO UPDATE SET
        status = excluded.status,
        completed_at = excluded.completed_at,
        duration_ms = excluded.duration_ms,
        output = excluded.output,
        error = excluded.error,
        retries = excluded.retries
      "#,
    )
    .bind(execution_id)
    .bind(seq as i64)
    .bind(&step.step_id)
    .bind(&step.name)
    .bind(step.status)
    .bind(step.started_at)
    .bind(step.completed_at)
    .bind(step.duration_ms)
    .bind(Json(&step.input))
    .bind(step.output.as_ref().map(Json))
    .bind(&step.error)
    .bind(step.retries as i64)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_executions(
    &self,
    workflow_id: &str,
    limit: u32,
  ) -> Result<Vec<WorkflowExecution>, StoreError> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
      "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
       WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?"
    ))
    .bind(workflow_id)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await?;

    let mut executions = Vec::with_capacity(rows.len());
    for row in rows {
      let steps = self.load_steps(&row.execution_id).await?;
      executions.push(row.into_execution(steps));
    }
    Ok(executions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_workflow::{
    SendNotificationConfig, Step, StepAction, Trigger, TriggerEvent, TriggerType,
  };

  async fn store() -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    store.migrate().await.unwrap();
    store
  }

  fn definition() -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("ws-1", "Deal won", Trigger::new(TriggerType::DealWon));
    def.steps = vec![Step::new(
      "notify",
      "Notify sales",
      StepAction::SendNotification(SendNotificationConfig {
        recipients: vec!["sales".to_string()],
        message: "won".to_string(),
        channel: None,
      }),
    )];
    def
  }

  #[tokio::test]
  async fn test_workflow_round_trip() {
    let store = store().await;
    let mut def = definition();
    def.activate().unwrap();
    store.create_workflow(&def).await.unwrap();

    let loaded = store.get_workflow(&def.workflow_id).await.unwrap();
    assert_eq!(loaded.name, "Deal won");
    assert_eq!(loaded.status, WorkflowStatus::Active);
    assert_eq!(loaded.steps.len(), 1);
    assert_eq!(loaded.trigger.trigger_type, TriggerType::DealWon);
  }

  #[tokio::test]
  async fn test_update_workflow_checks_version() {
    let store = store().await;
    let mut def = definition();
    store.create_workflow(&def).await.unwrap();

    let base_version = def.version;
    def.set_conditions(vec![]);
    store.update_workflow(&def, base_version).await.unwrap();

    // A second save based on the stale version must conflict.
    let result = store.update_workflow(&def, base_version).await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
  }

  #[tokio::test]
  async fn test_list_triggerable_filters_status_and_type() {
    let store = store().await;

    let mut active = definition();
    active.activate().unwrap();
    store.create_workflow(&active).await.unwrap();

    let draft = definition();
    store.create_workflow(&draft).await.unwrap();

    let mut other_trigger = definition();
    other_trigger.trigger = Trigger::new(TriggerType::ContactCreated);
    other_trigger.activate().unwrap();
    store.create_workflow(&other_trigger).await.unwrap();

    let matched = store
      .list_triggerable("ws-1", TriggerType::DealWon)
      .await
      .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].workflow_id, active.workflow_id);

    let none = store
      .list_triggerable("ws-2", TriggerType::DealWon)
      .await
      .unwrap();
    assert!(none.is_empty());
  }

  #[tokio::test]
  async fn test_execution_round_trip_with_steps() {
    let store = store().await;
    let def = definition();
    store.create_workflow(&def).await.unwrap();

    let event = TriggerEvent::new(TriggerType::DealWon, serde_json::json!({"deal_id": "d-1"}));
    let mut execution = WorkflowExecution::begin("ex-1".to_string(), &def, &event);
    store.create_execution(&execution).await.unwrap();

    let mut record = StepRecord::started(&def.steps[0]);
    store.upsert_step("ex-1", 0, &record).await.unwrap();

    record.finish(
      StepStatus::Completed,
      Some(serde_json::json!({"notified": 1})),
      None,
    );
    store.upsert_step("ex-1", 0, &record).await.unwrap();

    execution.status = ExecutionStatus::Completed;
    execution.metrics.total_steps = 1;
    execution.metrics.completed_steps = 1;
    execution.results.notifications_sent = 1;
    store.update_execution(&execution).await.unwrap();

    let loaded = store.get_execution("ex-1").await.unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.steps.len(), 1);
    assert_eq!(loaded.steps[0].status, StepStatus::Completed);
    assert_eq!(loaded.results.notifications_sent, 1);
    assert_eq!(loaded.trigger.payload["deal_id"], "d-1");
  }

  #[tokio::test]
  async fn test_list_executions_newest_first() {
    let store = store().await;
    let def = definition();
    store.create_workflow(&def).await.unwrap();

    for i in 0..3i64 {
      let event = TriggerEvent::new(TriggerType::DealWon, serde_json::json!({}));
      let mut execution = WorkflowExecution::begin(format!("ex-{i}"), &def, &event);
      execution.started_at = Utc::now() + chrono::Duration::milliseconds(i);
      store.create_execution(&execution).await.unwrap();
    }

    let history = store.list_executions(&def.workflow_id, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].execution_id, "ex-2");
    assert_eq!(history[1].execution_id, "ex-1");
  }

  #[tokio::test]
  async fn test_increment_stats_running_mean() {
    let store = store().await;
    let def = definition();
    store.create_workflow(&def).await.unwrap();

    let now = Utc::now();
    store
      .increment_stats(&def.workflow_id, true, 100, now)
      .await
      .unwrap();
    store
      .increment_stats(&def.workflow_id, false, 300, now)
      .await
      .unwrap();

    let loaded = store.get_workflow(&def.workflow_id).await.unwrap();
    assert_eq!(loaded.stats.total_executions, 2);
    assert_eq!(loaded.stats.successful_executions, 1);
    assert_eq!(loaded.stats.failed_executions, 1);
    assert!((loaded.stats.average_duration_ms - 200.0).abs() < f64::EPSILON);
    assert!(loaded.stats.last_success_at.is_some());
    assert!(loaded.stats.last_failure_at.is_some());
  }
}
