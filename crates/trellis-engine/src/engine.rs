//! Engine facade.
//!
//! Owns the store, the collaborator set, and a registry of live executions.
//! `submit_event` is the sole entry point from the rest of the system: it
//! matches the event against active definitions and spawns one independent
//! task per matched workflow. Callers learn only that executions started;
//! outcomes are observable through the store and the notifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use trellis_store::{Store, WorkflowExecution};
use trellis_workflow::{
  Condition, DefinitionError, Step, TriggerEvent, TriggerType, WorkflowDefinition, WorkflowStats,
};

use crate::collaborators::Collaborators;
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::matcher;
use crate::recorder::ExecutionRecorder;
use crate::runner::WorkflowRunner;

type RunningRegistry = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// The workflow automation engine.
pub struct Engine {
  store: Arc<dyn Store>,
  collaborators: Collaborators,
  notifier: Arc<dyn ExecutionNotifier>,
  running: RunningRegistry,
  shutdown: CancellationToken,
}

fn lock<'a>(
  registry: &'a RunningRegistry,
) -> std::sync::MutexGuard<'a, HashMap<String, CancellationToken>> {
  registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Engine {
  /// Create an engine that discards execution events.
  pub fn new(store: Arc<dyn Store>, collaborators: Collaborators) -> Self {
    Self::with_notifier(store, collaborators, Arc::new(NoopNotifier))
  }

  /// Create an engine with a custom execution event notifier.
  pub fn with_notifier(
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      store,
      collaborators,
      notifier,
      running: Arc::new(Mutex::new(HashMap::new())),
      shutdown: CancellationToken::new(),
    }
  }

  /// Validate and persist a new definition.
  pub async fn create_workflow(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
    definition.validate()?;
    self.store.create_workflow(definition).await?;
    Ok(())
  }

  pub async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, EngineError> {
    Ok(self.store.get_workflow(workflow_id).await?)
  }

  /// Per-definition success-rate statistics.
  pub async fn workflow_stats(&self, workflow_id: &str) -> Result<WorkflowStats, EngineError> {
    Ok(self.store.get_workflow(workflow_id).await?.stats)
  }

  /// Activate a definition, making it eligible for triggering.
  pub async fn activate_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<WorkflowDefinition, EngineError> {
    self.with_workflow(workflow_id, |def| def.activate()).await
  }

  pub async fn pause_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, EngineError> {
    self.with_workflow(workflow_id, |def| def.pause()).await
  }

  pub async fn resume_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<WorkflowDefinition, EngineError> {
    self.with_workflow(workflow_id, |def| def.resume()).await
  }

  pub async fn archive_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<WorkflowDefinition, EngineError> {
    self.with_workflow(workflow_id, |def| def.archive()).await
  }

  /// Replace a definition's steps, bumping its version.
  pub async fn update_steps(
    &self,
    workflow_id: &str,
    steps: Vec<Step>,
  ) -> Result<WorkflowDefinition, EngineError> {
    self.with_workflow(workflow_id, |def| def.set_steps(steps)).await
  }

  /// Replace a definition's conditions, bumping its version.
  pub async fn update_conditions(
    &self,
    workflow_id: &str,
    conditions: Vec<Condition>,
  ) -> Result<WorkflowDefinition, EngineError> {
    self
      .with_workflow(workflow_id, |def| {
        def.set_conditions(conditions);
        Ok(())
      })
      .await
  }

  /// Submit an event: match active definitions and start one execution per
  /// match. Returns the started execution ids; an empty list means no
  /// automation is configured for this event.
  pub async fn submit_event(
    &self,
    event_type: TriggerType,
    payload: serde_json::Value,
    workspace_id: &str,
  ) -> Result<Vec<String>, EngineError> {
    let definitions = self.store.list_triggerable(workspace_id, event_type).await?;
    let event = TriggerEvent::new(event_type, payload);
    let matched = matcher::matching_workflows(&event, workspace_id, &definitions);

    info!(
      event_type = %event_type,
      workspace_id,
      matched = matched.len(),
      "event_submitted"
    );

    let mut execution_ids = Vec::with_capacity(matched.len());
    for definition in matched {
      let execution_id = uuid::Uuid::new_v4().to_string();
      let cancel = self.shutdown.child_token();
      lock(&self.running).insert(execution_id.clone(), cancel.clone());

      let runner = WorkflowRunner::new(
        definition.clone(),
        self.collaborators.clone(),
        ExecutionRecorder::new(self.store.clone()),
        self.notifier.clone(),
      );
      let running = self.running.clone();
      let event = event.clone();
      let id = execution_id.clone();
      tokio::spawn(async move {
        if let Err(run_error) = runner.run(id.clone(), event, cancel).await {
          error!(execution_id = %id, error = %run_error, "execution could not be recorded");
        }
        lock(&running).remove(&id);
      });

      execution_ids.push(execution_id);
    }

    Ok(execution_ids)
  }

  /// Request cancellation of a running execution. The execution observes it
  /// at its next step boundary. Returns false when the execution is not
  /// currently running.
  pub fn cancel_execution(&self, execution_id: &str) -> bool {
    match lock(&self.running).get(execution_id) {
      Some(token) => {
        token.cancel();
        true
      }
      None => false,
    }
  }

  pub async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
    Ok(self.store.get_execution(execution_id).await?)
  }

  /// Execution history for a definition, newest-first.
  pub async fn execution_history(
    &self,
    workflow_id: &str,
    limit: u32,
  ) -> Result<Vec<WorkflowExecution>, EngineError> {
    Ok(self.store.list_executions(workflow_id, limit).await?)
  }

  /// Number of currently running executions.
  pub fn running_executions(&self) -> usize {
    lock(&self.running).len()
  }

  /// Cancel every running execution (engine shutdown).
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }

  async fn with_workflow<F>(
    &self,
    workflow_id: &str,
    mutate: F,
  ) -> Result<WorkflowDefinition, EngineError>
  where
    F: FnOnce(&mut WorkflowDefinition) -> Result<(), DefinitionError>,
  {
    let mut definition = self.store.get_workflow(workflow_id).await?;
    let expected_version = definition.version;
    mutate(&mut definition)?;
    self.store.update_workflow(&definition, expected_version).await?;
    Ok(definition)
  }
}
