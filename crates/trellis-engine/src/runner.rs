//! Workflow runner: the per-execution state machine.
//!
//! One runner invocation drives one execution from trigger to terminal
//! state: it walks the definition's steps in order, lets condition steps
//! redirect the index, applies each step's on-error policy, and records
//! progress incrementally through the recorder. Suspension points are the
//! `wait` step, the inter-retry delay, and collaborator calls; the
//! sequencing logic itself is synchronous per execution.
//!
//! Cancellation is observed at step boundaries and inside suspensions, never
//! preemptively inside a collaborator call. The whole-execution timeout is a
//! supervising timer that races the step loop and can abort a mid-retry
//! wait.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use trellis_store::{ExecutionStatus, StepStatus, StoreError, WorkflowExecution};
use trellis_workflow::{OnErrorAction, Step, TriggerEvent, WorkflowDefinition};

use crate::collaborators::Collaborators;
use crate::conditions;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::executor::{StepEffect, StepExecutor, StepOutcome};
use crate::recorder::ExecutionRecorder;

/// How one execution ended, before finalization.
enum RunOutcome {
  Completed,
  Failed(String),
  Cancelled,
  TimedOut,
}

/// What to do after one step has been fully handled.
enum StepVerdict {
  Advance,
  Goto(String),
  Fatal(String),
  Cancelled,
}

/// Drives executions of one workflow definition.
pub struct WorkflowRunner {
  definition: WorkflowDefinition,
  executor: StepExecutor,
  collaborators: Collaborators,
  recorder: ExecutionRecorder,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl WorkflowRunner {
  pub fn new(
    definition: WorkflowDefinition,
    collaborators: Collaborators,
    recorder: ExecutionRecorder,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      definition,
      executor: StepExecutor::new(collaborators.clone()),
      collaborators,
      recorder,
      notifier,
    }
  }

  /// Run one execution to a terminal state and return its record.
  ///
  /// Step action failures are absorbed into the record per on-error policy;
  /// only store failures surface as errors.
  #[instrument(
    name = "workflow_run",
    skip(self, event, cancel),
    fields(
      workflow_id = %self.definition.workflow_id,
      execution_id = %execution_id,
    )
  )]
  pub async fn run(
    &self,
    execution_id: String,
    event: TriggerEvent,
    cancel: CancellationToken,
  ) -> Result<WorkflowExecution, EngineError> {
    let mut execution = self
      .recorder
      .begin(execution_id, &self.definition, &event)
      .await?;

    info!(
      trigger_type = %event.event_type,
      "execution_started"
    );
    self.notifier.notify(ExecutionEvent::ExecutionStarted {
      execution_id: execution.execution_id.clone(),
      workflow_id: self.definition.workflow_id.clone(),
    });

    let mut context = ExecutionContext::seeded(event.payload.clone());

    let deadline = self
      .definition
      .config
      .timeout_ms
      .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));

    let outcome = {
      let run = self.run_steps(&mut execution, &mut context, &cancel);
      tokio::pin!(run);
      match deadline {
        Some(deadline) => tokio::select! {
          result = &mut run => result?,
          _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
        },
        None => run.await?,
      }
    };

    match outcome {
      RunOutcome::Completed => {
        self
          .recorder
          .finalize(&mut execution, ExecutionStatus::Completed, None)
          .await?;
        info!(duration_ms = execution.duration_ms, "execution_completed");
        self.notifier.notify(ExecutionEvent::ExecutionCompleted {
          execution_id: execution.execution_id.clone(),
        });
        if self.definition.config.notify_on_success {
          self
            .send_outcome_notification(&execution, "completed successfully")
            .await;
        }
      }
      RunOutcome::Failed(message) => {
        self
          .recorder
          .finalize(&mut execution, ExecutionStatus::Failed, Some(message.clone()))
          .await?;
        error!(error = %message, "execution_failed");
        self.notifier.notify(ExecutionEvent::ExecutionFailed {
          execution_id: execution.execution_id.clone(),
          error: message,
        });
        if self.definition.config.notify_on_failure {
          self.send_outcome_notification(&execution, "failed").await;
        }
      }
      RunOutcome::TimedOut => {
        let message = format!(
          "execution timed out after {} ms",
          self.definition.config.timeout_ms.unwrap_or_default()
        );
        self
          .recorder
          .finalize(&mut execution, ExecutionStatus::Failed, Some(message.clone()))
          .await?;
        error!(error = %message, "execution_failed");
        self.notifier.notify(ExecutionEvent::ExecutionFailed {
          execution_id: execution.execution_id.clone(),
          error: message,
        });
        if self.definition.config.notify_on_failure {
          self.send_outcome_notification(&execution, "timed out").await;
        }
      }
      RunOutcome::Cancelled => {
        self
          .recorder
          .finalize(&mut execution, ExecutionStatus::Cancelled, None)
          .await?;
        warn!("execution_cancelled");
        self.notifier.notify(ExecutionEvent::ExecutionCancelled {
          execution_id: execution.execution_id.clone(),
        });
      }
    }

    Ok(execution)
  }

  /// The step loop over the definition's ordered chain.
  async fn run_steps(
    &self,
    execution: &mut WorkflowExecution,
    context: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Result<RunOutcome, StoreError> {
    // Workflow-level gate: conditions evaluated against the seeded context.
    if !conditions::evaluate(&self.definition.conditions, context) {
      info!("workflow conditions not met, completing without steps");
      return Ok(RunOutcome::Completed);
    }

    let steps = &self.definition.steps;
    let mut index = 0usize;
    while index < steps.len() {
      if cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
      }
      let step = &steps[index];

      if !step.enabled {
        self.recorder.step_skipped(execution, step).await?;
        self.notifier.notify(ExecutionEvent::StepSkipped {
          execution_id: execution.execution_id.clone(),
          step_id: step.id.clone(),
        });
        index += 1;
        continue;
      }

      match self.run_step(execution, step, context, cancel).await? {
        StepVerdict::Advance => index += 1,
        StepVerdict::Goto(target) => {
          // Validation guarantees the target exists, later in the chain.
          index = self.definition.step_index(&target).unwrap_or(index + 1);
        }
        StepVerdict::Fatal(message) => return Ok(RunOutcome::Failed(message)),
        StepVerdict::Cancelled => return Ok(RunOutcome::Cancelled),
      }
    }

    Ok(RunOutcome::Completed)
  }

  /// Execute one enabled step, applying its on-error policy.
  async fn run_step(
    &self,
    execution: &mut WorkflowExecution,
    step: &Step,
    context: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Result<StepVerdict, StoreError> {
    let seq = self.recorder.step_started(execution, step).await?;
    self.notifier.notify(ExecutionEvent::StepStarted {
      execution_id: execution.execution_id.clone(),
      step_id: step.id.clone(),
    });

    let policy = &step.on_error;
    let retry_cap = match self.definition.config.max_retries {
      Some(cap) => policy.retries.min(cap),
      None => policy.retries,
    };
    let mut retries = 0u32;

    loop {
      match self.executor.execute(step, context).await {
        Ok(StepOutcome::Wait(duration)) => {
          tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.cancelled() => {
              self
                .recorder
                .step_finished(execution, seq, StepStatus::Skipped, None,
                  Some("execution cancelled during wait".to_string()), retries)
                .await?;
              return Ok(StepVerdict::Cancelled);
            }
          }
          let output = json!({ "waited_ms": duration.as_millis() as u64 });
          self
            .recorder
            .step_finished(execution, seq, StepStatus::Completed, Some(output.clone()), None, retries)
            .await?;
          context.insert_step_output(&step.id, output.clone());
          self.notifier.notify(ExecutionEvent::StepCompleted {
            execution_id: execution.execution_id.clone(),
            step_id: step.id.clone(),
            output,
          });
          return Ok(StepVerdict::Advance);
        }

        Ok(StepOutcome::Branch { matched, target }) => {
          let output = json!({ "matched": matched, "target": target });
          self
            .recorder
            .step_finished(execution, seq, StepStatus::Completed, Some(output.clone()), None, retries)
            .await?;
          context.insert_step_output(&step.id, output.clone());
          self.notifier.notify(ExecutionEvent::StepCompleted {
            execution_id: execution.execution_id.clone(),
            step_id: step.id.clone(),
            output,
          });
          return Ok(match target {
            Some(target) => StepVerdict::Goto(target),
            None => StepVerdict::Advance,
          });
        }

        Ok(StepOutcome::Output(result)) => {
          context.insert_step_output(&step.id, result.output.clone());
          match result.effect {
            StepEffect::EntityCreated => {}
            StepEffect::EmailSent => execution.results.emails_sent += 1,
            StepEffect::NotificationSent => execution.results.notifications_sent += 1,
            StepEffect::WebhookCalled => execution.results.webhooks_called += 1,
            StepEffect::EntityUpdated => execution.results.entities_updated += 1,
            StepEffect::None => {}
          }
          if let Some(entity) = result.created_entity {
            *execution
              .results
              .entities_created
              .entry(entity.entity_type.clone())
              .or_insert(0) += 1;
            execution.created_entities.push(trellis_store::CreatedEntityRef {
              entity_type: entity.entity_type,
              id: entity.id,
              step_id: step.id.clone(),
            });
          }
          self
            .recorder
            .step_finished(
              execution,
              seq,
              StepStatus::Completed,
              Some(result.output.clone()),
              None,
              retries,
            )
            .await?;
          self.notifier.notify(ExecutionEvent::StepCompleted {
            execution_id: execution.execution_id.clone(),
            step_id: step.id.clone(),
            output: result.output,
          });
          return Ok(StepVerdict::Advance);
        }

        Err(failure) => {
          if policy.action == OnErrorAction::Retry && failure.is_retryable() && retries < retry_cap
          {
            retries += 1;
            warn!(
              step_id = %step.id,
              attempt = retries,
              max = retry_cap,
              error = %failure,
              "step_retrying"
            );
            self.recorder.step_retrying(execution, seq, retries).await?;
            tokio::select! {
              _ = tokio::time::sleep(Duration::from_millis(policy.retry_delay_ms)) => continue,
              _ = cancel.cancelled() => {
                self
                  .recorder
                  .step_finished(execution, seq, StepStatus::Skipped, None,
                    Some("execution cancelled during retry delay".to_string()), retries)
                  .await?;
                return Ok(StepVerdict::Cancelled);
              }
            }
          }

          let message = format!("step '{}' failed: {failure}", step.id);
          warn!(step_id = %step.id, retries, error = %failure, "step_failed");

          // Notify fires even when continue_on_error downgrades the stop.
          if policy.action == OnErrorAction::Notify {
            self.send_step_failure_notification(step, &failure.to_string()).await;
          }

          self
            .recorder
            .step_finished(
              execution,
              seq,
              StepStatus::Failed,
              None,
              Some(failure.to_string()),
              retries,
            )
            .await?;
          self.notifier.notify(ExecutionEvent::StepFailed {
            execution_id: execution.execution_id.clone(),
            step_id: step.id.clone(),
            error: failure.to_string(),
          });

          let fatal = match policy.action {
            OnErrorAction::Skip => false,
            OnErrorAction::Retry | OnErrorAction::Fail | OnErrorAction::Notify => true,
          };
          // Workflow-level override beats step-level policy.
          if !fatal || self.definition.config.continue_on_error {
            return Ok(StepVerdict::Advance);
          }
          return Ok(StepVerdict::Fatal(message));
        }
      }
    }
  }

  async fn send_step_failure_notification(&self, step: &Step, error: &str) {
    let recipients = &self.definition.config.notification_recipients;
    if recipients.is_empty() {
      return;
    }
    let message = format!(
      "workflow '{}' step '{}' failed: {error}",
      self.definition.name, step.id
    );
    if let Err(send_error) = self
      .collaborators
      .notifications
      .notify(recipients, &message, None)
      .await
    {
      warn!(error = %send_error, "failure notification could not be sent");
    }
  }

  async fn send_outcome_notification(&self, execution: &WorkflowExecution, outcome: &str) {
    let recipients = &self.definition.config.notification_recipients;
    if recipients.is_empty() {
      return;
    }
    let message = format!(
      "workflow '{}' execution {} {outcome}",
      self.definition.name, execution.execution_id
    );
    if let Err(send_error) = self
      .collaborators
      .notifications
      .notify(recipients, &message, None)
      .await
    {
      warn!(error = %send_error, "outcome notification could not be sent");
    }
  }
}
