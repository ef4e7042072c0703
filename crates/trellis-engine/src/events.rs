//! Execution events and notifiers for observability.
//!
//! Events are emitted as an execution proceeds so consumers can observe
//! progress (CLI output, UI streaming). Persistence does not go through
//! events; the recorder writes to the store directly.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  ExecutionStarted {
    execution_id: String,
    workflow_id: String,
  },

  StepStarted {
    execution_id: String,
    step_id: String,
  },

  StepCompleted {
    execution_id: String,
    step_id: String,
    output: serde_json::Value,
  },

  /// A step failed; with a `skip` policy (or `continue_on_error`) the
  /// execution still proceeds after this.
  StepFailed {
    execution_id: String,
    step_id: String,
    error: String,
  },

  StepSkipped {
    execution_id: String,
    step_id: String,
  },

  ExecutionCompleted {
    execution_id: String,
  },

  ExecutionFailed {
    execution_id: String,
    error: String,
  },

  ExecutionCancelled {
    execution_id: String,
  },
}

impl ExecutionEvent {
  /// True for the three terminal events.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionEvent::ExecutionCompleted { .. }
        | ExecutionEvent::ExecutionFailed { .. }
        | ExecutionEvent::ExecutionCancelled { .. }
    )
  }

  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::ExecutionStarted { execution_id, .. }
      | ExecutionEvent::StepStarted { execution_id, .. }
      | ExecutionEvent::StepCompleted { execution_id, .. }
      | ExecutionEvent::StepFailed { execution_id, .. }
      | ExecutionEvent::StepSkipped { execution_id, .. }
      | ExecutionEvent::ExecutionCompleted { execution_id }
      | ExecutionEvent::ExecutionFailed { execution_id, .. }
      | ExecutionEvent::ExecutionCancelled { execution_id } => execution_id,
    }
  }
}

/// Trait for receiving execution events.
///
/// The runner calls `notify` for each event; implementations decide what to
/// do with them (print, broadcast, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the runner; volume is a handful
/// of events per step.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped; that is not the runner's problem.
    let _ = self.sender.send(event);
  }
}
