//! Definition-time errors.
//!
//! Everything here is caught when a definition is saved or activated; a
//! definition that passes validation never produces these during execution.

/// Error type for workflow definition validation and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
  #[error("duplicate step id: {0}")]
  DuplicateStepId(String),

  #[error("step '{step_id}': on_error.retries is {retries}, maximum is {max}")]
  RetriesOutOfRange {
    step_id: String,
    retries: u32,
    max: u32,
  },

  #[error("step '{step_id}': branch target '{target}' does not name a step")]
  UnknownBranchTarget { step_id: String, target: String },

  #[error("step '{step_id}': branch target '{target}' must come later in the chain")]
  BackwardBranchTarget { step_id: String, target: String },

  #[error("step '{step_id}': wait duration must be greater than zero")]
  ZeroWaitDuration { step_id: String },

  #[error("workflow cannot be activated without at least one enabled step")]
  NoEnabledSteps,

  #[error("invalid status transition: {from} -> {to}")]
  InvalidStatusTransition { from: String, to: String },
}
