//! Trellis Engine
//!
//! The workflow automation engine: trigger matching, condition evaluation,
//! step execution against external collaborators, the per-execution state
//! machine, and incremental execution recording.
//!
//! The engine's sole inbound entry point is [`Engine::submit_event`]; each
//! matched definition gets an independent execution task. External
//! capabilities (entity stores, email, notifications, webhooks, AI) are
//! consumed through the traits in [`collaborators`].

pub mod collaborators;
pub mod conditions;
pub mod context;
pub mod events;
pub mod matcher;

mod engine;
mod error;
mod executor;
mod recorder;
mod runner;

pub use collaborators::{
  AiService, CollaboratorError, Collaborators, CreatedEntity, EmailSender, EntityKind,
  EntityStore, NotificationSender, WebhookCaller,
};
pub use context::ExecutionContext;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{StepEffect, StepExecutor, StepOutcome, StepOutput};
pub use recorder::ExecutionRecorder;
pub use runner::WorkflowRunner;
