//! Trellis Workflow
//!
//! This crate contains the serializable workflow definition types for Trellis.
//! A definition is the blueprint an operator edits: a trigger, an ordered
//! chain of steps, optional gating conditions, an execution-level config, and
//! roll-up statistics maintained by the engine.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `trellis run workflow.json`)
//! - Database storage (as JSON blobs)
//!
//! The engine takes these types, validates them at save/activate time, and
//! interprets them at execution time. Anything that can be rejected before an
//! execution starts (unknown step types, duplicate step ids, dangling branch
//! targets) is rejected here, never mid-run.

mod action;
mod condition;
mod error;
mod step;
mod trigger;
mod workflow;

pub use action::{
  AddTagConfig, AssignUserConfig, ConditionConfig, CreateEntityConfig, EnrichContactConfig,
  ScoreLeadConfig, SendEmailConfig, SendNotificationConfig, StepAction, UpdateFieldConfig,
  WaitConfig, WebhookConfig,
};
pub use condition::{Condition, ConditionOperator, LogicalOperator};
pub use error::DefinitionError;
pub use step::{OnErrorAction, OnErrorPolicy, Step};
pub use trigger::{Trigger, TriggerEvent, TriggerType};
pub use workflow::{
  MAX_STEP_RETRIES, WorkflowConfig, WorkflowDefinition, WorkflowStats, WorkflowStatus,
};
