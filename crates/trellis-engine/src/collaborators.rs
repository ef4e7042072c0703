//! External collaborator interfaces.
//!
//! The engine invokes one capability interface per step action kind and does
//! not know or care how they are implemented. Errors come back classified;
//! classification, not message text, drives retry eligibility.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Classified failure from a collaborator call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
  /// The resolved config was malformed for this collaborator.
  #[error("invalid request: {0}")]
  Validation(String),

  /// The collaborator could not be reached.
  #[error("collaborator unavailable: {0}")]
  Unavailable(String),

  /// The collaborator was reached and refused the request.
  #[error("collaborator rejected request: {0}")]
  Rejected(String),

  /// The call exceeded its budget.
  #[error("collaborator call timed out: {0}")]
  Timeout(String),
}

impl CollaboratorError {
  /// Only transient failures are worth re-attempting.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      CollaboratorError::Unavailable(_) | CollaboratorError::Timeout(_)
    )
  }
}

/// The kinds of CRM entities the engine can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
  Contact,
  Lead,
  Deal,
  Project,
}

impl EntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Contact => "contact",
      EntityKind::Lead => "lead",
      EntityKind::Deal => "deal",
      EntityKind::Project => "project",
    }
  }
}

/// An entity a collaborator created on the engine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEntity {
  pub entity_type: String,
  pub id: String,
}

/// Entity creation and mutation APIs (contact/lead/deal/project stores).
#[async_trait]
pub trait EntityStore: Send + Sync {
  async fn create_entity(
    &self,
    kind: EntityKind,
    fields: &Map<String, Value>,
  ) -> Result<CreatedEntity, CollaboratorError>;

  async fn update_field(
    &self,
    entity_type: &str,
    entity_id: &str,
    field: &str,
    value: &Value,
  ) -> Result<(), CollaboratorError>;

  async fn add_tag(
    &self,
    entity_type: &str,
    entity_id: &str,
    tag: &str,
  ) -> Result<(), CollaboratorError>;

  async fn assign_user(
    &self,
    entity_type: &str,
    entity_id: &str,
    user_id: &str,
  ) -> Result<(), CollaboratorError>;
}

/// Outbound email.
#[async_trait]
pub trait EmailSender: Send + Sync {
  /// Returns a provider payload (message id etc.) recorded as step output.
  async fn send(&self, to: &str, subject: &str, body: &str) -> Result<Value, CollaboratorError>;
}

/// In-app/ops notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
  async fn notify(
    &self,
    recipients: &[String],
    message: &str,
    channel: Option<&str>,
  ) -> Result<(), CollaboratorError>;
}

/// Outbound webhook caller.
#[async_trait]
pub trait WebhookCaller: Send + Sync {
  async fn call(
    &self,
    url: &str,
    method: &str,
    headers: &Map<String, Value>,
    body: Option<&Value>,
  ) -> Result<Value, CollaboratorError>;
}

/// AI-backed scoring and enrichment.
#[async_trait]
pub trait AiService: Send + Sync {
  async fn score_lead(&self, lead_id: &str, model: Option<&str>)
  -> Result<Value, CollaboratorError>;

  async fn enrich_contact(&self, contact_id: &str) -> Result<Value, CollaboratorError>;
}

/// The full collaborator set the engine is constructed with.
#[derive(Clone)]
pub struct Collaborators {
  pub entities: Arc<dyn EntityStore>,
  pub email: Arc<dyn EmailSender>,
  pub notifications: Arc<dyn NotificationSender>,
  pub webhooks: Arc<dyn WebhookCaller>,
  pub ai: Arc<dyn AiService>,
}
