//! Dry-run collaborators for the CLI.
//!
//! Every external capability is implemented as a log line plus a synthetic
//! response, so a definition can be exercised end to end without touching a
//! CRM, a mail provider, or the network.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use trellis_engine::{
  AiService, CollaboratorError, Collaborators, CreatedEntity, EmailSender, EntityKind,
  EntityStore, NotificationSender, WebhookCaller,
};

/// Logs every call and fabricates plausible outputs.
#[derive(Default)]
pub struct DryRunCollaborators {
  entity_counter: AtomicU64,
}

impl DryRunCollaborators {
  pub fn collaborators() -> Collaborators {
    let shared = Arc::new(Self::default());
    Collaborators {
      entities: shared.clone(),
      email: shared.clone(),
      notifications: shared.clone(),
      webhooks: shared.clone(),
      ai: shared,
    }
  }
}

#[async_trait]
impl EntityStore for DryRunCollaborators {
  async fn create_entity(
    &self,
    kind: EntityKind,
    fields: &Map<String, Value>,
  ) -> Result<CreatedEntity, CollaboratorError> {
    let n = self.entity_counter.fetch_add(1, Ordering::Relaxed);
    let id = format!("dry-{}-{n}", kind.as_str());
    info!(entity_type = kind.as_str(), id, ?fields, "dry_run_create_entity");
    Ok(CreatedEntity {
      entity_type: kind.as_str().to_string(),
      id,
    })
  }

  async fn update_field(
    &self,
    entity_type: &str,
    entity_id: &str,
    field: &str,
    value: &Value,
  ) -> Result<(), CollaboratorError> {
    info!(entity_type, entity_id, field, %value, "dry_run_update_field");
    Ok(())
  }

  async fn add_tag(
    &self,
    entity_type: &str,
    entity_id: &str,
    tag: &str,
  ) -> Result<(), CollaboratorError> {
    info!(entity_type, entity_id, tag, "dry_run_add_tag");
    Ok(())
  }

  async fn assign_user(
    &self,
    entity_type: &str,
    entity_id: &str,
    user_id: &str,
  ) -> Result<(), CollaboratorError> {
    info!(entity_type, entity_id, user_id, "dry_run_assign_user");
    Ok(())
  }
}

#[async_trait]
impl EmailSender for DryRunCollaborators {
  async fn send(&self, to: &str, subject: &str, body: &str) -> Result<Value, CollaboratorError> {
    info!(to, subject, body_bytes = body.len(), "dry_run_send_email");
    Ok(json!({ "message_id": format!("dry-msg-{}", uuid::Uuid::new_v4()) }))
  }
}

#[async_trait]
impl NotificationSender for DryRunCollaborators {
  async fn notify(
    &self,
    recipients: &[String],
    message: &str,
    channel: Option<&str>,
  ) -> Result<(), CollaboratorError> {
    info!(?recipients, message, channel, "dry_run_notify");
    Ok(())
  }
}

#[async_trait]
impl WebhookCaller for DryRunCollaborators {
  async fn call(
    &self,
    url: &str,
    method: &str,
    _headers: &Map<String, Value>,
    body: Option<&Value>,
  ) -> Result<Value, CollaboratorError> {
    info!(url, method, has_body = body.is_some(), "dry_run_webhook");
    Ok(json!({ "status": 200 }))
  }
}

#[async_trait]
impl AiService for DryRunCollaborators {
  async fn score_lead(
    &self,
    lead_id: &str,
    model: Option<&str>,
  ) -> Result<Value, CollaboratorError> {
    info!(lead_id, model, "dry_run_score_lead");
    Ok(json!({ "lead_id": lead_id, "score": 50 }))
  }

  async fn enrich_contact(&self, contact_id: &str) -> Result<Value, CollaboratorError> {
    info!(contact_id, "dry_run_enrich_contact");
    Ok(json!({ "contact_id": contact_id, "enriched": true }))
  }
}
