//! Step execution.
//!
//! Dispatches one step's action to its collaborator after resolving
//! `{{...}}` placeholders in the action config against the execution
//! context. The executor owns no retry logic; the runner applies the step's
//! on-error policy around it.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::instrument;
use trellis_workflow::{Step, StepAction};

use crate::collaborators::{Collaborators, CollaboratorError, CreatedEntity, EntityKind};
use crate::conditions;
use crate::context::ExecutionContext;

/// Side effect a completed step contributed, for the execution's
/// denormalized result counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEffect {
  None,
  EntityCreated,
  EmailSent,
  NotificationSent,
  WebhookCalled,
  EntityUpdated,
}

/// A successful action dispatch.
#[derive(Debug, Clone)]
pub struct StepOutput {
  /// Written into the context at `step.<id>`.
  pub output: Value,
  pub created_entity: Option<CreatedEntity>,
  pub effect: StepEffect,
}

/// What a step asks the runner to do next.
#[derive(Debug, Clone)]
pub enum StepOutcome {
  /// An action ran against a collaborator.
  Output(StepOutput),
  /// Suspend this execution's progression, then advance.
  Wait(Duration),
  /// A condition step chose a branch. `None` falls through in order.
  Branch {
    matched: bool,
    target: Option<String>,
  },
}

/// Executes one step's action against the appropriate collaborator.
#[derive(Clone)]
pub struct StepExecutor {
  collaborators: Collaborators,
}

impl StepExecutor {
  pub fn new(collaborators: Collaborators) -> Self {
    Self { collaborators }
  }

  /// Execute a single step against the context.
  #[instrument(name = "step_execute", skip(self, step, context), fields(step_id = %step.id, step_type = %step.action.kind()))]
  pub async fn execute(
    &self,
    step: &Step,
    context: &ExecutionContext,
  ) -> Result<StepOutcome, CollaboratorError> {
    match &step.action {
      StepAction::CreateContact(config) => {
        self.create(EntityKind::Contact, config, context).await
      }
      StepAction::CreateLead(config) => self.create(EntityKind::Lead, config, context).await,
      StepAction::CreateDeal(config) => self.create(EntityKind::Deal, config, context).await,
      StepAction::CreateProject(config) => {
        self.create(EntityKind::Project, config, context).await
      }
      StepAction::ScoreLead(config) => {
        let config: trellis_workflow::ScoreLeadConfig = resolved(config, context)?;
        let output = self
          .collaborators
          .ai
          .score_lead(&config.lead_id, config.model.as_deref())
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output,
          created_entity: None,
          effect: StepEffect::None,
        }))
      }
      StepAction::EnrichContact(config) => {
        let config: trellis_workflow::EnrichContactConfig = resolved(config, context)?;
        let output = self.collaborators.ai.enrich_contact(&config.contact_id).await?;
        Ok(StepOutcome::Output(StepOutput {
          output,
          created_entity: None,
          effect: StepEffect::EntityUpdated,
        }))
      }
      StepAction::SendEmail(config) => {
        let config: trellis_workflow::SendEmailConfig = resolved(config, context)?;
        let output = self
          .collaborators
          .email
          .send(&config.to, &config.subject, &config.body)
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output,
          created_entity: None,
          effect: StepEffect::EmailSent,
        }))
      }
      StepAction::SendNotification(config) => {
        let config: trellis_workflow::SendNotificationConfig = resolved(config, context)?;
        self
          .collaborators
          .notifications
          .notify(&config.recipients, &config.message, config.channel.as_deref())
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output: json!({ "recipients": config.recipients.len() }),
          created_entity: None,
          effect: StepEffect::NotificationSent,
        }))
      }
      StepAction::UpdateField(config) => {
        let config: trellis_workflow::UpdateFieldConfig = resolved(config, context)?;
        self
          .collaborators
          .entities
          .update_field(&config.entity_type, &config.entity_id, &config.field, &config.value)
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output: json!({ "entity_id": config.entity_id, "field": config.field }),
          created_entity: None,
          effect: StepEffect::EntityUpdated,
        }))
      }
      StepAction::AddTag(config) => {
        let config: trellis_workflow::AddTagConfig = resolved(config, context)?;
        self
          .collaborators
          .entities
          .add_tag(&config.entity_type, &config.entity_id, &config.tag)
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output: json!({ "entity_id": config.entity_id, "tag": config.tag }),
          created_entity: None,
          effect: StepEffect::EntityUpdated,
        }))
      }
      StepAction::AssignUser(config) => {
        let config: trellis_workflow::AssignUserConfig = resolved(config, context)?;
        self
          .collaborators
          .entities
          .assign_user(&config.entity_type, &config.entity_id, &config.user_id)
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output: json!({ "entity_id": config.entity_id, "user_id": config.user_id }),
          created_entity: None,
          effect: StepEffect::EntityUpdated,
        }))
      }
      StepAction::Webhook(config) => {
        let config: trellis_workflow::WebhookConfig = resolved(config, context)?;
        let output = self
          .collaborators
          .webhooks
          .call(&config.url, &config.method, &config.headers, config.body.as_ref())
          .await?;
        Ok(StepOutcome::Output(StepOutput {
          output,
          created_entity: None,
          effect: StepEffect::WebhookCalled,
        }))
      }
      StepAction::Wait(config) => Ok(StepOutcome::Wait(Duration::from_millis(config.duration_ms))),
      StepAction::Condition(config) => {
        let matched = conditions::evaluate(&config.conditions, context);
        let target = if matched {
          config.then_step.clone()
        } else {
          config.else_step.clone()
        };
        Ok(StepOutcome::Branch { matched, target })
      }
    }
  }

  async fn create(
    &self,
    kind: EntityKind,
    config: &trellis_workflow::CreateEntityConfig,
    context: &ExecutionContext,
  ) -> Result<StepOutcome, CollaboratorError> {
    let config: trellis_workflow::CreateEntityConfig = resolved(config, context)?;
    let entity = self.collaborators.entities.create_entity(kind, &config.fields).await?;
    Ok(StepOutcome::Output(StepOutput {
      output: json!({ "id": entity.id, "entity_type": entity.entity_type }),
      created_entity: Some(entity),
      effect: StepEffect::EntityCreated,
    }))
  }
}

/// Round-trip a typed config through JSON to substitute placeholders.
fn resolved<T>(config: &T, context: &ExecutionContext) -> Result<T, CollaboratorError>
where
  T: Serialize + DeserializeOwned,
{
  let raw = serde_json::to_value(config)
    .map_err(|e| CollaboratorError::Validation(format!("config serialization failed: {e}")))?;
  let substituted = context.resolve_placeholders(&raw);
  serde_json::from_value(substituted).map_err(|e| {
    CollaboratorError::Validation(format!("config invalid after placeholder resolution: {e}"))
  })
}
