use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use trellis_engine::{ChannelNotifier, Engine, ExecutionEvent};
use trellis_store::{SqliteStore, Store, StoreError};
use trellis_workflow::{TriggerType, WorkflowDefinition, WorkflowStatus};

mod dry_run;

use dry_run::DryRunCollaborators;

/// Trellis - a trigger-driven workflow automation engine
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trellis)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow definition file without running it
  Validate {
    /// Path to the definition file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow definition against one trigger event
  ///
  /// The event payload is read from stdin as JSON; external actions are
  /// executed by dry-run collaborators that log instead of calling out.
  Run {
    /// Path to the definition file (JSON)
    workflow_file: PathBuf,

    /// Trigger type to submit (default: the definition's own trigger)
    #[arg(long)]
    event: Option<TriggerType>,
  },

  /// Show recent executions of a workflow, newest first
  History {
    workflow_id: String,

    #[arg(long, default_value_t = 20)]
    limit: u32,
  },

  /// Show a workflow's roll-up statistics
  Stats { workflow_id: String },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".trellis")
  });

  match cli.command {
    Some(Commands::Validate { workflow_file }) => {
      validate(workflow_file)?;
    }
    Some(Commands::Run {
      workflow_file,
      event,
    }) => {
      run(workflow_file, event, data_dir)?;
    }
    Some(Commands::History { workflow_id, limit }) => {
      history(workflow_id, limit, data_dir)?;
    }
    Some(Commands::Stats { workflow_id }) => {
      stats(workflow_id, data_dir)?;
    }
    None => {
      println!("trellis - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_definition(workflow_file: &PathBuf) -> Result<WorkflowDefinition> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

fn validate(workflow_file: PathBuf) -> Result<()> {
  let definition = load_definition(&workflow_file)?;
  definition
    .validate()
    .with_context(|| format!("definition '{}' is invalid", definition.name))?;

  eprintln!("Definition '{}' is valid", definition.name);
  eprintln!("  trigger: {}", definition.trigger.trigger_type);
  eprintln!(
    "  steps: {} ({} enabled)",
    definition.steps.len(),
    definition.steps.iter().filter(|s| s.enabled).count()
  );
  eprintln!("  conditions: {}", definition.conditions.len());
  Ok(())
}

fn run(workflow_file: PathBuf, event: Option<TriggerType>, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_async(workflow_file, event, data_dir).await })
}

async fn run_async(
  workflow_file: PathBuf,
  event: Option<TriggerType>,
  data_dir: PathBuf,
) -> Result<()> {
  let mut definition = load_definition(&workflow_file)?;
  eprintln!("Loaded workflow: {}", definition.name);

  if definition.status != WorkflowStatus::Active {
    definition
      .activate()
      .with_context(|| format!("could not activate workflow '{}'", definition.name))?;
  }

  let payload = read_payload_from_stdin()?;
  let event_type = event.unwrap_or(definition.trigger.trigger_type);

  let store = open_store(&data_dir).await?;
  sync_definition(store.as_ref(), &mut definition).await?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = Engine::with_notifier(
    store.clone(),
    DryRunCollaborators::collaborators(),
    Arc::new(ChannelNotifier::new(tx)),
  );

  let execution_ids = engine
    .submit_event(event_type, payload, &definition.workspace_id)
    .await
    .context("event submission failed")?;

  if execution_ids.is_empty() {
    bail!(
      "no active workflow matched a '{event_type}' event in workspace '{}'",
      definition.workspace_id
    );
  }
  eprintln!("Started {} execution(s)", execution_ids.len());

  let mut remaining = execution_ids.len();
  while remaining > 0 {
    let Some(event) = rx.recv().await else { break };
    report_event(&event);
    if event.is_terminal() {
      remaining -= 1;
    }
  }

  for execution_id in &execution_ids {
    let execution = engine.get_execution(execution_id).await?;
    println!("{}", serde_json::to_string_pretty(&execution)?);
  }

  Ok(())
}

fn report_event(event: &ExecutionEvent) {
  match event {
    ExecutionEvent::ExecutionStarted { execution_id, .. } => {
      eprintln!("[{execution_id}] started");
    }
    ExecutionEvent::StepStarted { step_id, .. } => {
      eprintln!("  step '{step_id}' running");
    }
    ExecutionEvent::StepCompleted { step_id, .. } => {
      eprintln!("  step '{step_id}' completed");
    }
    ExecutionEvent::StepFailed { step_id, error, .. } => {
      eprintln!("  step '{step_id}' failed: {error}");
    }
    ExecutionEvent::StepSkipped { step_id, .. } => {
      eprintln!("  step '{step_id}' skipped");
    }
    ExecutionEvent::ExecutionCompleted { execution_id } => {
      eprintln!("[{execution_id}] completed");
    }
    ExecutionEvent::ExecutionFailed {
      execution_id,
      error,
    } => {
      eprintln!("[{execution_id}] failed: {error}");
    }
    ExecutionEvent::ExecutionCancelled { execution_id } => {
      eprintln!("[{execution_id}] cancelled");
    }
  }
}

fn history(workflow_id: String, limit: u32, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let store = open_store(&data_dir).await?;
    let executions = store.list_executions(&workflow_id, limit).await?;
    if executions.is_empty() {
      eprintln!("No executions recorded for workflow {workflow_id}");
      return Ok(());
    }
    for execution in &executions {
      let duration = execution
        .duration_ms
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "-".to_string());
      eprintln!(
        "{}  {:?}  steps={}  duration={}",
        execution.execution_id,
        execution.status,
        execution.steps.len(),
        duration
      );
    }
    println!("{}", serde_json::to_string_pretty(&executions)?);
    Ok(())
  })
}

fn stats(workflow_id: String, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let store = open_store(&data_dir).await?;
    let definition = store.get_workflow(&workflow_id).await?;
    eprintln!("Workflow: {} ({})", definition.name, definition.status);
    eprintln!("  executions: {}", definition.stats.total_executions);
    eprintln!("  successful: {}", definition.stats.successful_executions);
    eprintln!("  failed: {}", definition.stats.failed_executions);
    eprintln!(
      "  success rate: {:.1}%",
      definition.stats.success_rate() * 100.0
    );
    eprintln!(
      "  average duration: {:.0} ms",
      definition.stats.average_duration_ms
    );
    println!("{}", serde_json::to_string_pretty(&definition.stats)?);
    Ok(())
  })
}

/// Save a definition loaded from a file, creating it if new.
///
/// Re-running the same file replaces the stored steps/conditions, which is
/// an edit: the stored version is bumped, with the pre-edit version as the
/// optimistic-concurrency check. Accumulated stats are carried over.
async fn sync_definition(store: &dyn Store, definition: &mut WorkflowDefinition) -> Result<()> {
  match store.get_workflow(&definition.workflow_id).await {
    Ok(existing) => {
      definition.stats = existing.stats.clone();
      definition.version = existing.version + 1;
      store.update_workflow(definition, existing.version).await?;
    }
    Err(StoreError::NotFound(_)) => store.create_workflow(definition).await?,
    Err(other) => return Err(other.into()),
  }
  Ok(())
}

async fn open_store(data_dir: &PathBuf) -> Result<Arc<SqliteStore>> {
  std::fs::create_dir_all(data_dir)
    .with_context(|| format!("could not create data directory: {}", data_dir.display()))?;
  let db_path = data_dir.join("trellis.db");
  let url = format!("sqlite://{}", db_path.display());
  let store = SqliteStore::connect(&url)
    .await
    .with_context(|| format!("could not open database at {}", db_path.display()))?;
  store.migrate().await.context("database migration failed")?;
  Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_workflow::{SendNotificationConfig, Step, StepAction, Trigger, WorkflowDefinition};

  fn notify_step(id: &str, message: &str) -> Step {
    Step::new(
      id,
      "Notify",
      StepAction::SendNotification(SendNotificationConfig {
        recipients: vec!["ops".to_string()],
        message: message.to_string(),
        channel: None,
      }),
    )
  }

  #[tokio::test]
  async fn test_sync_definition_bumps_version_on_resave() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.migrate().await.unwrap();

    let mut definition =
      WorkflowDefinition::new("ws-1", "From file", Trigger::new(TriggerType::DealWon));
    definition.steps = vec![notify_step("notify", "first")];
    sync_definition(&store, &mut definition).await.unwrap();
    assert_eq!(definition.version, 1);

    store
      .increment_stats(&definition.workflow_id, true, 120, chrono::Utc::now())
      .await
      .unwrap();

    // Editing the file and re-running is an edit of the stored definition.
    definition.steps = vec![notify_step("notify", "second")];
    sync_definition(&store, &mut definition).await.unwrap();
    assert_eq!(definition.version, 2);
    assert_eq!(definition.stats.total_executions, 1);

    let stored = store.get_workflow(&definition.workflow_id).await.unwrap();
    assert_eq!(stored.version, 2);
    match &stored.steps[0].action {
      StepAction::SendNotification(config) => assert_eq!(config.message, "second"),
      other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(stored.stats.total_executions, 1);
  }
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
