use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use marionet_blocks::{
  Agent, BlockError, Collaborators, LlmClient, StepOutcome, StepRequest, StepStatus,
};
use marionet_config::{ParameterDef, WorkflowDefinition};
use marionet_context::ContextRegistry;
use marionet_engine::{ExecutionEngine, RunRequest};
use marionet_store::MemoryStore;
use marionet_vault::{Credential, CredentialItem, CredentialRepository, MemoryRepository, MemoryVault, VaultClient};
use marionet_workflow::validate_definition;

/// Marionet - a workflow engine for LLM-driven browser automation
#[derive(Parser)]
#[command(name = "marionet")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow definition and print its graph
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow against a dry-run agent that logs goals and succeeds
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Workflow parameter, repeatable (key=value; value parsed as JSON
    /// when possible)
    #[arg(long = "param")]
    params: Vec<String>,

    /// Webhook URL to deliver the terminal status to
    #[arg(long)]
    webhook_url: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Validate { workflow_file } => validate(workflow_file).await,
    Commands::Run {
      workflow_file,
      params,
      webhook_url,
    } => run(workflow_file, params, webhook_url).await,
  }
}

async fn load_definition(workflow_file: &PathBuf) -> Result<WorkflowDefinition> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

async fn validate(workflow_file: PathBuf) -> Result<()> {
  let definition = load_definition(&workflow_file).await?;
  let graph = validate_definition(&definition).context("workflow definition is invalid")?;

  println!("workflow: {} ({})", definition.title, definition.workflow_id);
  println!("root: {}", graph.start_label);
  for label in &graph.order {
    let next = graph
      .default_next
      .get(label)
      .cloned()
      .flatten()
      .unwrap_or_else(|| "<end>".to_string());
    match graph.conditional_scope.get(label) {
      Some(owner) => println!("  {} -> {}  [branch of {}]", label, next, owner),
      None => println!("  {} -> {}", label, next),
    }
  }
  if let Some(finally) = &definition.finally_block_label {
    println!("finally: {}", finally);
  }
  Ok(())
}

async fn run(
  workflow_file: PathBuf,
  params: Vec<String>,
  webhook_url: Option<String>,
) -> Result<()> {
  let definition = load_definition(&workflow_file).await?;
  let inputs = parse_params(&params)?;

  let vault = Arc::new(MemoryVault::new());
  let credentials = Arc::new(MemoryRepository::new());
  seed_dry_run_secrets(&definition, &vault, &credentials).await?;

  let engine = ExecutionEngine::new(
    Collaborators {
      agent: Arc::new(DryRunAgent),
      llm: Arc::new(DryRunLlm),
      mailer: None,
      cache: None,
      http: reqwest::Client::new(),
    },
    vault,
    credentials,
    Arc::new(MemoryStore::new()),
    Arc::new(ContextRegistry::new()),
  );

  let cancel = CancellationToken::new();
  let ctrl_c_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      ctrl_c_cancel.cancel();
    }
  });

  let outcome = engine
    .run(
      &definition,
      RunRequest {
        run_id: format!("run_{}", uuid::Uuid::new_v4()),
        organization_id: "local".to_string(),
        inputs,
        webhook_url,
        parent_run_id: None,
        cancel,
      },
    )
    .await
    .context("run failed with an infrastructure error")?;

  println!("status: {:?}", outcome.status);
  if let Some(reason) = &outcome.failure_reason {
    println!("reason: {}", reason);
  }
  println!("{}", serde_json::to_string_pretty(&outcome.outputs)?);
  Ok(())
}

/// Agent that logs every goal and reports success, for local workflow
/// debugging without a browser.
struct DryRunAgent;

#[async_trait]
impl Agent for DryRunAgent {
  async fn execute_step(&self, request: StepRequest) -> Result<StepOutcome, BlockError> {
    info!(
      run_id = %request.run_id,
      url = request.url.as_deref().unwrap_or("<none>"),
      goal = %request.goal,
      "dry-run task"
    );
    Ok(StepOutcome {
      status: StepStatus::Completed,
      output: serde_json::json!({ "dry_run": true }),
      failure_reason: None,
    })
  }

  async fn goto_url(&self, run_id: &str, url: &str) -> Result<(), BlockError> {
    info!(run_id = %run_id, url = %url, "dry-run navigation");
    Ok(())
  }

  async fn read_page_text(&self, _run_id: &str) -> Result<String, BlockError> {
    Ok(String::new())
  }

  async fn replay_actions(
    &self,
    request: StepRequest,
    _actions: Vec<serde_json::Value>,
  ) -> Result<StepOutcome, BlockError> {
    self.execute_step(request).await
  }

  async fn cleanup(&self, run_id: &str) {
    info!(run_id = %run_id, "dry-run cleanup");
  }
}

/// LLM stand-in: logs prompts and answers with an empty object, so
/// conditional prompt branches fall through to their defaults.
struct DryRunLlm;

#[async_trait]
impl LlmClient for DryRunLlm {
  async fn handler(
    &self,
    prompt: &str,
    prompt_name: &str,
    _force_dict: bool,
  ) -> Result<serde_json::Value, BlockError> {
    info!(prompt_name = %prompt_name, chars = prompt.len(), "dry-run prompt");
    Ok(serde_json::json!({}))
  }
}

fn parse_params(params: &[String]) -> Result<HashMap<String, serde_json::Value>> {
  let mut inputs = HashMap::new();
  for param in params {
    let (key, value) = param
      .split_once('=')
      .with_context(|| format!("invalid --param '{}', expected key=value", param))?;
    let value = serde_json::from_str(value)
      .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    inputs.insert(key.to_string(), value);
  }
  Ok(inputs)
}

/// Seed placeholder vault entries for every secret-backed parameter so
/// dry runs exercise the full redaction path without a real vault.
async fn seed_dry_run_secrets(
  definition: &WorkflowDefinition,
  vault: &Arc<MemoryVault>,
  credentials: &Arc<MemoryRepository>,
) -> Result<()> {
  for param in &definition.parameters {
    match param {
      ParameterDef::Credential { credential_id, .. } => {
        let item = CredentialItem::Password {
          username: "dry-run-user".to_string(),
          password: "dry-run-password".to_string(),
          totp: None,
        };
        let item_id = vault.create_item("local", credential_id, &item).await?;
        credentials
          .insert(&Credential {
            credential_id: credential_id.clone(),
            organization_id: "local".to_string(),
            name: credential_id.clone(),
            item_id,
            credential_type: item.credential_type(),
          })
          .await?;
      }
      ParameterDef::AwsSecret { secret_name, .. } => {
        // Secrets-manager entries are looked up by name, not by a
        // generated item id.
        vault.insert_named(
          secret_name,
          CredentialItem::Secret {
            value: "dry-run-secret".to_string(),
          },
        );
      }
      _ => {}
    }
  }
  Ok(())
}
