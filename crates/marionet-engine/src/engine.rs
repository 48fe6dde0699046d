//! The run loop: one logical thread of control per run, from parameter
//! registration through terminal status, webhook and cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use marionet_blocks::{BlockContext, BlockOutcome, BlockStatus, Collaborators, execute_block};
use marionet_config::{BlockDef, ParameterDef, WorkflowDefinition};
use marionet_context::{ContextRegistry, RunContext, SecretField, SecretValue};
use marionet_store::{BlockRunRecord, BlockRunStatus, Json, RunStatus, Store, WorkflowRunRecord};
use marionet_template::{Strictness, TemplateRenderer};
use marionet_vault::{CredentialItem, CredentialRepository, VaultClient, VaultError};
use marionet_workflow::{WorkflowGraph, validate_definition};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::webhook::deliver_webhook;

/// One run request: identity, inputs, and the caller-owned cancellation
/// token checked at every block boundary.
pub struct RunRequest {
  pub run_id: String,
  pub organization_id: String,
  pub inputs: HashMap<String, Value>,
  pub webhook_url: Option<String>,
  pub parent_run_id: Option<String>,
  pub cancel: CancellationToken,
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub run_id: String,
  pub status: RunStatus,
  pub failure_reason: Option<String>,
  /// Template-visible values at run end: block outputs and parameters,
  /// with secrets as opaque ids. Safe to deliver over the webhook.
  pub outputs: Value,
}

/// Drives workflow runs to a terminal status.
///
/// Runs are mutually independent: each owns its [`RunContext`] and browser
/// session; the engine itself holds only shared, stateless collaborators
/// and may drive any number of runs concurrently.
pub struct ExecutionEngine {
  collaborators: Collaborators,
  vault: Arc<dyn VaultClient>,
  credentials: Arc<dyn CredentialRepository>,
  store: Arc<dyn Store>,
  registry: Arc<ContextRegistry>,
}

impl ExecutionEngine {
  pub fn new(
    collaborators: Collaborators,
    vault: Arc<dyn VaultClient>,
    credentials: Arc<dyn CredentialRepository>,
    store: Arc<dyn Store>,
    registry: Arc<ContextRegistry>,
  ) -> Self {
    Self {
      collaborators,
      vault,
      credentials,
      store,
      registry,
    }
  }

  /// Run a workflow definition to a terminal status.
  ///
  /// Every exit goes through the same cleanup path: persist the terminal
  /// record, deliver the webhook (except for canceled runs), release agent
  /// resources and discard the run context. Cleanup never raises.
  #[tracing::instrument(skip_all, fields(run_id = %request.run_id, workflow_id = %definition.workflow_id))]
  pub async fn run(
    &self,
    definition: &WorkflowDefinition,
    request: RunRequest,
  ) -> Result<RunOutcome, EngineError> {
    let graph = validate_definition(definition)?;

    self
      .store
      .create_run(&WorkflowRunRecord {
        run_id: request.run_id.clone(),
        workflow_id: definition.workflow_id.clone(),
        parent_run_id: request.parent_run_id.clone(),
        status: RunStatus::Running,
        failure_reason: None,
        started_at: Utc::now(),
        completed_at: None,
      })
      .await?;

    let handle = self.registry.create(&request.run_id)?;

    info!(
      run_id = %request.run_id,
      workflow_id = %definition.workflow_id,
      "workflow_started"
    );

    let result = self
      .run_to_terminal(definition, &graph, &request, &handle)
      .await;

    let (status, failure_reason) = match &result {
      Ok((status, reason)) => (*status, reason.clone()),
      Err(e) => (RunStatus::Failed, Some(e.to_string())),
    };

    let outputs = handle.lock().await.values_snapshot();

    if let Err(e) = self
      .store
      .update_run_status(
        &request.run_id,
        status,
        failure_reason.as_deref(),
        Some(Utc::now()),
      )
      .await
    {
      error!(run_id = %request.run_id, error = %e, "failed to persist terminal run status");
    }

    // A canceled run is the one terminal status with no webhook: the
    // caller initiated the cancellation and needs no callback.
    if status != RunStatus::Canceled {
      if let Some(url) = &request.webhook_url {
        let payload = serde_json::json!({
          "run_id": request.run_id,
          "workflow_id": definition.workflow_id,
          "status": status,
          "failure_reason": failure_reason,
          "outputs": outputs,
        });
        deliver_webhook(&self.collaborators.http, url, &payload).await;
      }
    }

    self.collaborators.agent.cleanup(&request.run_id).await;
    self.registry.discard(&request.run_id);

    info!(
      run_id = %request.run_id,
      status = ?status,
      "workflow_finished"
    );

    result.map(|_| RunOutcome {
      run_id: request.run_id,
      status,
      failure_reason,
      outputs,
    })
  }

  async fn run_to_terminal(
    &self,
    definition: &WorkflowDefinition,
    graph: &WorkflowGraph,
    request: &RunRequest,
    handle: &Arc<tokio::sync::Mutex<RunContext>>,
  ) -> Result<(RunStatus, Option<String>), EngineError> {
    {
      let mut context = handle.lock().await;
      self
        .register_parameters(definition, request, &mut context)
        .await?;
    }

    let renderer = TemplateRenderer::new(Strictness::Strict);
    let block_ctx = BlockContext {
      run_id: &request.run_id,
      workflow_id: &definition.workflow_id,
      organization_id: &request.organization_id,
      renderer: &renderer,
      cancel: &request.cancel,
    };

    let mut current = Some(graph.start_label.clone());
    let mut terminal: Option<(RunStatus, Option<String>)> = None;

    while let Some(label) = current.take() {
      if request.cancel.is_cancelled() {
        info!(run_id = %request.run_id, at = %label, "run canceled");
        terminal = Some((RunStatus::Canceled, None));
        break;
      }

      let block = graph
        .get_block(&label)
        .ok_or_else(|| EngineError::MissingBlock {
          run_id: request.run_id.clone(),
          label: label.clone(),
        })?;

      let outcome = {
        let mut context = handle.lock().await;
        let outcome = execute_block(block, &mut context, &block_ctx, &self.collaborators).await?;
        self
          .record_block_run(&request.run_id, block, &outcome, &context)
          .await?;
        outcome
      };

      match outcome.status {
        BlockStatus::Completed => {
          current = match &outcome.branch_taken {
            Some(branch) => branch.next_block_label.clone(),
            None => graph.default_next.get(&label).cloned().flatten(),
          };
        }

        BlockStatus::Canceled => {
          terminal = Some((RunStatus::Canceled, None));
        }

        BlockStatus::Failed | BlockStatus::Terminated => {
          // A stale recording must not poison the next run.
          if outcome.from_cache && block.continue_on_failure {
            if let Some(cache) = &self.collaborators.cache {
              cache.invalidate(&definition.workflow_id, &label).await;
            }
          }

          if block.continue_on_failure && !graph.is_last(&label) {
            warn!(
              run_id = %request.run_id,
              label = %label,
              reason = %outcome.failure_reason.as_deref().unwrap_or("unknown"),
              "block failed, continuing"
            );
            current = graph.default_next.get(&label).cloned().flatten();
          } else {
            let status = match outcome.status {
              BlockStatus::Terminated => RunStatus::Terminated,
              _ => RunStatus::Failed,
            };
            let index = graph.block_index(&label).unwrap_or(0);
            terminal = Some((
              status,
              Some(format!(
                "block '{}' (index {}) {}: {}",
                label,
                index,
                match status {
                  RunStatus::Terminated => "terminated",
                  _ => "failed",
                },
                outcome.failure_reason.as_deref().unwrap_or("unknown")
              )),
            ));
          }
        }
      }
    }

    let (status, failure_reason) = terminal.unwrap_or((RunStatus::Completed, None));

    let (status, failure_reason) = self
      .run_finally_block(definition, request, handle, &renderer, status, failure_reason)
      .await?;

    Ok((status, failure_reason))
  }

  /// The finally block runs after the main chain regardless of outcome,
  /// including cancellation, so it gets its own never-canceled token.
  async fn run_finally_block(
    &self,
    definition: &WorkflowDefinition,
    request: &RunRequest,
    handle: &Arc<tokio::sync::Mutex<RunContext>>,
    renderer: &TemplateRenderer,
    status: RunStatus,
    failure_reason: Option<String>,
  ) -> Result<(RunStatus, Option<String>), EngineError> {
    let Some(finally_label) = &definition.finally_block_label else {
      return Ok((status, failure_reason));
    };
    // The graph strips the finally block; look it up in the definition.
    let Some(block) = definition.blocks.iter().find(|b| &b.label == finally_label) else {
      return Ok((status, failure_reason));
    };

    let finally_cancel = CancellationToken::new();
    let block_ctx = BlockContext {
      run_id: &request.run_id,
      workflow_id: &definition.workflow_id,
      organization_id: &request.organization_id,
      renderer,
      cancel: &finally_cancel,
    };

    let outcome = {
      let mut context = handle.lock().await;
      let outcome = execute_block(block, &mut context, &block_ctx, &self.collaborators).await?;
      self
        .record_block_run(&request.run_id, block, &outcome, &context)
        .await?;
      outcome
    };

    if outcome.is_success() || status != RunStatus::Completed {
      // A failing finally block only changes the status of an otherwise
      // successful run; it never masks an earlier failure.
      if !outcome.is_success() {
        warn!(
          run_id = %request.run_id,
          label = %finally_label,
          reason = %outcome.failure_reason.as_deref().unwrap_or("unknown"),
          "finally block failed after unsuccessful run"
        );
      }
      return Ok((status, failure_reason));
    }

    Ok((
      RunStatus::Failed,
      Some(format!(
        "finally block '{}' failed: {}",
        finally_label,
        outcome.failure_reason.as_deref().unwrap_or("unknown")
      )),
    ))
  }

  /// Register every declared parameter before the first block executes.
  ///
  /// Secret-backed parameters are fetched from the vault here; a missing
  /// credential or vault failure is a fatal setup error.
  async fn register_parameters(
    &self,
    definition: &WorkflowDefinition,
    request: &RunRequest,
    context: &mut RunContext,
  ) -> Result<(), EngineError> {
    for param in &definition.parameters {
      match param {
        ParameterDef::Credential { key, credential_id } => {
          let credential = self.credentials.get(credential_id).await?;
          let item = self.vault.get_item(&credential.item_id).await?;
          let fields = item
            .fields()
            .into_iter()
            .map(|(name, value, is_totp)| SecretField {
              name: name.to_string(),
              value: if is_totp {
                SecretValue::Totp
              } else {
                SecretValue::Static(value)
              },
            })
            .collect();
          context.register_credential(key, fields);
        }

        ParameterDef::AwsSecret { key, secret_name } => {
          let item = self.vault.get_item(secret_name).await?;
          let CredentialItem::Secret { value } = item else {
            return Err(
              VaultError::Misconfigured {
                message: format!("secret '{}' is not a single-valued secret", secret_name),
              }
              .into(),
            );
          };
          context.register_aws_secret(key, &value);
        }

        other => context.register_parameter_value(other, &request.inputs)?,
      }
    }
    Ok(())
  }

  async fn record_block_run(
    &self,
    run_id: &str,
    block: &BlockDef,
    outcome: &BlockOutcome,
    context: &RunContext,
  ) -> Result<(), EngineError> {
    let retry = context
      .block_metadata(&block.label)
      .map(|m| m.retries as i32)
      .unwrap_or(0);

    self
      .store
      .create_block_run(&BlockRunRecord {
        block_run_id: format!("br_{}", uuid::Uuid::new_v4()),
        run_id: run_id.to_string(),
        label: block.label.clone(),
        retry,
        status: match outcome.status {
          BlockStatus::Completed => BlockRunStatus::Completed,
          BlockStatus::Failed => BlockRunStatus::Failed,
          BlockStatus::Terminated => BlockRunStatus::Terminated,
          BlockStatus::Canceled => BlockRunStatus::Canceled,
        },
        output: outcome.output_value.clone().map(Json),
        failure_reason: outcome.failure_reason.clone(),
        branch_taken: outcome
          .branch_taken
          .as_ref()
          .and_then(|b| b.next_block_label.clone()),
        created_at: Utc::now(),
      })
      .await?;
    Ok(())
  }
}
