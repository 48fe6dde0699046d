//! Block dispatch and the agent-delegating block bodies.

use std::sync::Arc;

use marionet_config::{BlockDef, BlockType};
use marionet_context::{BlockMetadata, RunContext};
use marionet_template::TemplateRenderer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::code::execute_code;
use crate::conditional::execute_conditional;
use crate::error::BlockError;
use crate::forloop::execute_for_loop;
use crate::http::execute_http_request;
use crate::outcome::{BlockOutcome, BlockStatus};
use crate::params::{resolve_block_parameters, secret_store_for, snapshot_for_templates};
use crate::traits::{Agent, BlockCache, LlmClient, Mailer, StepOutcome, StepRequest, StepStatus};

/// Identity and services shared by every block of one run.
pub struct BlockContext<'a> {
  pub run_id: &'a str,
  pub workflow_id: &'a str,
  pub organization_id: &'a str,
  pub renderer: &'a TemplateRenderer,
  pub cancel: &'a CancellationToken,
}

/// External collaborators. Stateless across runs; browser sessions are
/// keyed by run id inside the agent.
pub struct Collaborators {
  pub agent: Arc<dyn Agent>,
  pub llm: Arc<dyn LlmClient>,
  pub mailer: Option<Arc<dyn Mailer>>,
  pub cache: Option<Arc<dyn BlockCache>>,
  pub http: reqwest::Client,
}

/// Execute one block to a terminal status.
///
/// Recoverable failures (agent task failure, template or LLM errors, code
/// exceptions) come back as a `Failed` outcome recorded on the block;
/// only infrastructure errors propagate as `Err`, since the run cannot
/// meaningfully continue past them.
pub async fn execute_block(
  block: &BlockDef,
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let output_key = block.output_key();

  if block_ctx.cancel.is_cancelled() {
    return Ok(BlockOutcome::canceled(output_key));
  }

  info!(
    run_id = %block_ctx.run_id,
    label = %block.label,
    block_type = %block.block_type.name(),
    "block_started"
  );

  let result = dispatch(block, context, block_ctx, collab).await;

  let outcome = match result {
    Ok(outcome) => outcome,
    Err(e) if e.is_infrastructure() => return Err(e),
    Err(e) => {
      warn!(
        run_id = %block_ctx.run_id,
        label = %block.label,
        error = %e,
        "block_failed"
      );
      BlockOutcome::failed(output_key.clone(), e.to_string())
    }
  };

  if outcome.is_success() {
    if let Some(value) = &outcome.output_value {
      context.register_block_output(&outcome.output_parameter_key, value.clone());
    }
    info!(
      run_id = %block_ctx.run_id,
      label = %block.label,
      output_parameter = %outcome.output_parameter_key,
      "block_completed"
    );
  }

  Ok(outcome)
}

async fn dispatch(
  block: &BlockDef,
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  match &block.block_type {
    BlockType::Task {
      url,
      goal,
      parameter_keys,
      max_retries,
      max_steps,
    }
    | BlockType::Navigation {
      url,
      goal,
      parameter_keys,
      max_retries,
      max_steps,
    } => {
      execute_agent_task(
        block,
        url.as_deref(),
        goal,
        parameter_keys,
        *max_retries,
        *max_steps,
        context,
        block_ctx,
        collab,
      )
      .await
    }

    BlockType::Extraction {
      data_extraction_goal,
      data_schema,
      parameter_keys,
    } => {
      execute_extraction(
        block,
        data_extraction_goal,
        data_schema.as_ref(),
        parameter_keys,
        context,
        block_ctx,
        collab,
      )
      .await
    }

    BlockType::TextPrompt {
      prompt,
      json_schema,
      parameter_keys,
    } => {
      execute_text_prompt(
        block,
        prompt,
        json_schema.as_ref(),
        parameter_keys,
        context,
        block_ctx,
        collab,
      )
      .await
    }

    BlockType::Code {
      code,
      parameter_keys,
    } => execute_code(block, code, parameter_keys, context).await,

    BlockType::Conditional { branches } => {
      execute_conditional(block, branches, context, block_ctx, collab).await
    }

    BlockType::ForLoop {
      loop_over_key,
      blocks,
    } => execute_for_loop(block, loop_over_key, blocks, context, block_ctx, collab).await,

    BlockType::HttpRequest {
      method,
      url,
      headers,
      body,
      timeout_s,
    } => {
      execute_http_request(
        block,
        method,
        url,
        headers,
        body.as_ref(),
        *timeout_s,
        context,
        block_ctx,
        collab,
      )
      .await
    }

    BlockType::SendEmail { to, subject, body } => {
      execute_send_email(block, to, subject, body, context, block_ctx, collab).await
    }

    BlockType::GotoUrl { url } => {
      let snapshot = snapshot_for_templates(context);
      let rendered = block_ctx.renderer.render_string(url, &snapshot)?;
      collab.agent.goto_url(block_ctx.run_id, &rendered).await?;
      Ok(BlockOutcome::completed(
        block.output_key(),
        serde_json::json!({ "url": rendered }),
      ))
    }
  }
}

/// Task and navigation blocks: a bounded retry loop where each attempt is
/// a fresh underlying agent task.
#[allow(clippy::too_many_arguments)]
async fn execute_agent_task(
  block: &BlockDef,
  url: Option<&str>,
  goal: &str,
  parameter_keys: &[String],
  max_retries: u32,
  max_steps: u32,
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let output_key = block.output_key();
  let snapshot = snapshot_for_templates(context);
  let rendered_goal = block_ctx.renderer.render_string(goal, &snapshot)?;
  let rendered_url = url
    .map(|u| block_ctx.renderer.render_string(u, &snapshot))
    .transpose()?;

  let resolved = resolve_block_parameters(context, parameter_keys)?;
  let secrets = secret_store_for(context, &resolved, &[rendered_goal.as_str()]);

  let request_template = |block_run_id: String| StepRequest {
    run_id: block_ctx.run_id.to_string(),
    block_run_id,
    organization_id: block_ctx.organization_id.to_string(),
    goal: rendered_goal.clone(),
    url: rendered_url.clone(),
    max_steps,
    parameters: serde_json::Value::Object(resolved.clone()),
    secrets: secrets.clone(),
  };

  // Cached deterministic replay takes precedence over LLM-driven
  // execution. A failed replay comes back marked from_cache so the engine
  // can invalidate the entry for continue-on-failure blocks.
  if let Some(cache) = &collab.cache {
    if let Some(actions) = cache.get(block_ctx.workflow_id, &block.label).await {
      let request = request_template(fresh_block_run_id());
      let step = collab.agent.replay_actions(request, actions).await?;
      let mut outcome = outcome_from_step(&output_key, step);
      outcome.from_cache = true;
      return Ok(outcome);
    }
  }

  let attempts = max_retries.max(1);
  let mut last_reason = None;
  for attempt in 0..attempts {
    if block_ctx.cancel.is_cancelled() {
      return Ok(BlockOutcome::canceled(output_key));
    }

    let request = request_template(fresh_block_run_id());
    let step = collab.agent.execute_step(request).await?;

    match step.status {
      StepStatus::Completed => {
        context.record_block_metadata(
          &block.label,
          BlockMetadata {
            retries: attempt,
            ..Default::default()
          },
        );
        return Ok(outcome_from_step(&output_key, step));
      }
      // Terminated and canceled are terminal: retrying cannot help.
      StepStatus::Terminated | StepStatus::Canceled => {
        return Ok(outcome_from_step(&output_key, step));
      }
      StepStatus::Failed => {
        warn!(
          run_id = %block_ctx.run_id,
          label = %block.label,
          attempt,
          reason = %step.failure_reason.as_deref().unwrap_or("unknown"),
          "task attempt failed"
        );
        last_reason = step.failure_reason;
      }
    }
  }

  context.record_block_metadata(
    &block.label,
    BlockMetadata {
      retries: attempts,
      ..Default::default()
    },
  );
  Ok(BlockOutcome::failed(
    output_key,
    format!(
      "failed after {} attempts: {}",
      attempts,
      last_reason.as_deref().unwrap_or("unknown")
    ),
  ))
}

async fn execute_extraction(
  block: &BlockDef,
  data_extraction_goal: &str,
  data_schema: Option<&serde_json::Value>,
  parameter_keys: &[String],
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let snapshot = snapshot_for_templates(context);
  let rendered_goal = block_ctx
    .renderer
    .render_string(data_extraction_goal, &snapshot)?;
  let _resolved = resolve_block_parameters(context, parameter_keys)?;

  let page_text = collab.agent.read_page_text(block_ctx.run_id).await?;

  let mut prompt = format!(
    "Extract the following from the page.\n\nGoal: {}\n\nPage text:\n{}",
    rendered_goal, page_text
  );
  if let Some(schema) = data_schema {
    prompt.push_str(&format!("\n\nAnswer as JSON matching this schema:\n{}", schema));
  }

  let response = collab.llm.handler(&prompt, "extraction", true).await?;
  Ok(BlockOutcome::completed(block.output_key(), response))
}

async fn execute_text_prompt(
  block: &BlockDef,
  prompt: &str,
  json_schema: Option<&serde_json::Value>,
  parameter_keys: &[String],
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let snapshot = snapshot_for_templates(context);
  let mut rendered = block_ctx.renderer.render_string(prompt, &snapshot)?;
  let _resolved = resolve_block_parameters(context, parameter_keys)?;

  if let Some(schema) = json_schema {
    rendered.push_str(&format!("\n\nAnswer as JSON matching this schema:\n{}", schema));
  }

  let response = collab
    .llm
    .handler(&rendered, "text_prompt", json_schema.is_some())
    .await?;
  Ok(BlockOutcome::completed(block.output_key(), response))
}

async fn execute_send_email(
  block: &BlockDef,
  to: &[String],
  subject: &str,
  body: &str,
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let mailer = collab.mailer.as_ref().ok_or(BlockError::MailerNotConfigured)?;

  let snapshot = snapshot_for_templates(context);
  let recipients: Vec<String> = to
    .iter()
    .map(|t| block_ctx.renderer.render_string(t, &snapshot))
    .collect::<Result<_, _>>()?;
  let rendered_subject = block_ctx.renderer.render_string(subject, &snapshot)?;
  // The body stays redacted: opaque ids are never substituted for email,
  // which is persisted and leaves the system.
  let rendered_body = block_ctx.renderer.render_string(body, &snapshot)?;

  mailer.send(&recipients, &rendered_subject, &rendered_body).await?;

  Ok(BlockOutcome::completed(
    block.output_key(),
    serde_json::json!({ "to": recipients, "subject": rendered_subject }),
  ))
}

pub(crate) fn fresh_block_run_id() -> String {
  format!("br_{}", uuid::Uuid::new_v4())
}

pub(crate) fn outcome_from_step(output_key: &str, step: StepOutcome) -> BlockOutcome {
  match step.status {
    StepStatus::Completed => BlockOutcome::completed(output_key, step.output),
    StepStatus::Failed => BlockOutcome {
      status: BlockStatus::Failed,
      output_parameter_key: output_key.to_string(),
      output_value: None,
      failure_reason: step.failure_reason,
      branch_taken: None,
      from_cache: false,
    },
    StepStatus::Terminated => BlockOutcome {
      status: BlockStatus::Terminated,
      output_parameter_key: output_key.to_string(),
      output_value: None,
      failure_reason: step.failure_reason,
      branch_taken: None,
      from_cache: false,
    },
    StepStatus::Canceled => BlockOutcome::canceled(output_key),
  }
}
