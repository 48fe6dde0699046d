//! For-loop block: sequential iteration of an inner block chain.

use marionet_config::BlockDef;
use marionet_context::RunContext;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::BlockError;
use crate::execute::{execute_block, BlockContext, Collaborators};
use crate::outcome::{BlockOutcome, BlockStatus};

/// Execute the inner chain once per element of the loop value.
///
/// Iterations run strictly in sequence. Within each iteration the run
/// context exposes `current_value` and `current_index`; the loop output is
/// one entry per iteration carrying the last inner block's output.
pub(crate) async fn execute_for_loop(
  block: &BlockDef,
  loop_over_key: &str,
  inner_blocks: &[BlockDef],
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let output_key = block.output_key();

  let loop_values = resolve_loop_values(context, loop_over_key)?;
  if loop_values.is_empty() {
    info!(
      run_id = %block_ctx.run_id,
      label = %block.label,
      "loop value is empty, skipping"
    );
    return Ok(BlockOutcome::completed(output_key, Value::Array(Vec::new())));
  }

  let total = loop_values.len();
  let mut iteration_outputs = Vec::with_capacity(total);

  for (index, loop_value) in loop_values.into_iter().enumerate() {
    if block_ctx.cancel.is_cancelled() {
      return Ok(BlockOutcome::canceled(output_key));
    }

    info!(
      run_id = %block_ctx.run_id,
      label = %block.label,
      iteration = index,
      total,
      "loop_iteration_started"
    );

    context.set_value("current_value", loop_value.clone());
    context.set_value("current_index", Value::from(index));

    let mut last_inner: Option<BlockOutcome> = None;
    for inner in inner_blocks {
      if block_ctx.cancel.is_cancelled() {
        return Ok(BlockOutcome::canceled(output_key));
      }

      // Inner blocks recurse through the dispatcher; boxing breaks the
      // infinitely-sized future.
      let outcome = Box::pin(execute_block(inner, context, block_ctx, collab)).await?;

      match outcome.status {
        BlockStatus::Completed => {
          last_inner = Some(outcome);
        }
        BlockStatus::Failed | BlockStatus::Terminated if inner.continue_on_failure => {
          warn!(
            run_id = %block_ctx.run_id,
            label = %inner.label,
            iteration = index,
            reason = %outcome.failure_reason.as_deref().unwrap_or("unknown"),
            "inner block failed, continuing"
          );
          last_inner = Some(outcome);
        }
        BlockStatus::Failed | BlockStatus::Terminated => {
          return Ok(BlockOutcome::failed(
            output_key,
            format!(
              "iteration {} failed at block '{}': {}",
              index,
              inner.label,
              outcome.failure_reason.as_deref().unwrap_or("unknown")
            ),
          ));
        }
        BlockStatus::Canceled => {
          return Ok(BlockOutcome::canceled(output_key));
        }
      }
    }

    iteration_outputs.push(match last_inner {
      Some(outcome) => serde_json::json!({
        "loop_value": loop_value,
        "output_parameter": outcome.output_parameter_key,
        "output_value": outcome.output_value,
      }),
      None => serde_json::json!({
        "loop_value": loop_value,
        "output_parameter": Value::Null,
        "output_value": Value::Null,
      }),
    });
  }

  Ok(BlockOutcome::completed(
    output_key,
    Value::Array(iteration_outputs),
  ))
}

/// The loop value must resolve to a list; a single non-list value is
/// treated as a one-element list so an upstream extraction returning a
/// scalar still iterates once.
fn resolve_loop_values(context: &RunContext, key: &str) -> Result<Vec<Value>, BlockError> {
  let value = context
    .get_value(key)
    .cloned()
    .ok_or_else(|| BlockError::MissingParameter { key: key.to_string() })?;

  Ok(match value {
    Value::Array(items) => items,
    Value::Null => Vec::new(),
    other => vec![other],
  })
}
