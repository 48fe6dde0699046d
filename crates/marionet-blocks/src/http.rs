//! HTTP request block.

use std::collections::HashMap;
use std::time::Duration;

use marionet_config::BlockDef;
use marionet_context::RunContext;
use serde_json::Value;
use tracing::info;

use crate::error::BlockError;
use crate::execute::{BlockContext, Collaborators};
use crate::outcome::BlockOutcome;
use crate::params::snapshot_for_templates;

const DEFAULT_TIMEOUT_S: u64 = 30;

/// Render the request parts, substitute secrets at send time, and issue
/// the call. Any response is a completed block; callers branch on the
/// recorded `status_code`. Only transport failures fail the block.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute_http_request(
  block: &BlockDef,
  method: &str,
  url: &str,
  headers: &HashMap<String, String>,
  body: Option<&Value>,
  timeout_s: Option<u64>,
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let snapshot = snapshot_for_templates(context);

  let rendered_method = block_ctx.renderer.render_string(method, &snapshot)?;
  let rendered_url = block_ctx.renderer.render_string(url, &snapshot)?;

  let parsed_method = reqwest::Method::from_bytes(rendered_method.to_ascii_uppercase().as_bytes())
    .map_err(|_| BlockError::Http {
      message: format!("invalid http method '{}'", rendered_method),
    })?;

  // Secrets are substituted here, into the outgoing request only. The
  // rendered-but-redacted strings are what gets logged and persisted.
  let mut request = collab
    .http
    .request(parsed_method, context.resolve_secrets(&rendered_url))
    .timeout(Duration::from_secs(timeout_s.unwrap_or(DEFAULT_TIMEOUT_S)));

  for (name, value) in headers {
    let rendered = block_ctx.renderer.render_string(value, &snapshot)?;
    request = request.header(name.as_str(), context.resolve_secrets(&rendered));
  }

  if let Some(body) = body {
    let rendered = render_body(body, &snapshot, context, block_ctx)?;
    request = request.json(&rendered);
  }

  info!(
    run_id = %block_ctx.run_id,
    label = %block.label,
    url = %rendered_url,
    "http_request"
  );

  let response = request.send().await.map_err(|e| BlockError::Http {
    message: e.to_string(),
  })?;

  let status_code = response.status().as_u16();
  let text = response.text().await.map_err(|e| BlockError::Http {
    message: e.to_string(),
  })?;

  // Keep the body structured when it parses as JSON.
  let body_value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

  Ok(BlockOutcome::completed(
    block.output_key(),
    serde_json::json!({
      "status_code": status_code,
      "body": body_value,
    }),
  ))
}

/// Render string leaves of the body as templates, resolving secrets into
/// the result.
fn render_body(
  body: &Value,
  snapshot: &Value,
  context: &RunContext,
  block_ctx: &BlockContext<'_>,
) -> Result<Value, BlockError> {
  Ok(match body {
    Value::String(s) => {
      let rendered = block_ctx.renderer.render(s, snapshot)?;
      match rendered {
        Value::String(s) => Value::String(context.resolve_secrets(&s)),
        other => other,
      }
    }
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| render_body(item, snapshot, context, block_ctx))
        .collect::<Result<_, _>>()?,
    ),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| Ok((k.clone(), render_body(v, snapshot, context, block_ctx)?)))
        .collect::<Result<_, BlockError>>()?,
    ),
    other => other.clone(),
  })
}
