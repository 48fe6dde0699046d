//! Shared parameter resolution helpers.
//!
//! Every block resolves its declared parameters the same way: take a
//! snapshot of the run context values (opaque secret ids, never plaintext),
//! select the declared keys, and hand the result to the block body. Blocks
//! that perform real actions additionally receive a [`SecretStore`] built
//! from the ids referenced by their resolved parameters.

use std::collections::HashMap;

use marionet_context::RunContext;
use serde_json::Value;

use crate::error::BlockError;
use crate::traits::SecretStore;

/// Template-visible snapshot of the run context.
pub fn snapshot_for_templates(context: &RunContext) -> Value {
  context.values_snapshot()
}

/// Resolve a block's declared parameters from the run context.
///
/// The returned map carries opaque secret ids where parameters are
/// secret-backed; it is safe to render into LLM-visible text.
pub fn resolve_block_parameters(
  context: &RunContext,
  parameter_keys: &[String],
) -> Result<serde_json::Map<String, Value>, BlockError> {
  let mut resolved = serde_json::Map::new();
  for key in parameter_keys {
    let value = context
      .get_value(key)
      .cloned()
      .ok_or_else(|| BlockError::MissingParameter { key: key.clone() })?;
    resolved.insert(key.clone(), value);
  }
  Ok(resolved)
}

/// Build the point-of-use secret store for a block: every opaque id
/// referenced by the resolved parameters or the rendered goal, paired with
/// its real value.
pub fn secret_store_for(
  context: &RunContext,
  resolved: &serde_json::Map<String, Value>,
  rendered_texts: &[&str],
) -> SecretStore {
  let mut secrets = HashMap::new();

  // Exact containment over the context's known ids, never text parsing:
  // an id rendered mid-sentence carries whatever punctuation the template
  // put around it.
  let mut collect = |text: &str| {
    for (id, real) in context.referenced_secrets(text) {
      secrets.insert(id, real);
    }
  };

  for value in resolved.values() {
    collect_from_value(value, &mut collect);
  }
  for text in rendered_texts {
    collect(text);
  }

  SecretStore::new(secrets)
}

fn collect_from_value(value: &Value, collect: &mut impl FnMut(&str)) {
  match value {
    Value::String(s) => collect(s),
    Value::Array(items) => {
      for item in items {
        collect_from_value(item, collect);
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_from_value(item, collect);
      }
    }
    _ => {}
  }
}
