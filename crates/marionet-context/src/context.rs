use std::collections::HashMap;

use marionet_config::ParameterDef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContextError;

/// Sentinel stored as the "real value" of a TOTP field.
///
/// TOTP codes expire within seconds, so they cannot be cached as static
/// secrets; a consumer that resolves an opaque id to this sentinel must
/// fetch a fresh code at point of use instead.
pub const TOTP_FETCH_SENTINEL: &str = "totp:fetch-fresh";

/// Per-block debug metadata recorded during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch_taken: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rendered_criteria: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub llm_trace: Option<Value>,
  #[serde(default)]
  pub retries: u32,
}

/// One field of a secret-backed parameter.
#[derive(Debug, Clone)]
pub struct SecretField {
  pub name: String,
  pub value: SecretValue,
}

/// The real value behind an opaque id.
#[derive(Debug, Clone)]
pub enum SecretValue {
  Static(String),
  /// Resolved to [`TOTP_FETCH_SENTINEL`]; a fresh code is fetched at use.
  Totp,
}

/// The per-run mutable store.
///
/// Exclusively owned by one run: created at run start, discarded at
/// cleanup. `values` holds only template-visible data (secrets appear as
/// opaque ids); `secrets` maps opaque ids back to real values.
#[derive(Debug, Default)]
pub struct RunContext {
  values: HashMap<String, Value>,
  secrets: HashMap<String, String>,
  block_metadata: HashMap<String, BlockMetadata>,
  /// source key -> context parameter keys that mirror it.
  links: HashMap<String, Vec<String>>,
}

impl RunContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a non-secret parameter's value at run start.
  ///
  /// Credential and AWS-secret parameters go through
  /// [`RunContext::register_credential`] / [`RunContext::register_aws_secret`]
  /// once their items have been fetched from the vault.
  pub fn register_parameter_value(
    &mut self,
    param: &ParameterDef,
    run_inputs: &HashMap<String, Value>,
  ) -> Result<(), ContextError> {
    match param {
      ParameterDef::Workflow { key, default_value } => {
        let value = run_inputs
          .get(key)
          .cloned()
          .or_else(|| default_value.clone())
          .ok_or_else(|| ContextError::MissingWorkflowInput { key: key.clone() })?;
        self.set_value(key, value);
        Ok(())
      }
      ParameterDef::Context { key, source_key } => {
        self
          .links
          .entry(source_key.clone())
          .or_default()
          .push(key.clone());
        if let Some(value) = self.values.get(source_key).cloned() {
          self.set_value(key, value);
        }
        Ok(())
      }
      // Output parameters are written after their block executes.
      ParameterDef::Output { .. } => Ok(()),
      // Secret-backed kinds are registered by the engine after vault lookup.
      ParameterDef::Credential { .. } | ParameterDef::AwsSecret { .. } => Ok(()),
    }
  }

  /// Register a credential under `key`, redacting every field behind a
  /// fresh opaque id. Only the ids are template-visible.
  pub fn register_credential(&mut self, key: &str, fields: Vec<SecretField>) {
    let mut redacted = serde_json::Map::new();
    for field in fields {
      let opaque_id = format!("secret_{}_{}", uuid::Uuid::new_v4(), field.name);
      let real = match field.value {
        SecretValue::Static(v) => v,
        SecretValue::Totp => TOTP_FETCH_SENTINEL.to_string(),
      };
      self.secrets.insert(opaque_id.clone(), real);
      redacted.insert(field.name, Value::String(opaque_id));
    }
    self.set_value(key, Value::Object(redacted));
  }

  /// Register a single-valued secret (e.g. an AWS Secrets Manager entry).
  pub fn register_aws_secret(&mut self, key: &str, value: &str) {
    let opaque_id = format!("secret_{}_{}", uuid::Uuid::new_v4(), key);
    self.secrets.insert(opaque_id.clone(), value.to_string());
    self.set_value(key, Value::String(opaque_id));
  }

  /// Register a block's output so later blocks can reference it.
  pub fn register_block_output(&mut self, output_key: &str, value: Value) {
    self.set_value(output_key, value);
  }

  pub fn get_value(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  /// Set a value, propagating it to any context parameters that mirror it.
  pub fn set_value(&mut self, key: &str, value: Value) {
    if let Some(linked) = self.links.get(key).cloned() {
      for link in linked {
        // Mirrors never chain further; direct insert avoids recursion.
        self.values.insert(link, value.clone());
      }
    }
    self.values.insert(key.to_string(), value);
  }

  /// The real value behind an opaque secret id, if the id is known.
  pub fn get_original_secret_value_or_none(&self, opaque_id: &str) -> Option<&str> {
    self.secrets.get(opaque_id).map(String::as_str)
  }

  /// Substitute real secret values into `text`.
  ///
  /// This is the second resolution pass, used exclusively to perform the
  /// actual automation action or run a code block. The result must never
  /// be logged, persisted, or echoed to an LLM. TOTP ids resolve to the
  /// fetch sentinel; consumers holding a TOTP source replace it with a
  /// fresh code.
  pub fn resolve_secrets(&self, text: &str) -> String {
    let mut resolved = text.to_string();
    for (opaque_id, real) in &self.secrets {
      if resolved.contains(opaque_id.as_str()) {
        resolved = resolved.replace(opaque_id.as_str(), real);
      }
    }
    resolved
  }

  /// Whether `text` references any opaque secret id.
  pub fn contains_secret(&self, text: &str) -> bool {
    self.secrets.keys().any(|id| text.contains(id.as_str()))
  }

  /// Every opaque id referenced by `text`, with its real value.
  ///
  /// Matching is exact containment over the known ids, the same test
  /// [`RunContext::resolve_secrets`] applies, so ids embedded in arbitrary
  /// surrounding text are found.
  pub fn referenced_secrets(&self, text: &str) -> Vec<(String, String)> {
    self
      .secrets
      .iter()
      .filter(|(id, _)| text.contains(id.as_str()))
      .map(|(id, real)| (id.clone(), real.clone()))
      .collect()
  }

  /// A snapshot of template-visible values. Never includes `secrets`.
  pub fn values_snapshot(&self) -> Value {
    Value::Object(
      self
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  pub fn record_block_metadata(&mut self, label: &str, metadata: BlockMetadata) {
    self.block_metadata.insert(label.to_string(), metadata);
  }

  pub fn block_metadata(&self, label: &str) -> Option<&BlockMetadata> {
    self.block_metadata.get(label)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_workflow_parameter_input_over_default() {
    let mut ctx = RunContext::new();
    let param: ParameterDef = serde_json::from_value(json!({
      "parameter_type": "workflow",
      "key": "region",
      "default_value": "us-east-1"
    }))
    .unwrap();

    let mut inputs = HashMap::new();
    inputs.insert("region".to_string(), json!("eu-west-1"));
    ctx.register_parameter_value(&param, &inputs).unwrap();
    assert_eq!(ctx.get_value("region"), Some(&json!("eu-west-1")));

    let mut ctx = RunContext::new();
    ctx.register_parameter_value(&param, &HashMap::new()).unwrap();
    assert_eq!(ctx.get_value("region"), Some(&json!("us-east-1")));
  }

  #[test]
  fn test_workflow_parameter_missing_input() {
    let mut ctx = RunContext::new();
    let param: ParameterDef = serde_json::from_value(json!({
      "parameter_type": "workflow",
      "key": "region"
    }))
    .unwrap();

    let result = ctx.register_parameter_value(&param, &HashMap::new());
    assert!(matches!(
      result,
      Err(ContextError::MissingWorkflowInput { .. })
    ));
  }

  #[test]
  fn test_context_parameter_mirrors_later_source() {
    let mut ctx = RunContext::new();
    let param: ParameterDef = serde_json::from_value(json!({
      "parameter_type": "context",
      "key": "order_id",
      "source_key": "extract_output"
    }))
    .unwrap();
    ctx.register_parameter_value(&param, &HashMap::new()).unwrap();

    // Source arrives later as a block output.
    ctx.register_block_output("extract_output", json!({ "id": 7 }));
    assert_eq!(ctx.get_value("order_id"), Some(&json!({ "id": 7 })));
  }

  #[test]
  fn test_secret_round_trip() {
    let mut ctx = RunContext::new();
    ctx.register_credential(
      "portal",
      vec![
        SecretField {
          name: "username".to_string(),
          value: SecretValue::Static("alice@example.com".to_string()),
        },
        SecretField {
          name: "password".to_string(),
          value: SecretValue::Static("hunter2".to_string()),
        },
      ],
    );

    let stored = ctx.get_value("portal").unwrap();
    let opaque_id = stored["password"].as_str().unwrap();

    // The template-visible value is an opaque id, not the real value.
    assert_ne!(opaque_id, "hunter2");
    assert!(opaque_id.starts_with("secret_"));
    assert!(opaque_id.ends_with("_password"));

    // The original value round-trips through the secrets map.
    assert_eq!(
      ctx.get_original_secret_value_or_none(opaque_id),
      Some("hunter2")
    );
    assert_eq!(ctx.get_original_secret_value_or_none("secret_bogus"), None);
  }

  #[test]
  fn test_values_snapshot_never_contains_plaintext() {
    let mut ctx = RunContext::new();
    ctx.register_credential(
      "portal",
      vec![SecretField {
        name: "password".to_string(),
        value: SecretValue::Static("hunter2".to_string()),
      }],
    );

    let snapshot = serde_json::to_string(&ctx.values_snapshot()).unwrap();
    assert!(!snapshot.contains("hunter2"));
  }

  #[test]
  fn test_resolve_secrets_substitutes_real_values() {
    let mut ctx = RunContext::new();
    ctx.register_credential(
      "portal",
      vec![SecretField {
        name: "password".to_string(),
        value: SecretValue::Static("hunter2".to_string()),
      }],
    );
    let opaque_id = ctx.get_value("portal").unwrap()["password"]
      .as_str()
      .unwrap()
      .to_string();

    let resolved = ctx.resolve_secrets(&format!("login with {}", opaque_id));
    assert_eq!(resolved, "login with hunter2");
  }

  #[test]
  fn test_totp_resolves_to_sentinel() {
    let mut ctx = RunContext::new();
    ctx.register_credential(
      "portal",
      vec![SecretField {
        name: "totp".to_string(),
        value: SecretValue::Totp,
      }],
    );
    let opaque_id = ctx.get_value("portal").unwrap()["totp"]
      .as_str()
      .unwrap()
      .to_string();

    assert_eq!(
      ctx.get_original_secret_value_or_none(&opaque_id),
      Some(TOTP_FETCH_SENTINEL)
    );
  }

  #[test]
  fn test_aws_secret_is_opaque() {
    let mut ctx = RunContext::new();
    ctx.register_aws_secret("api_key", "sk-12345");

    let stored = ctx.get_value("api_key").unwrap().as_str().unwrap();
    assert_ne!(stored, "sk-12345");
    assert_eq!(ctx.get_original_secret_value_or_none(stored), Some("sk-12345"));
  }
}
