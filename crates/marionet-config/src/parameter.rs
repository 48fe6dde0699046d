use serde::{Deserialize, Serialize};

/// A workflow parameter definition.
///
/// Parameters are a tagged union: each kind resolves differently at run
/// start (see `marionet-context`). Output parameters are written after
/// their block executes; all other kinds are resolved before the first
/// block runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parameter_type", rename_all = "snake_case")]
pub enum ParameterDef {
  /// User-supplied input with an optional default.
  Workflow {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_value: Option<serde_json::Value>,
  },

  /// Derives its value from another parameter during the run.
  Context { key: String, source_key: String },

  /// Written after the owning block executes. One per block.
  Output { key: String },

  /// Backed by a credential in the configured vault. The real values are
  /// redacted behind opaque ids in all template-visible contexts.
  Credential { key: String, credential_id: String },

  /// Backed by a secrets-manager entry, redacted the same way.
  AwsSecret { key: String, secret_name: String },
}

impl ParameterDef {
  /// The key this parameter is registered under in the run context.
  pub fn key(&self) -> &str {
    match self {
      ParameterDef::Workflow { key, .. }
      | ParameterDef::Context { key, .. }
      | ParameterDef::Output { key }
      | ParameterDef::Credential { key, .. }
      | ParameterDef::AwsSecret { key, .. } => key,
    }
  }

  /// Whether this parameter is secret-backed (vault or secrets manager).
  pub fn is_secret(&self) -> bool {
    matches!(
      self,
      ParameterDef::Credential { .. } | ParameterDef::AwsSecret { .. }
    )
  }
}
