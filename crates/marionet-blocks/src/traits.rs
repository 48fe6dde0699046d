use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BlockError;

/// Terminal status the agent reports for one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
  Completed,
  Failed,
  Terminated,
  Canceled,
}

/// Result of one agent task attempt.
#[derive(Debug, Clone)]
pub struct StepOutcome {
  pub status: StepStatus,
  pub output: Value,
  pub failure_reason: Option<String>,
}

/// Opaque-id to real-value map handed to the agent for point-of-use
/// substitution.
///
/// Debug output is redacted so the store can never leak through logging
/// or error formatting.
#[derive(Clone, Default)]
pub struct SecretStore {
  secrets: HashMap<String, String>,
}

impl SecretStore {
  pub fn new(secrets: HashMap<String, String>) -> Self {
    Self { secrets }
  }

  /// The real value behind an opaque id, if known.
  pub fn get(&self, opaque_id: &str) -> Option<&str> {
    self.secrets.get(opaque_id).map(String::as_str)
  }

  /// Whether the id resolves to the TOTP fetch sentinel: a fresh code must
  /// be fetched at use instead of substituting a cached value.
  pub fn is_totp(&self, opaque_id: &str) -> bool {
    self.get(opaque_id) == Some(marionet_context::TOTP_FETCH_SENTINEL)
  }

  pub fn is_empty(&self) -> bool {
    self.secrets.is_empty()
  }
}

impl fmt::Debug for SecretStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SecretStore(<redacted, {} entries>)", self.secrets.len())
  }
}

/// One agent task attempt. The goal and navigation payload carry only
/// opaque secret ids; the agent substitutes real values from `secrets` at
/// the moment it types into the page, never earlier.
#[derive(Debug, Clone)]
pub struct StepRequest {
  pub run_id: String,
  pub block_run_id: String,
  pub organization_id: String,
  pub goal: String,
  pub url: Option<String>,
  pub max_steps: u32,
  pub parameters: Value,
  pub secrets: SecretStore,
}

/// The browser-automation collaborator.
///
/// A browser session is exclusive to one run; implementations key sessions
/// by `run_id` and must never share them across concurrent runs.
#[async_trait]
pub trait Agent: Send + Sync {
  /// Run one task attempt to a terminal status.
  async fn execute_step(&self, request: StepRequest) -> Result<StepOutcome, BlockError>;

  /// Navigate the run's browser session directly.
  async fn goto_url(&self, run_id: &str, url: &str) -> Result<(), BlockError>;

  /// Visible text of the run's current page, for page-aware branch
  /// criteria and extraction.
  async fn read_page_text(&self, run_id: &str) -> Result<String, BlockError>;

  /// Replay previously recorded deterministic actions.
  async fn replay_actions(
    &self,
    request: StepRequest,
    actions: Vec<Value>,
  ) -> Result<StepOutcome, BlockError>;

  /// Release run resources (browser, video, artifacts). Never raises into
  /// the caller's cleanup path; implementations log their own failures.
  async fn cleanup(&self, run_id: &str);
}

/// The LLM collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
  /// Send a prompt, returning a structured response. `force_dict` demands
  /// a JSON object answer.
  async fn handler(
    &self,
    prompt: &str,
    prompt_name: &str,
    force_dict: bool,
  ) -> Result<Value, BlockError>;
}

/// Outbound email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
  async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), BlockError>;
}

/// Cache of deterministic action recordings, keyed per workflow block.
#[async_trait]
pub trait BlockCache: Send + Sync {
  /// Recorded actions for a block, if a previous run produced them.
  async fn get(&self, workflow_id: &str, label: &str) -> Option<Vec<Value>>;

  /// Drop a block's entry so the next run regenerates it via full
  /// LLM-driven execution.
  async fn invalidate(&self, workflow_id: &str, label: &str);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_secret_store_debug_is_redacted() {
    let mut secrets = HashMap::new();
    secrets.insert("secret_abc_password".to_string(), "hunter2".to_string());
    let store = SecretStore::new(secrets);

    let debug = format!("{:?}", store);
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("redacted"));
  }

  #[test]
  fn test_totp_sentinel_detection() {
    let mut secrets = HashMap::new();
    secrets.insert(
      "secret_abc_totp".to_string(),
      marionet_context::TOTP_FETCH_SENTINEL.to_string(),
    );
    secrets.insert("secret_abc_password".to_string(), "hunter2".to_string());
    let store = SecretStore::new(secrets);

    assert!(store.is_totp("secret_abc_totp"));
    assert!(!store.is_totp("secret_abc_password"));
  }
}
