use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of one block execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
  Completed,
  Failed,
  Terminated,
  Canceled,
}

/// The branch a conditional block selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTaken {
  pub order: u32,
  /// Advance target; `None` ends the main chain.
  pub next_block_label: Option<String>,
}

/// Result of executing one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockOutcome {
  pub status: BlockStatus,
  /// Key the output value was registered under.
  pub output_parameter_key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_value: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_reason: Option<String>,
  /// Set by conditional blocks; the engine advances to this target instead
  /// of the default edge.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch_taken: Option<BranchTaken>,
  /// Whether this execution was a cached deterministic replay. A failed
  /// cached replay of a continue-on-failure block invalidates the entry.
  #[serde(default)]
  pub from_cache: bool,
}

impl BlockOutcome {
  pub fn completed(output_parameter_key: impl Into<String>, output_value: Value) -> Self {
    Self {
      status: BlockStatus::Completed,
      output_parameter_key: output_parameter_key.into(),
      output_value: Some(output_value),
      failure_reason: None,
      branch_taken: None,
      from_cache: false,
    }
  }

  pub fn failed(output_parameter_key: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      status: BlockStatus::Failed,
      output_parameter_key: output_parameter_key.into(),
      output_value: None,
      failure_reason: Some(reason.into()),
      branch_taken: None,
      from_cache: false,
    }
  }

  pub fn terminated(output_parameter_key: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      status: BlockStatus::Terminated,
      output_parameter_key: output_parameter_key.into(),
      output_value: None,
      failure_reason: Some(reason.into()),
      branch_taken: None,
      from_cache: false,
    }
  }

  pub fn canceled(output_parameter_key: impl Into<String>) -> Self {
    Self {
      status: BlockStatus::Canceled,
      output_parameter_key: output_parameter_key.into(),
      output_value: None,
      failure_reason: None,
      branch_taken: None,
      from_cache: false,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == BlockStatus::Completed
  }
}
