use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single unit of work in a workflow.
///
/// Blocks are created when a definition is authored and never mutated;
/// the shared fields (label, wiring, failure policy) live here and the
/// per-type payload lives in [`BlockType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
  /// Unique label within the workflow definition.
  pub label: String,
  #[serde(flatten)]
  pub block_type: BlockType,
  /// Explicit default edge. When absent and the definition contains no
  /// conditional block, array order supplies the edge.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_block_label: Option<String>,
  /// When true, a failed or terminated block does not fail the run unless
  /// it is the last block in the DAG.
  #[serde(default)]
  pub continue_on_failure: bool,
  /// Key the block's output value is registered under. Later blocks
  /// reference it as `{{ <key> }}` or `{{ <key>.field }}`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_parameter_key: Option<String>,
}

impl BlockDef {
  /// The output key for this block, defaulting to `<label>_output`.
  pub fn output_key(&self) -> String {
    self
      .output_parameter_key
      .clone()
      .unwrap_or_else(|| format!("{}_output", self.label))
  }

  /// Branch targets, for conditional blocks. Empty otherwise.
  pub fn branch_targets(&self) -> Vec<&str> {
    match &self.block_type {
      BlockType::Conditional { branches } => branches
        .iter()
        .filter_map(|b| b.next_block_label.as_deref())
        .collect(),
      _ => Vec::new(),
    }
  }
}

/// Per-type block payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum BlockType {
  /// A full browser task driven by the agent: navigate and act until the
  /// goal is reached or `max_steps` is exhausted.
  Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    goal: String,
    #[serde(default)]
    parameter_keys: Vec<String>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_max_steps")]
    max_steps: u32,
  },

  /// Agent-driven navigation without data extraction.
  Navigation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    goal: String,
    #[serde(default)]
    parameter_keys: Vec<String>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_max_steps")]
    max_steps: u32,
  },

  /// Structured data extraction from the current page via the LLM.
  Extraction {
    data_extraction_goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_schema: Option<serde_json::Value>,
    #[serde(default)]
    parameter_keys: Vec<String>,
  },

  /// A pure LLM prompt, no browser involved.
  TextPrompt {
    prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json_schema: Option<serde_json::Value>,
    #[serde(default)]
    parameter_keys: Vec<String>,
  },

  /// User Lua code over an allow-listed binding set. The `result` global
  /// becomes the block output.
  Code {
    code: String,
    #[serde(default)]
    parameter_keys: Vec<String>,
  },

  /// Ordered branches; exactly one must be the default.
  Conditional { branches: Vec<BranchCondition> },

  /// Sequentially iterates an inner block chain over a list value.
  ForLoop {
    loop_over_key: String,
    blocks: Vec<BlockDef>,
  },

  /// An outbound HTTP call with templated method/url/headers/body.
  HttpRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_s: Option<u64>,
  },

  /// Sends an email through the configured mailer.
  SendEmail {
    to: Vec<String>,
    subject: String,
    body: String,
  },

  /// Direct navigation to a URL, no goal.
  GotoUrl { url: String },
}

impl BlockType {
  /// Stable name used in logs and persisted records.
  pub fn name(&self) -> &'static str {
    match self {
      BlockType::Task { .. } => "task",
      BlockType::Navigation { .. } => "navigation",
      BlockType::Extraction { .. } => "extraction",
      BlockType::TextPrompt { .. } => "text_prompt",
      BlockType::Code { .. } => "code",
      BlockType::Conditional { .. } => "conditional",
      BlockType::ForLoop { .. } => "for_loop",
      BlockType::HttpRequest { .. } => "http_request",
      BlockType::SendEmail { .. } => "send_email",
      BlockType::GotoUrl { .. } => "goto_url",
    }
  }
}

fn default_max_retries() -> u32 {
  3
}

fn default_max_steps() -> u32 {
  10
}

/// One branch of a conditional block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCondition {
  /// Evaluation order, ascending.
  pub order: u32,
  #[serde(flatten)]
  pub criteria: BranchCriteria,
  /// Advance target when this branch matches. `None` ends the run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_block_label: Option<String>,
  /// Exactly one branch per conditional carries this flag.
  #[serde(default)]
  pub is_default: bool,
}

/// How a branch decides whether it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "criteria_type", rename_all = "snake_case")]
pub enum BranchCriteria {
  /// A sandboxed template boolean expression, evaluated locally against a
  /// run context snapshot. No external call.
  Expression { expression: String },

  /// A natural-language question answered by the LLM (batched per block),
  /// optionally against the current page text.
  Prompt {
    prompt: String,
    #[serde(default)]
    page_aware: bool,
  },

  /// Matches only when nothing else matched.
  Default,
}
