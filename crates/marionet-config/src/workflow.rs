use serde::{Deserialize, Serialize};

use crate::block::BlockDef;
use crate::parameter::ParameterDef;

/// A complete workflow definition.
///
/// Definitions are immutable once created; edits produce a new version
/// under a new `workflow_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
  pub workflow_id: String,
  pub title: String,
  #[serde(default)]
  pub parameters: Vec<ParameterDef>,
  pub blocks: Vec<BlockDef>,
  /// A block executed after the main chain reaches a terminal status,
  /// regardless of outcome. Stripped from the DAG before validation.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finally_block_label: Option<String>,
}

impl WorkflowDefinition {
  /// Look up a block by label.
  pub fn get_block(&self, label: &str) -> Option<&BlockDef> {
    self.blocks.iter().find(|b| b.label == label)
  }
}
