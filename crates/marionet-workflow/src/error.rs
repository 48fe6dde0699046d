use thiserror::Error;

/// Errors raised while validating a workflow definition.
///
/// These are definition-time errors: a definition that builds a graph
/// without error cannot fail structurally at run time.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("duplicate block label: {label}")]
  DuplicateLabel { label: String },

  #[error("block '{referenced_by}' points at unknown block '{label}'")]
  UnknownBlock { label: String, referenced_by: String },

  #[error("workflow has no root block (every block has an incoming edge)")]
  NoRoot,

  #[error("workflow has multiple root blocks: {labels:?}")]
  MultipleRoots { labels: Vec<String> },

  #[error("cycle detected through block '{label}'")]
  CycleDetected { label: String },

  #[error("finally block '{label}' not found in definition")]
  FinallyNotFound { label: String },

  #[error("finally block '{label}' must have no outgoing edge")]
  FinallyNotTerminal { label: String },

  #[error("conditional block '{label}' must have exactly one default branch, found {count}")]
  DefaultBranchCount { label: String, count: usize },

  #[error("context parameter '{key}' references unknown source parameter '{source_key}'")]
  UnknownParameterSource { key: String, source_key: String },

  #[error("duplicate parameter key: {key}")]
  DuplicateParameterKey { key: String },

  #[error("workflow definition has no blocks")]
  EmptyWorkflow,
}
