use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("workflow parameter '{key}' has no input and no default")]
  MissingWorkflowInput { key: String },

  #[error("context parameter '{key}' source '{source_key}' is not available")]
  MissingSource { key: String, source_key: String },

  #[error("run context not found for run '{run_id}'")]
  RunNotFound { run_id: String },

  #[error("run context already exists for run '{run_id}'")]
  RunAlreadyExists { run_id: String },
}
