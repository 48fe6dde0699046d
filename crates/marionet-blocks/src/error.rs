use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockError {
  #[error(transparent)]
  Template(#[from] marionet_template::TemplateError),

  #[error(transparent)]
  Context(#[from] marionet_context::ContextError),

  #[error("parameter '{key}' is not available in the run context")]
  MissingParameter { key: String },

  #[error("agent call failed: {message}")]
  Agent { message: String },

  #[error("LLM call failed: {message}")]
  Llm { message: String },

  #[error("code execution failed: {message}")]
  Code { message: String },

  #[error("http request failed: {message}")]
  Http { message: String },

  #[error("email delivery failed: {message}")]
  Email { message: String },

  #[error("no mailer configured for send_email block")]
  MailerNotConfigured,

  /// The run cannot meaningfully continue: fatal regardless of a block's
  /// `continue_on_failure` flag.
  #[error("infrastructure failure: {message}")]
  Infrastructure { message: String },
}

impl BlockError {
  /// Whether this error must fail the run even for continue-on-failure
  /// blocks.
  pub fn is_infrastructure(&self) -> bool {
    matches!(self, BlockError::Infrastructure { .. })
  }
}
