use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Definition(#[from] marionet_workflow::DefinitionError),

  #[error(transparent)]
  Context(#[from] marionet_context::ContextError),

  #[error(transparent)]
  Vault(#[from] marionet_vault::VaultError),

  #[error(transparent)]
  Store(#[from] marionet_store::Error),

  /// Infrastructure failures surfaced by a block; recoverable block
  /// failures become run-level `Failed` statuses instead.
  #[error(transparent)]
  Block(#[from] marionet_blocks::BlockError),

  #[error("run '{run_id}' graph references unknown block '{label}'")]
  MissingBlock { run_id: String, label: String },
}
