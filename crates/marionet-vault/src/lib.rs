//! Marionet Vault
//!
//! Pluggable credential storage behind the [`VaultClient`] trait, plus the
//! [`CredentialService`] that keeps the external vault and the credential
//! database consistent with a two-phase write protocol.
//!
//! Vault adapters are stateless: the same client may serve many concurrent
//! runs. Vault misconfiguration and missing credentials are fatal setup
//! errors surfaced before any block executes.

mod bitwarden;
mod http;
mod memory;
mod service;
mod types;

pub use bitwarden::BitwardenCliClient;
pub use http::HttpVaultClient;
pub use memory::{MemoryRepository, MemoryVault};
pub use service::{CredentialRepository, CredentialService};
pub use types::{Credential, CredentialItem, CredentialType};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
  #[error("credential not found: {credential_id}")]
  NotFound { credential_id: String },

  #[error("vault item not found: {item_id}")]
  ItemNotFound { item_id: String },

  #[error("vault backend error: {message}")]
  Backend { message: String },

  #[error("vault request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("vault CLI failed: {message}")]
  Cli { message: String },

  #[error("credential database error: {message}")]
  Database { message: String },

  #[error("vault misconfigured: {message}")]
  Misconfigured { message: String },
}

/// CRUD contract every vault backend implements.
///
/// Items are identified by the backend's own item id; the credential
/// database maps stable credential ids to the current item id.
#[async_trait]
pub trait VaultClient: Send + Sync {
  /// Write a new item, returning the backend's item id.
  async fn create_item(
    &self,
    organization_id: &str,
    name: &str,
    item: &CredentialItem,
  ) -> Result<String, VaultError>;

  /// Fetch an item's secret content.
  async fn get_item(&self, item_id: &str) -> Result<CredentialItem, VaultError>;

  /// Delete an item. Deleting an unknown item is an error.
  async fn delete_item(&self, item_id: &str) -> Result<(), VaultError>;
}
