use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::types::{Credential, CredentialItem};
use crate::{VaultClient, VaultError};

/// Persistence for credential records (the DB side of the two-phase write).
#[async_trait]
pub trait CredentialRepository: Send + Sync {
  async fn insert(&self, credential: &Credential) -> Result<(), VaultError>;

  async fn get(&self, credential_id: &str) -> Result<Credential, VaultError>;

  /// Swap the item pointer, returning the previous item id.
  async fn swap_item(&self, credential_id: &str, new_item_id: &str) -> Result<String, VaultError>;

  async fn delete(&self, credential_id: &str) -> Result<(), VaultError>;
}

/// Two-phase credential lifecycle over a vault backend and the credential
/// database.
///
/// The external vault is always written first; the DB record is the commit
/// point. A vault item without a DB record is an orphan that gets a
/// best-effort delete, never the other way around.
pub struct CredentialService<V, R> {
  vault: V,
  repository: R,
}

impl<V: VaultClient, R: CredentialRepository> CredentialService<V, R> {
  pub fn new(vault: V, repository: R) -> Self {
    Self { vault, repository }
  }

  /// Create a credential: vault write, then DB record.
  ///
  /// If the DB write fails after the vault write succeeded, the orphaned
  /// vault item is deleted best-effort; a delete failure is logged but
  /// does not mask the original error.
  pub async fn create_credential(
    &self,
    organization_id: &str,
    name: &str,
    item: CredentialItem,
  ) -> Result<Credential, VaultError> {
    let item_id = self.vault.create_item(organization_id, name, &item).await?;

    let credential = Credential {
      credential_id: format!("cred_{}", uuid::Uuid::new_v4()),
      organization_id: organization_id.to_string(),
      name: name.to_string(),
      item_id: item_id.clone(),
      credential_type: item.credential_type(),
    };

    if let Err(db_err) = self.repository.insert(&credential).await {
      if let Err(delete_err) = self.vault.delete_item(&item_id).await {
        error!(
          item_id = %item_id,
          error = %delete_err,
          "failed to delete orphaned vault item after database error"
        );
      }
      return Err(db_err);
    }

    info!(
      credential_id = %credential.credential_id,
      organization_id = %organization_id,
      "credential created"
    );
    Ok(credential)
  }

  /// Fetch the secret content behind a credential.
  pub async fn get_credential_item(
    &self,
    credential_id: &str,
  ) -> Result<CredentialItem, VaultError> {
    let credential = self.repository.get(credential_id).await?;
    self.vault.get_item(&credential.item_id).await
  }

  /// Update a credential against a new vault item.
  ///
  /// The new item must be confirmed persisted before the DB pointer swaps;
  /// if the swap fails the new item is rolled back, and the old item is
  /// deleted best-effort only after the swap committed.
  pub async fn update_credential(
    &self,
    credential_id: &str,
    item: CredentialItem,
  ) -> Result<Credential, VaultError> {
    let existing = self.repository.get(credential_id).await?;
    let new_item_id = self
      .vault
      .create_item(&existing.organization_id, &existing.name, &item)
      .await?;

    let old_item_id = match self.repository.swap_item(credential_id, &new_item_id).await {
      Ok(old) => old,
      Err(db_err) => {
        if let Err(delete_err) = self.vault.delete_item(&new_item_id).await {
          error!(
            item_id = %new_item_id,
            error = %delete_err,
            "failed to roll back new vault item after database error"
          );
        }
        return Err(db_err);
      }
    };

    if let Err(delete_err) = self.vault.delete_item(&old_item_id).await {
      warn!(
        item_id = %old_item_id,
        error = %delete_err,
        "failed to delete superseded vault item"
      );
    }

    Ok(Credential {
      item_id: new_item_id,
      credential_type: item.credential_type(),
      ..existing
    })
  }

  /// Delete a credential: vault item first, then the DB record.
  pub async fn delete_credential(&self, credential_id: &str) -> Result<(), VaultError> {
    let credential = self.repository.get(credential_id).await?;
    self.vault.delete_item(&credential.item_id).await?;
    self.repository.delete(credential_id).await
  }
}
