use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::service::CredentialRepository;
use crate::types::{Credential, CredentialItem};
use crate::{VaultClient, VaultError};

/// In-memory vault backend. Backs tests and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryVault {
  items: Mutex<HashMap<String, CredentialItem>>,
}

impl MemoryVault {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn item_count(&self) -> usize {
    self.items.lock().expect("memory vault poisoned").len()
  }

  /// Seed an item under a caller-chosen id, for lookups keyed by name
  /// (secrets-manager entries) rather than generated item ids.
  pub fn insert_named(&self, item_id: &str, item: CredentialItem) {
    self
      .items
      .lock()
      .expect("memory vault poisoned")
      .insert(item_id.to_string(), item);
  }
}

#[async_trait]
impl VaultClient for MemoryVault {
  async fn create_item(
    &self,
    _organization_id: &str,
    _name: &str,
    item: &CredentialItem,
  ) -> Result<String, VaultError> {
    let item_id = format!("item_{}", uuid::Uuid::new_v4());
    self
      .items
      .lock()
      .expect("memory vault poisoned")
      .insert(item_id.clone(), item.clone());
    Ok(item_id)
  }

  async fn get_item(&self, item_id: &str) -> Result<CredentialItem, VaultError> {
    self
      .items
      .lock()
      .expect("memory vault poisoned")
      .get(item_id)
      .cloned()
      .ok_or_else(|| VaultError::ItemNotFound {
        item_id: item_id.to_string(),
      })
  }

  async fn delete_item(&self, item_id: &str) -> Result<(), VaultError> {
    self
      .items
      .lock()
      .expect("memory vault poisoned")
      .remove(item_id)
      .map(|_| ())
      .ok_or_else(|| VaultError::ItemNotFound {
        item_id: item_id.to_string(),
      })
  }
}

/// In-memory credential repository. Backs tests and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryRepository {
  records: Mutex<HashMap<String, Credential>>,
}

impl MemoryRepository {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CredentialRepository for MemoryRepository {
  async fn insert(&self, credential: &Credential) -> Result<(), VaultError> {
    self
      .records
      .lock()
      .expect("memory repository poisoned")
      .insert(credential.credential_id.clone(), credential.clone());
    Ok(())
  }

  async fn get(&self, credential_id: &str) -> Result<Credential, VaultError> {
    self
      .records
      .lock()
      .expect("memory repository poisoned")
      .get(credential_id)
      .cloned()
      .ok_or_else(|| VaultError::NotFound {
        credential_id: credential_id.to_string(),
      })
  }

  async fn swap_item(&self, credential_id: &str, new_item_id: &str) -> Result<String, VaultError> {
    let mut records = self.records.lock().expect("memory repository poisoned");
    let record = records
      .get_mut(credential_id)
      .ok_or_else(|| VaultError::NotFound {
        credential_id: credential_id.to_string(),
      })?;
    let old = std::mem::replace(&mut record.item_id, new_item_id.to_string());
    Ok(old)
  }

  async fn delete(&self, credential_id: &str) -> Result<(), VaultError> {
    self
      .records
      .lock()
      .expect("memory repository poisoned")
      .remove(credential_id)
      .map(|_| ())
      .ok_or_else(|| VaultError::NotFound {
        credential_id: credential_id.to_string(),
      })
  }
}
