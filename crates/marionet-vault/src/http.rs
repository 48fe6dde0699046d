use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::types::CredentialItem;
use crate::{VaultClient, VaultError};

/// Vault backend over a custom HTTP credential service.
///
/// The service exposes `POST /items`, `GET /items/{id}` and
/// `DELETE /items/{id}` with bearer auth; item content uses the same JSON
/// shape as [`CredentialItem`].
pub struct HttpVaultClient {
  client: reqwest::Client,
  base_url: String,
  token: String,
}

#[derive(Deserialize)]
struct CreateItemResponse {
  item_id: String,
}

impl HttpVaultClient {
  pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, VaultError> {
    let base_url = base_url.into();
    if base_url.is_empty() {
      return Err(VaultError::Misconfigured {
        message: "vault base url is empty".to_string(),
      });
    }
    Ok(Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      token: token.into(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

#[async_trait]
impl VaultClient for HttpVaultClient {
  async fn create_item(
    &self,
    organization_id: &str,
    name: &str,
    item: &CredentialItem,
  ) -> Result<String, VaultError> {
    let response = self
      .client
      .post(self.url("/items"))
      .bearer_auth(&self.token)
      .json(&json!({
        "organization_id": organization_id,
        "name": name,
        "item": item,
      }))
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(VaultError::Backend {
        message: format!("create item returned {}", response.status()),
      });
    }

    let body: CreateItemResponse = response.json().await?;
    Ok(body.item_id)
  }

  async fn get_item(&self, item_id: &str) -> Result<CredentialItem, VaultError> {
    let response = self
      .client
      .get(self.url(&format!("/items/{}", item_id)))
      .bearer_auth(&self.token)
      .send()
      .await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(VaultError::ItemNotFound {
        item_id: item_id.to_string(),
      });
    }
    if !response.status().is_success() {
      return Err(VaultError::Backend {
        message: format!("get item returned {}", response.status()),
      });
    }

    Ok(response.json().await?)
  }

  async fn delete_item(&self, item_id: &str) -> Result<(), VaultError> {
    let response = self
      .client
      .delete(self.url(&format!("/items/{}", item_id)))
      .bearer_auth(&self.token)
      .send()
      .await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(VaultError::ItemNotFound {
        item_id: item_id.to_string(),
      });
    }
    if !response.status().is_success() {
      return Err(VaultError::Backend {
        message: format!("delete item returned {}", response.status()),
      });
    }
    Ok(())
  }
}
