use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::types::CredentialItem;
use crate::{VaultClient, VaultError};

/// Vault backend over the Bitwarden CLI (`bw`).
///
/// Requires an unlocked session; the session key is passed via
/// `--session` on every invocation rather than the environment so
/// concurrent clients with different sessions do not interfere.
pub struct BitwardenCliClient {
  session: String,
}

impl BitwardenCliClient {
  pub fn new(session: impl Into<String>) -> Result<Self, VaultError> {
    let session = session.into();
    if session.is_empty() {
      return Err(VaultError::Misconfigured {
        message: "bitwarden session key is empty".to_string(),
      });
    }
    Ok(Self { session })
  }

  async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, VaultError> {
    let mut command = Command::new("bw");
    command.args(args).arg("--session").arg(&self.session);

    let output = if let Some(input) = stdin {
      use std::process::Stdio;
      use tokio::io::AsyncWriteExt;

      let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| VaultError::Cli {
          message: format!("failed to spawn bw: {}", e),
        })?;
      child
        .stdin
        .as_mut()
        .expect("stdin was piped")
        .write_all(input.as_bytes())
        .await
        .map_err(|e| VaultError::Cli {
          message: format!("failed to write to bw stdin: {}", e),
        })?;
      child.wait_with_output().await.map_err(|e| VaultError::Cli {
        message: format!("bw did not exit cleanly: {}", e),
      })?
    } else {
      command.output().await.map_err(|e| VaultError::Cli {
        message: format!("failed to run bw: {}", e),
      })?
    };

    if !output.status.success() {
      return Err(VaultError::Cli {
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
  }

  fn item_to_bw_json(name: &str, item: &CredentialItem) -> Value {
    match item {
      CredentialItem::Password {
        username,
        password,
        totp,
      } => json!({
        "type": 1,
        "name": name,
        "login": { "username": username, "password": password, "totp": totp },
      }),
      CredentialItem::CreditCard {
        card_number,
        card_cvv,
        card_exp_month,
        card_exp_year,
        card_brand,
        card_holder_name,
      } => json!({
        "type": 3,
        "name": name,
        "card": {
          "number": card_number,
          "code": card_cvv,
          "expMonth": card_exp_month,
          "expYear": card_exp_year,
          "brand": card_brand,
          "cardholderName": card_holder_name,
        },
      }),
      CredentialItem::Secret { value } => json!({
        "type": 2,
        "name": name,
        "notes": value,
      }),
    }
  }

  fn bw_json_to_item(value: &Value) -> Result<CredentialItem, VaultError> {
    let item_type = value["type"].as_i64().unwrap_or(0);
    match item_type {
      1 => Ok(CredentialItem::Password {
        username: value["login"]["username"].as_str().unwrap_or("").to_string(),
        password: value["login"]["password"].as_str().unwrap_or("").to_string(),
        totp: value["login"]["totp"].as_str().map(str::to_string),
      }),
      3 => Ok(CredentialItem::CreditCard {
        card_number: value["card"]["number"].as_str().unwrap_or("").to_string(),
        card_cvv: value["card"]["code"].as_str().unwrap_or("").to_string(),
        card_exp_month: value["card"]["expMonth"].as_str().unwrap_or("").to_string(),
        card_exp_year: value["card"]["expYear"].as_str().unwrap_or("").to_string(),
        card_brand: value["card"]["brand"].as_str().unwrap_or("").to_string(),
        card_holder_name: value["card"]["cardholderName"]
          .as_str()
          .unwrap_or("")
          .to_string(),
      }),
      2 => Ok(CredentialItem::Secret {
        value: value["notes"].as_str().unwrap_or("").to_string(),
      }),
      other => Err(VaultError::Backend {
        message: format!("unsupported bitwarden item type: {}", other),
      }),
    }
  }
}

#[async_trait]
impl VaultClient for BitwardenCliClient {
  async fn create_item(
    &self,
    _organization_id: &str,
    name: &str,
    item: &CredentialItem,
  ) -> Result<String, VaultError> {
    use base64::Engine as _;

    let payload = serde_json::to_string(&Self::item_to_bw_json(name, item)).map_err(|e| {
      VaultError::Backend {
        message: format!("failed to serialize item: {}", e),
      }
    })?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);

    let stdout = self.run(&["create", "item"], Some(&encoded)).await?;
    let created: Value = serde_json::from_str(&stdout).map_err(|e| VaultError::Cli {
      message: format!("bw returned invalid JSON: {}", e),
    })?;
    created["id"]
      .as_str()
      .map(str::to_string)
      .ok_or_else(|| VaultError::Cli {
        message: "bw create returned no item id".to_string(),
      })
  }

  async fn get_item(&self, item_id: &str) -> Result<CredentialItem, VaultError> {
    let stdout = self.run(&["get", "item", item_id], None).await?;
    let value: Value = serde_json::from_str(&stdout).map_err(|e| VaultError::Cli {
      message: format!("bw returned invalid JSON: {}", e),
    })?;
    Self::bw_json_to_item(&value)
  }

  async fn delete_item(&self, item_id: &str) -> Result<(), VaultError> {
    self.run(&["delete", "item", item_id], None).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_password_item_mapping_round_trip() {
    let item = CredentialItem::Password {
      username: "alice".to_string(),
      password: "hunter2".to_string(),
      totp: Some("JBSWY3DP".to_string()),
    };
    let bw = BitwardenCliClient::item_to_bw_json("portal", &item);
    let back = BitwardenCliClient::bw_json_to_item(&bw).unwrap();
    assert_eq!(back, item);
  }

  #[test]
  fn test_unknown_item_type_rejected() {
    let result = BitwardenCliClient::bw_json_to_item(&json!({ "type": 4 }));
    assert!(matches!(result, Err(VaultError::Backend { .. })));
  }

  #[test]
  fn test_empty_session_rejected() {
    assert!(matches!(
      BitwardenCliClient::new(""),
      Err(VaultError::Misconfigured { .. })
    ));
  }
}
