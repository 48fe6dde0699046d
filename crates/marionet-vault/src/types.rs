use serde::{Deserialize, Serialize};

/// The kind of secret a credential holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
  Password,
  CreditCard,
  Secret,
}

/// A credential record: the stable handle workflows reference.
///
/// `item_id` points at the current item in the external vault; updates swap
/// the pointer to a new item rather than mutating the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
  pub credential_id: String,
  pub organization_id: String,
  pub name: String,
  pub item_id: String,
  pub credential_type: CredentialType,
}

/// The secret content of a vault item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "credential_type", rename_all = "snake_case")]
pub enum CredentialItem {
  Password {
    username: String,
    password: String,
    /// TOTP seed or provider handle; codes are fetched fresh at use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    totp: Option<String>,
  },
  CreditCard {
    card_number: String,
    card_cvv: String,
    card_exp_month: String,
    card_exp_year: String,
    card_brand: String,
    card_holder_name: String,
  },
  Secret {
    value: String,
  },
}

impl CredentialItem {
  pub fn credential_type(&self) -> CredentialType {
    match self {
      CredentialItem::Password { .. } => CredentialType::Password,
      CredentialItem::CreditCard { .. } => CredentialType::CreditCard,
      CredentialItem::Secret { .. } => CredentialType::Secret,
    }
  }

  /// Flatten the item into (field name, value, is_totp) triples, the form
  /// the run context redacts field by field.
  pub fn fields(&self) -> Vec<(&'static str, String, bool)> {
    match self {
      CredentialItem::Password {
        username,
        password,
        totp,
      } => {
        let mut fields = vec![
          ("username", username.clone(), false),
          ("password", password.clone(), false),
        ];
        if totp.is_some() {
          fields.push(("totp", String::new(), true));
        }
        fields
      }
      CredentialItem::CreditCard {
        card_number,
        card_cvv,
        card_exp_month,
        card_exp_year,
        card_brand,
        card_holder_name,
      } => vec![
        ("card_number", card_number.clone(), false),
        ("card_cvv", card_cvv.clone(), false),
        ("card_exp_month", card_exp_month.clone(), false),
        ("card_exp_year", card_exp_year.clone(), false),
        ("card_brand", card_brand.clone(), false),
        ("card_holder_name", card_holder_name.clone(), false),
      ],
      CredentialItem::Secret { value } => vec![("value", value.clone(), false)],
    }
  }
}
