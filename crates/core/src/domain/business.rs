use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessId(pub String);

impl BusinessId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A tenant: an independent store owning its catalog, customers, and conversations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub payment: PaymentSettings,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettings {
    pub bank_account: Option<BankAccount>,
    /// Free-text instructions used when no structured account is configured.
    pub bank_instructions: Option<String>,
    pub payment_link: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

impl PaymentSettings {
    pub fn bank_details_text(&self) -> Option<String> {
        if let Some(account) = &self.bank_account {
            return Some(format!(
                "Bank: {}\nAccount: {}\nHolder: {}",
                account.bank_name, account.account_number, account.account_holder
            ));
        }

        self.bank_instructions
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_owned)
    }

    pub fn payment_link(&self) -> Option<&str> {
        self.payment_link.as_deref().map(str::trim).filter(|link| !link.is_empty())
    }
}
