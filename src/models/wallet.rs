use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processor-issued bank account dedicated to one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAccount {
    pub provider_account_id: String,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
}

/// One custodial wallet per user. `balance` is in minor units (kobo) and is
/// only ever changed by a committed transaction transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: String,
    pub balance: i64,
    pub virtual_account: Option<VirtualAccount>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            balance: 0,
            virtual_account: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_virtual_account(&self) -> bool {
        self.virtual_account.is_some()
    }
}
