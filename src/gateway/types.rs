//! Normalized request/response shapes shared by every gateway implementation.
//! All amounts are minor units.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub reference: String,
    pub checkout_url: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualAccountRequest {
    pub user_id: String,
    pub customer_email: Option<String>,
    pub preferred_bank: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAccountDetails {
    pub provider_account_id: String,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
}

/// Processor-side status of a reference, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Success,
    Failed,
    Reversed,
    Pending,
    Abandoned,
    Unknown(String),
}

impl ExternalStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "successful" | "completed" | "delivered" => ExternalStatus::Success,
            "failed" | "failure" | "rejected" | "declined" => ExternalStatus::Failed,
            "reversed" | "refunded" => ExternalStatus::Reversed,
            "pending" | "ongoing" | "processing" | "queued" | "otp" | "received" => {
                ExternalStatus::Pending
            }
            "abandoned" | "expired" => ExternalStatus::Abandoned,
            other => ExternalStatus::Unknown(other.to_string()),
        }
    }
}

/// Result of verifying a reference with the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub found: bool,
    pub amount_paid: Option<i64>,
    pub currency: Option<String>,
    pub status: ExternalStatus,
}

impl Verification {
    pub fn not_found() -> Self {
        Self {
            found: false,
            amount_paid: None,
            currency: None,
            status: ExternalStatus::Pending,
        }
    }

    pub fn success(amount_paid: i64) -> Self {
        Self {
            found: true,
            amount_paid: Some(amount_paid),
            currency: None,
            status: ExternalStatus::Success,
        }
    }

    pub fn with_status(status: ExternalStatus) -> Self {
        Self {
            found: true,
            amount_paid: None,
            currency: None,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub narration: String,
}

/// Payouts are fire-and-confirm: `accepted` only means queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub accepted: bool,
    pub transfer_code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Airtime,
    Data,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Airtime => "airtime",
            ServiceKind::Data => "data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDebitRequest {
    pub reference: String,
    pub service: ServiceKind,
    pub provider: String,
    pub phone: String,
    pub amount: i64,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDebitOutcome {
    Delivered,
    Queued,
    Rejected(String),
}
