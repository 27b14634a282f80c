use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Transaction type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Investment,
    Return,
    GroupContribution,
    GroupDistribution,
    ServicePurchase,
}

/// Which way money moves relative to the wallet.
///
/// Inflows are credited when confirmed. Outflows are reserved (debited) at
/// initiation and restored when they fail or are refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inflow,
    Outflow,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Investment => "investment",
            TransactionType::Return => "return",
            TransactionType::GroupContribution => "group_contribution",
            TransactionType::GroupDistribution => "group_distribution",
            TransactionType::ServicePurchase => "service_purchase",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TransactionType::Deposit
            | TransactionType::Return
            | TransactionType::GroupDistribution => Direction::Inflow,
            TransactionType::Withdrawal
            | TransactionType::Investment
            | TransactionType::GroupContribution
            | TransactionType::ServicePurchase => Direction::Outflow,
        }
    }

    /// Prefix used when generating references for this type.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEP",
            TransactionType::Withdrawal => "WDR",
            TransactionType::ServicePurchase => "VAS",
            TransactionType::Investment => "INV",
            TransactionType::Return => "RET",
            TransactionType::GroupContribution => "GRC",
            TransactionType::GroupDistribution => "GRD",
        }
    }
}

impl FromStr for TransactionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "investment" => Ok(TransactionType::Investment),
            "return" => Ok(TransactionType::Return),
            "group_contribution" => Ok(TransactionType::GroupContribution),
            "group_distribution" => Ok(TransactionType::GroupDistribution),
            "service_purchase" => Ok(TransactionType::ServicePurchase),
            other => Err(AppError::validation(format!(
                "unknown transaction type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only `pending` may move, and only to a terminal state.
    pub fn can_transition_to(&self, next: &TransactionStatus) -> bool {
        matches!(self, TransactionStatus::Pending) && next.is_terminal()
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(AppError::validation(format!(
                "unknown transaction status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Minor units.
    pub amount: i64,
    /// Minor units, reserved together with `amount` for outflows.
    pub fee: i64,
    pub status: TransactionStatus,
    pub reference: String,
    pub description: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn direction(&self) -> Direction {
        self.tx_type.direction()
    }

    /// Amount held from the wallet while an outflow is in flight.
    pub fn reserved_total(&self) -> i64 {
        self.amount.saturating_add(self.fee)
    }

    /// Set when a confirmation disagreed with the recorded amount.
    pub fn is_held_for_review(&self) -> bool {
        self.metadata.get("amount_mismatch").is_some()
    }

    /// `(expected, paid)` recorded when the transaction was held.
    pub fn amount_mismatch(&self) -> Option<(i64, i64)> {
        let flag = self.metadata.get("amount_mismatch")?;
        Some((
            flag.get("expected")?.as_i64()?,
            flag.get("paid")?.as_i64()?,
        ))
    }
}

/// A transaction about to be recorded in the `pending` state.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub fee: i64,
    pub reference: String,
    pub description: String,
    pub metadata: JsonValue,
}

impl NewTransaction {
    pub fn new(user_id: impl Into<String>, tx_type: TransactionType, amount: i64) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type,
            amount,
            fee: 0,
            reference: generate_reference(tx_type),
            description: String::new(),
            metadata: json!({}),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_fee(mut self, fee: i64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn reserved_total(&self) -> i64 {
        self.amount.saturating_add(self.fee)
    }

    pub fn into_transaction(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            tx_type: self.tx_type,
            amount: self.amount,
            fee: self.fee,
            status: TransactionStatus::Pending,
            reference: self.reference,
            description: self.description,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `<PREFIX>_<uuid simple>`, e.g. `DEP_3f2a...`.
pub fn generate_reference(tx_type: TransactionType) -> String {
    format!(
        "{}_{}",
        tx_type.reference_prefix(),
        Uuid::new_v4().simple()
    )
}

/// Shallow-merge `patch` into `target` when both are objects.
pub fn merge_metadata(target: &mut JsonValue, patch: &JsonValue) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(base), Some(extra)) => {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        _ if patch.is_object() => *target = patch.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_transitions() {
        let pending = TransactionStatus::Pending;
        assert!(pending.can_transition_to(&TransactionStatus::Completed));
        assert!(pending.can_transition_to(&TransactionStatus::Failed));
        assert!(pending.can_transition_to(&TransactionStatus::Refunded));
        assert!(!pending.can_transition_to(&TransactionStatus::Pending));

        for terminal in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(&TransactionStatus::Pending));
            assert!(!terminal.can_transition_to(&TransactionStatus::Completed));
            assert!(!terminal.can_transition_to(&TransactionStatus::Refunded));
        }
    }

    #[test]
    fn status_string_conversion() {
        assert_eq!(TransactionStatus::Refunded.as_str(), "refunded");
        assert_eq!(
            "completed".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Completed
        );
        assert!("processing".parse::<TransactionStatus>().is_err());
        assert_eq!(
            "group_contribution".parse::<TransactionType>().unwrap(),
            TransactionType::GroupContribution
        );
        assert!(matches!(
            "transfer".parse::<TransactionType>(),
            Err(AppError::Validation(_))
        ));
        assert_eq!(TransactionType::ServicePurchase.to_string(), "service_purchase");
    }

    #[test]
    fn directions_split_inflows_from_outflows() {
        assert_eq!(TransactionType::Deposit.direction(), Direction::Inflow);
        assert_eq!(TransactionType::Return.direction(), Direction::Inflow);
        assert_eq!(TransactionType::Withdrawal.direction(), Direction::Outflow);
        assert_eq!(
            TransactionType::ServicePurchase.direction(),
            Direction::Outflow
        );
    }

    #[test]
    fn references_are_prefixed_and_unique() {
        let a = generate_reference(TransactionType::Withdrawal);
        let b = generate_reference(TransactionType::Withdrawal);
        assert!(a.starts_with("WDR_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn metadata_merge_keeps_existing_keys() {
        let mut meta = json!({"channel": "checkout"});
        merge_metadata(&mut meta, &json!({"transfer_code": "TRF_1"}));
        assert_eq!(meta["channel"], "checkout");
        assert_eq!(meta["transfer_code"], "TRF_1");

        let mut empty = JsonValue::Null;
        merge_metadata(&mut empty, &json!({"a": 1}));
        assert_eq!(empty["a"], 1);
    }

    #[test]
    fn serializes_with_api_field_names() {
        let tx = NewTransaction::new("user-1", TransactionType::Deposit, 500_000)
            .with_reference("DEP_x")
            .into_transaction();
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["type"], "deposit");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["userId"], "user-1");
        assert!(!tx.is_held_for_review());
        assert_eq!(tx.amount_mismatch(), None);

        let held = NewTransaction::new("user-1", TransactionType::Deposit, 500_000)
            .with_metadata(json!({"amount_mismatch": {"expected": 500_000, "paid": 400_000}}))
            .into_transaction();
        assert!(held.is_held_for_review());
        assert_eq!(held.amount_mismatch(), Some((500_000, 400_000)));
    }
}
