//! Idempotency guard
//!
//! A reference reaches a terminal state exactly once. The guard is a thin
//! front for [`LedgerStore::settle`], which performs the compare-and-swap
//! `pending -> terminal` in the same commit as the balance effect. Losing the
//! race is a normal outcome, not an error.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use super::LedgerStore;
use crate::error::AppError;
use crate::models::{Transaction, TransactionStatus, Wallet};

/// Balance side effect committed together with a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEffect {
    None,
    Credit(i64),
}

/// Terminal transition requested for a pending transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: TransactionStatus,
    pub effect: BalanceEffect,
    /// Merged into the transaction metadata when the claim succeeds.
    pub metadata: Option<JsonValue>,
}

impl Transition {
    pub fn new(status: TransactionStatus, effect: BalanceEffect) -> Self {
        Self {
            status,
            effect,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// This caller won; `wallet` is present when the balance changed.
    Claimed {
        transaction: Transaction,
        wallet: Option<Wallet>,
    },
    /// Someone else already settled the reference.
    AlreadyTerminal(Transaction),
    /// Still pending but flagged `amount_mismatch`; it will not complete
    /// automatically. Failure and refund transitions still apply.
    HeldForReview(Transaction),
    /// No transaction carries this reference.
    NotFound,
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    ledger: Arc<dyn LedgerStore>,
}

impl IdempotencyGuard {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn claim(&self, reference: &str, transition: Transition) -> Result<Claim, AppError> {
        if !TransactionStatus::Pending.can_transition_to(&transition.status) {
            return Err(AppError::Internal(format!(
                "cannot claim {} into non-terminal status {}",
                reference, transition.status
            )));
        }
        if let BalanceEffect::Credit(amount) = transition.effect {
            if amount < 0 {
                return Err(AppError::Internal(format!(
                    "negative credit {} for {}",
                    amount, reference
                )));
            }
        }

        let target = transition.status;
        let claim = self.ledger.settle(reference, transition).await?;
        match &claim {
            Claim::Claimed { wallet, .. } => info!(
                reference = %reference,
                status = %target,
                balance = ?wallet.as_ref().map(|w| w.balance),
                "Claimed terminal transition"
            ),
            Claim::AlreadyTerminal(tx) => debug!(
                reference = %reference,
                requested = %target,
                current = %tx.status,
                "Terminal transition already applied, ignoring"
            ),
            Claim::HeldForReview(_) => info!(
                reference = %reference,
                requested = %target,
                "Transaction held for review, completion refused"
            ),
            Claim::NotFound => debug!(reference = %reference, "Claim for unknown reference"),
        }
        Ok(claim)
    }
}
