//! Transaction State Machine
//!
//! Maps gateway events onto `pending -> completed | failed | refunded` and
//! decides the balance side effect of each transition. This is the only code
//! path that changes a wallet balance after initiation; the change is
//! committed together with the status by the ledger's idempotency guard.
//!
//! | event      | inflow (deposit)          | outflow (withdrawal, VAS) |
//! |------------|---------------------------|---------------------------|
//! | confirmed  | completed, credit amount  | completed, no effect      |
//! | failed     | failed, no effect         | failed, restore reserve   |
//! | refunded   | refunded, no effect       | refunded, restore reserve |

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::ledger::{BalanceEffect, Claim, IdempotencyGuard, LedgerStore, Transition};
use crate::log_transaction;
use crate::models::{Direction, Transaction, TransactionStatus, Wallet};

/// Terminal signal from the processor, whichever path delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// `amount_paid` is `None` when the notification carried no amount.
    Confirmed {
        reference: String,
        amount_paid: Option<i64>,
    },
    Failed {
        reference: String,
        reason: String,
    },
    Refunded {
        reference: String,
    },
}

impl GatewayEvent {
    pub fn reference(&self) -> &str {
        match self {
            GatewayEvent::Confirmed { reference, .. }
            | GatewayEvent::Failed { reference, .. }
            | GatewayEvent::Refunded { reference } => reference,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::Confirmed { .. } => "confirmed",
            GatewayEvent::Failed { .. } => "failed",
            GatewayEvent::Refunded { .. } => "refunded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// This event moved the transaction to a terminal state.
    Settled {
        transaction: Transaction,
        wallet: Option<Wallet>,
    },
    /// Already terminal; nothing changed.
    AlreadyTerminal(Transaction),
    /// No local transaction carries the reference; nothing changed.
    UnknownReference(String),
    /// Confirmation disagreed with the recorded amount; left pending and
    /// flagged for manual reconciliation.
    HeldForReview {
        transaction: Transaction,
        expected: i64,
        paid: i64,
    },
}

impl Outcome {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Outcome::Settled { transaction, .. }
            | Outcome::AlreadyTerminal(transaction)
            | Outcome::HeldForReview { transaction, .. } => Some(transaction),
            Outcome::UnknownReference(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct TransactionStateMachine {
    ledger: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
}

impl TransactionStateMachine {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        let guard = IdempotencyGuard::new(ledger.clone());
        Self { ledger, guard }
    }

    #[instrument(skip(self, event), fields(event_kind = event.name(), reference = %event.reference()))]
    pub async fn apply(&self, event: GatewayEvent) -> Result<Outcome, AppError> {
        let reference = event.reference().to_string();

        let Some(tx) = self.ledger.find_transaction(&reference).await? else {
            warn!(reference = %reference, "Gateway event for unknown reference, ignoring");
            return Ok(Outcome::UnknownReference(reference));
        };
        if tx.status.is_terminal() {
            warn_if_late_confirmation(&event, &tx);
            info!(
                reference = %reference,
                status = %tx.status,
                "Transaction already terminal, event is a no-op"
            );
            return Ok(Outcome::AlreadyTerminal(tx));
        }

        let transition = match &event {
            GatewayEvent::Confirmed { amount_paid, .. } => {
                if tx.is_held_for_review() {
                    info!(
                        reference = %reference,
                        "Confirmation for transaction under review, not completing"
                    );
                    return Ok(held_outcome(tx, *amount_paid));
                }
                if let Some(held) = self.check_amount(&tx, *amount_paid).await? {
                    return Ok(held);
                }
                let effect = match tx.direction() {
                    Direction::Inflow => BalanceEffect::Credit(tx.amount),
                    Direction::Outflow => BalanceEffect::None,
                };
                Transition::new(TransactionStatus::Completed, effect).with_metadata(json!({
                    "settled_at": Utc::now().to_rfc3339(),
                }))
            }
            GatewayEvent::Failed { reason, .. } => {
                Transition::new(TransactionStatus::Failed, restore_reservation(&tx))
                    .with_metadata(json!({ "failure_reason": reason }))
            }
            GatewayEvent::Refunded { .. } => {
                Transition::new(TransactionStatus::Refunded, restore_reservation(&tx))
                    .with_metadata(json!({ "refunded_at": Utc::now().to_rfc3339() }))
            }
        };

        Ok(match self.guard.claim(&reference, transition).await? {
            Claim::Claimed {
                transaction,
                wallet,
            } => {
                log_transaction!(
                    event = event.name(),
                    reference = transaction.reference,
                    user_id = transaction.user_id,
                    tx_type = transaction.tx_type.as_str(),
                    status = transaction.status.as_str(),
                    amount = transaction.amount,
                    balance = wallet.as_ref().map(|w| w.balance),
                );
                Outcome::Settled {
                    transaction,
                    wallet,
                }
            }
            Claim::AlreadyTerminal(transaction) => {
                warn_if_late_confirmation(&event, &transaction);
                Outcome::AlreadyTerminal(transaction)
            }
            Claim::HeldForReview(transaction) => held_outcome(transaction, None),
            Claim::NotFound => Outcome::UnknownReference(reference),
        })
    }

    /// Inflows are only credited when the processor agrees on the amount.
    async fn check_amount(
        &self,
        tx: &Transaction,
        amount_paid: Option<i64>,
    ) -> Result<Option<Outcome>, AppError> {
        let Some(paid) = amount_paid else {
            return Ok(None);
        };
        if tx.direction() != Direction::Inflow || paid == tx.amount {
            return Ok(None);
        }

        warn!(
            reference = %tx.reference,
            user_id = %tx.user_id,
            expected = tx.amount,
            paid,
            "Amount mismatch, holding transaction for review"
        );
        let flagged = self
            .ledger
            .annotate(
                &tx.reference,
                json!({
                    "amount_mismatch": {
                        "expected": tx.amount,
                        "paid": paid,
                        "flagged_at": Utc::now().to_rfc3339(),
                    }
                }),
            )
            .await?
            .unwrap_or_else(|| tx.clone());

        // A racing event may have settled it between the read and the flag.
        if flagged.status.is_terminal() {
            return Ok(Some(Outcome::AlreadyTerminal(flagged)));
        }
        Ok(Some(Outcome::HeldForReview {
            transaction: flagged,
            expected: tx.amount,
            paid,
        }))
    }
}

/// Report a held transaction with the amounts recorded when it was flagged.
fn held_outcome(transaction: Transaction, amount_paid: Option<i64>) -> Outcome {
    let (expected, paid) = transaction
        .amount_mismatch()
        .unwrap_or((transaction.amount, amount_paid.unwrap_or(transaction.amount)));
    Outcome::HeldForReview {
        transaction,
        expected,
        paid,
    }
}

/// Money confirmed after the inflow was failed or abandoned is not credited.
fn warn_if_late_confirmation(event: &GatewayEvent, tx: &Transaction) {
    if matches!(event, GatewayEvent::Confirmed { .. })
        && tx.direction() == Direction::Inflow
        && tx.status == TransactionStatus::Failed
    {
        warn!(
            reference = %tx.reference,
            user_id = %tx.user_id,
            amount = tx.amount,
            "Confirmation received for a failed inflow; payment not credited, needs manual review"
        );
    }
}

fn restore_reservation(tx: &Transaction) -> BalanceEffect {
    match tx.direction() {
        Direction::Outflow => BalanceEffect::Credit(tx.reserved_total()),
        Direction::Inflow => BalanceEffect::None,
    }
}
