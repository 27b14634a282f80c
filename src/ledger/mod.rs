//! Ledger Store
//!
//! Durable home of wallets and transactions. Implementations must make two
//! operations atomic: the reservation debit together with recording the
//! pending outflow, and the `pending -> terminal` claim together with its
//! balance effect. Everything else is plain reads and inserts.

pub mod guard;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::models::{NewTransaction, Transaction, VirtualAccount, Wallet};

pub use guard::{BalanceEffect, Claim, IdempotencyGuard, Transition};
pub use memory::InMemoryLedger;
#[cfg(feature = "database")]
pub use postgres::PgLedger;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>, AppError>;

    /// Fails with `DuplicateWallet` when the user already has one.
    async fn create_wallet(&self, user_id: &str) -> Result<Wallet, AppError>;

    /// Attach a virtual account unless one is already attached; returns the
    /// wallet as stored.
    async fn set_virtual_account(
        &self,
        user_id: &str,
        account: &VirtualAccount,
    ) -> Result<Wallet, AppError>;

    async fn find_wallet_by_account_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Wallet>, AppError>;

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<Transaction, AppError>;

    /// Insert unless the reference exists. Returns the stored row and whether
    /// it was inserted by this call.
    async fn insert_transaction_if_absent(
        &self,
        tx: NewTransaction,
    ) -> Result<(Transaction, bool), AppError>;

    async fn find_transaction(&self, reference: &str) -> Result<Option<Transaction>, AppError>;

    /// Debit `amount + fee` and record the pending outflow in one commit.
    /// Fails with `InsufficientFunds` without recording anything.
    async fn reserve(&self, tx: NewTransaction) -> Result<(Transaction, Wallet), AppError>;

    /// Atomically move `reference` from `pending` to `transition.status` and
    /// apply the balance effect. Losers of a concurrent race observe
    /// `Claim::AlreadyTerminal`. Completing a row flagged `amount_mismatch`
    /// is refused with `Claim::HeldForReview`.
    async fn settle(&self, reference: &str, transition: Transition) -> Result<Claim, AppError>;

    /// Merge `patch` into the metadata of a transaction, whatever its status.
    async fn annotate(
        &self,
        reference: &str,
        patch: JsonValue,
    ) -> Result<Option<Transaction>, AppError>;

    /// Pending transactions created before `created_before`, oldest first,
    /// excluding those held for manual review.
    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Wallets are created lazily; two concurrent first requests converge on
    /// the same wallet.
    async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, AppError> {
        if let Some(wallet) = self.get_wallet(user_id).await? {
            return Ok(wallet);
        }
        match self.create_wallet(user_id).await {
            Ok(wallet) => Ok(wallet),
            Err(AppError::DuplicateWallet { .. }) => self
                .get_wallet(user_id)
                .await?
                .ok_or_else(|| AppError::not_found("wallet", user_id)),
            Err(e) => Err(e),
        }
    }
}

