//! In-process ledger backend
//!
//! Wallets and transactions live behind a single mutex so that every
//! multi-record commit (reserve, settle) is atomic. Used for tests and local
//! development; production runs against [`super::PgLedger`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use super::{BalanceEffect, Claim, LedgerStore, Transition};
use crate::error::AppError;
use crate::models::transaction::merge_metadata;
use crate::models::{NewTransaction, Transaction, TransactionStatus, VirtualAccount, Wallet};

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<String, Wallet>,
    transactions: HashMap<String, Transaction>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("ledger lock poisoned".to_string()))
    }

    /// Number of recorded transactions; used by tests to assert that rejected
    /// requests left no trace.
    pub fn transaction_count(&self) -> usize {
        self.lock().map(|s| s.transactions.len()).unwrap_or(0)
    }
}

fn validate_new(tx: &NewTransaction) -> Result<(), AppError> {
    if tx.reference.trim().is_empty() {
        return Err(AppError::validation("reference must not be empty"));
    }
    if tx.amount <= 0 || tx.fee < 0 {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>, AppError> {
        Ok(self.lock()?.wallets.get(user_id).cloned())
    }

    async fn create_wallet(&self, user_id: &str) -> Result<Wallet, AppError> {
        let mut state = self.lock()?;
        if state.wallets.contains_key(user_id) {
            return Err(AppError::DuplicateWallet {
                user_id: user_id.to_string(),
            });
        }
        let wallet = Wallet::new(user_id);
        state.wallets.insert(user_id.to_string(), wallet.clone());
        Ok(wallet)
    }

    async fn set_virtual_account(
        &self,
        user_id: &str,
        account: &VirtualAccount,
    ) -> Result<Wallet, AppError> {
        let mut state = self.lock()?;
        let wallet = state
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| AppError::not_found("wallet", user_id))?;
        if wallet.virtual_account.is_none() {
            wallet.virtual_account = Some(account.clone());
            wallet.updated_at = Utc::now();
        }
        Ok(wallet.clone())
    }

    async fn find_wallet_by_account_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Wallet>, AppError> {
        Ok(self
            .lock()?
            .wallets
            .values()
            .find(|w| {
                w.virtual_account
                    .as_ref()
                    .is_some_and(|va| va.account_number == account_number)
            })
            .cloned())
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<Transaction, AppError> {
        validate_new(&tx)?;
        let mut state = self.lock()?;
        if state.transactions.contains_key(&tx.reference) {
            return Err(AppError::validation(format!(
                "reference {} already exists",
                tx.reference
            )));
        }
        let record = tx.into_transaction();
        state
            .transactions
            .insert(record.reference.clone(), record.clone());
        Ok(record)
    }

    async fn insert_transaction_if_absent(
        &self,
        tx: NewTransaction,
    ) -> Result<(Transaction, bool), AppError> {
        validate_new(&tx)?;
        let mut state = self.lock()?;
        if let Some(existing) = state.transactions.get(&tx.reference) {
            return Ok((existing.clone(), false));
        }
        let record = tx.into_transaction();
        state
            .transactions
            .insert(record.reference.clone(), record.clone());
        Ok((record, true))
    }

    async fn find_transaction(&self, reference: &str) -> Result<Option<Transaction>, AppError> {
        Ok(self.lock()?.transactions.get(reference).cloned())
    }

    async fn reserve(&self, tx: NewTransaction) -> Result<(Transaction, Wallet), AppError> {
        validate_new(&tx)?;
        let required = tx.reserved_total();
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if state.transactions.contains_key(&tx.reference) {
            return Err(AppError::validation(format!(
                "reference {} already exists",
                tx.reference
            )));
        }
        let wallet = state
            .wallets
            .get_mut(&tx.user_id)
            .ok_or_else(|| AppError::not_found("wallet", tx.user_id.clone()))?;
        if wallet.balance < required {
            return Err(AppError::InsufficientFunds {
                available: wallet.balance,
                required,
            });
        }

        wallet.balance -= required;
        wallet.updated_at = Utc::now();
        let wallet = wallet.clone();
        let record = tx.into_transaction();
        state
            .transactions
            .insert(record.reference.clone(), record.clone());
        Ok((record, wallet))
    }

    async fn settle(&self, reference: &str, transition: Transition) -> Result<Claim, AppError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let Some(tx) = state.transactions.get(reference) else {
            return Ok(Claim::NotFound);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(Claim::AlreadyTerminal(tx.clone()));
        }
        if transition.status == TransactionStatus::Completed && tx.is_held_for_review() {
            return Ok(Claim::HeldForReview(tx.clone()));
        }

        // Apply the balance effect first so a failure leaves the row pending.
        let wallet = match transition.effect {
            BalanceEffect::None => None,
            BalanceEffect::Credit(amount) => {
                let wallet = state
                    .wallets
                    .get_mut(&tx.user_id)
                    .ok_or_else(|| AppError::not_found("wallet", tx.user_id.clone()))?;
                wallet.balance = wallet.balance.checked_add(amount).ok_or_else(|| {
                    AppError::Internal(format!("balance overflow crediting {}", reference))
                })?;
                wallet.updated_at = Utc::now();
                Some(wallet.clone())
            }
        };

        let tx = state
            .transactions
            .get_mut(reference)
            .ok_or_else(|| AppError::not_found("transaction", reference))?;
        tx.status = transition.status;
        if let Some(patch) = &transition.metadata {
            merge_metadata(&mut tx.metadata, patch);
        }
        tx.updated_at = Utc::now();

        Ok(Claim::Claimed {
            transaction: tx.clone(),
            wallet,
        })
    }

    async fn annotate(
        &self,
        reference: &str,
        patch: JsonValue,
    ) -> Result<Option<Transaction>, AppError> {
        let mut state = self.lock()?;
        Ok(state.transactions.get_mut(reference).map(|tx| {
            merge_metadata(&mut tx.metadata, &patch);
            tx.updated_at = Utc::now();
            tx.clone()
        }))
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let state = self.lock()?;
        let mut pending: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::Pending
                    && tx.created_at < created_before
                    && !tx.is_held_for_review()
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.reference.cmp(&b.reference))
        });
        pending.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(pending)
    }
}
