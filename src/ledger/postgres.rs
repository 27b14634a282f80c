//! PostgreSQL ledger backend
//!
//! The idempotency guard is a single conditional UPDATE
//! (`... WHERE reference = $1 AND status = 'pending'`) executed in the same
//! SQL transaction as the wallet balance update. Under READ COMMITTED a
//! concurrent claimer blocks on the row lock, re-evaluates the predicate after
//! the winner commits, and matches zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};
use uuid::Uuid;

use super::{BalanceEffect, Claim, LedgerStore, Transition};
use crate::error::AppError;
use crate::middleware::logging::log_database_query;
use crate::models::{
    NewTransaction, Transaction, TransactionStatus, TransactionType, VirtualAccount, Wallet,
};

const WALLET_COLUMNS: &str = "id, user_id, balance, provider_account_id, account_number, \
     account_name, bank_name, is_active, created_at, updated_at";

const TX_COLUMNS: &str = "id, user_id, tx_type, amount, fee, status, reference, description, \
     metadata, created_at, updated_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id UUID PRIMARY KEY,
        user_id TEXT NOT NULL UNIQUE,
        balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        provider_account_id TEXT,
        account_number TEXT UNIQUE,
        account_name TEXT,
        bank_name TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        tx_type TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        fee BIGINT NOT NULL DEFAULT 0 CHECK (fee >= 0),
        status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed', 'refunded')),
        reference TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_pending ON transactions (created_at) WHERE status = 'pending'",
    "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions (user_id, created_at DESC)",
];

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: String,
    balance: i64,
    provider_account_id: Option<String>,
    account_number: Option<String>,
    account_name: Option<String>,
    bank_name: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        let virtual_account = match (
            row.provider_account_id,
            row.account_number,
            row.account_name,
            row.bank_name,
        ) {
            (Some(provider_account_id), Some(account_number), Some(account_name), Some(bank_name)) => {
                Some(VirtualAccount {
                    provider_account_id,
                    account_number,
                    account_name,
                    bank_name,
                })
            }
            _ => None,
        };
        Wallet {
            id: row.id,
            user_id: row.user_id,
            balance: row.balance,
            virtual_account,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: String,
    tx_type: String,
    amount: i64,
    fee: i64,
    status: String,
    reference: String,
    description: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let tx_type = row
            .tx_type
            .parse::<TransactionType>()
            .map_err(|e| AppError::Database(format!("corrupt transaction row: {}", e)))?;
        let status = row
            .status
            .parse::<TransactionStatus>()
            .map_err(|e| AppError::Database(format!("corrupt transaction row: {}", e)))?;
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            tx_type,
            amount: row.amount,
            fee: row.fee,
            status,
            reference: row.reference,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_insert_error(err: sqlx::Error, reference: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::validation(format!("reference {} already exists", reference))
        }
        _ => AppError::from(err),
    }
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL ledger");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_transaction(&self, reference: &str) -> Result<Option<Transaction>, AppError> {
        let sql = format!("SELECT {} FROM transactions WHERE reference = $1", TX_COLUMNS);
        let row = log_database_query(
            "SELECT transaction BY reference",
            sqlx::query_as::<_, TransactionRow>(&sql)
                .bind(reference)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(Transaction::try_from).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>, AppError> {
        let sql = format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS);
        let row = log_database_query(
            "SELECT wallet BY user_id",
            sqlx::query_as::<_, WalletRow>(&sql)
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn create_wallet(&self, user_id: &str) -> Result<Wallet, AppError> {
        let sql = format!(
            "INSERT INTO wallets (id, user_id) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO NOTHING RETURNING {}",
            WALLET_COLUMNS
        );
        let row = log_database_query(
            "INSERT wallet",
            sqlx::query_as::<_, WalletRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(Wallet::from).ok_or_else(|| AppError::DuplicateWallet {
            user_id: user_id.to_string(),
        })
    }

    async fn set_virtual_account(
        &self,
        user_id: &str,
        account: &VirtualAccount,
    ) -> Result<Wallet, AppError> {
        let sql = format!(
            "UPDATE wallets SET provider_account_id = $2, account_number = $3, \
             account_name = $4, bank_name = $5, updated_at = NOW() \
             WHERE user_id = $1 AND account_number IS NULL RETURNING {}",
            WALLET_COLUMNS
        );
        let row = log_database_query(
            "UPDATE wallet virtual account",
            sqlx::query_as::<_, WalletRow>(&sql)
                .bind(user_id)
                .bind(&account.provider_account_id)
                .bind(&account.account_number)
                .bind(&account.account_name)
                .bind(&account.bank_name)
                .fetch_optional(&self.pool),
        )
        .await?;
        match row {
            Some(row) => Ok(row.into()),
            None => self
                .get_wallet(user_id)
                .await?
                .ok_or_else(|| AppError::not_found("wallet", user_id)),
        }
    }

    async fn find_wallet_by_account_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Wallet>, AppError> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE account_number = $1",
            WALLET_COLUMNS
        );
        let row = log_database_query(
            "SELECT wallet BY account_number",
            sqlx::query_as::<_, WalletRow>(&sql)
                .bind(account_number)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<Transaction, AppError> {
        let sql = format!(
            "INSERT INTO transactions (id, user_id, tx_type, amount, fee, status, reference, description, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8) RETURNING {}",
            TX_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&tx.user_id)
            .bind(tx.tx_type.as_str())
            .bind(tx.amount)
            .bind(tx.fee)
            .bind(&tx.reference)
            .bind(&tx.description)
            .bind(&tx.metadata)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, &tx.reference))?;
        row.try_into()
    }

    async fn insert_transaction_if_absent(
        &self,
        tx: NewTransaction,
    ) -> Result<(Transaction, bool), AppError> {
        let sql = format!(
            "INSERT INTO transactions (id, user_id, tx_type, amount, fee, status, reference, description, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8) \
             ON CONFLICT (reference) DO NOTHING RETURNING {}",
            TX_COLUMNS
        );
        let inserted = log_database_query(
            "INSERT transaction IF ABSENT",
            sqlx::query_as::<_, TransactionRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(&tx.user_id)
                .bind(tx.tx_type.as_str())
                .bind(tx.amount)
                .bind(tx.fee)
                .bind(&tx.reference)
                .bind(&tx.description)
                .bind(&tx.metadata)
                .fetch_optional(&self.pool),
        )
        .await?;
        match inserted {
            Some(row) => Ok((row.try_into()?, true)),
            None => {
                let existing = self
                    .fetch_transaction(&tx.reference)
                    .await?
                    .ok_or_else(|| AppError::not_found("transaction", tx.reference.clone()))?;
                Ok((existing, false))
            }
        }
    }

    async fn find_transaction(&self, reference: &str) -> Result<Option<Transaction>, AppError> {
        self.fetch_transaction(reference).await
    }

    async fn reserve(&self, tx: NewTransaction) -> Result<(Transaction, Wallet), AppError> {
        let required = tx.reserved_total();
        let mut db_tx = self.pool.begin().await?;

        let debit_sql = format!(
            "UPDATE wallets SET balance = balance - $1, updated_at = NOW() \
             WHERE user_id = $2 AND balance >= $1 RETURNING {}",
            WALLET_COLUMNS
        );
        let debited = sqlx::query_as::<_, WalletRow>(&debit_sql)
            .bind(required)
            .bind(&tx.user_id)
            .fetch_optional(&mut *db_tx)
            .await?;

        let Some(wallet) = debited else {
            db_tx.rollback().await?;
            return match self.get_wallet(&tx.user_id).await? {
                Some(wallet) => Err(AppError::InsufficientFunds {
                    available: wallet.balance,
                    required,
                }),
                None => Err(AppError::not_found("wallet", tx.user_id.clone())),
            };
        };

        let insert_sql = format!(
            "INSERT INTO transactions (id, user_id, tx_type, amount, fee, status, reference, description, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8) RETURNING {}",
            TX_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&insert_sql)
            .bind(Uuid::new_v4())
            .bind(&tx.user_id)
            .bind(tx.tx_type.as_str())
            .bind(tx.amount)
            .bind(tx.fee)
            .bind(&tx.reference)
            .bind(&tx.description)
            .bind(&tx.metadata)
            .fetch_one(&mut *db_tx)
            .await
            .map_err(|e| map_insert_error(e, &tx.reference))?;

        db_tx.commit().await?;
        Ok((row.try_into()?, wallet.into()))
    }

    async fn settle(&self, reference: &str, transition: Transition) -> Result<Claim, AppError> {
        let mut db_tx = self.pool.begin().await?;

        let claim_sql = format!(
            "UPDATE transactions SET status = $2, metadata = metadata || $3::jsonb, updated_at = NOW() \
             WHERE reference = $1 AND status = 'pending' \
               AND NOT ($2 = 'completed' AND metadata ? 'amount_mismatch') RETURNING {}",
            TX_COLUMNS
        );
        let claimed = sqlx::query_as::<_, TransactionRow>(&claim_sql)
            .bind(reference)
            .bind(transition.status.as_str())
            .bind(transition.metadata.clone().unwrap_or_else(|| json!({})))
            .fetch_optional(&mut *db_tx)
            .await?;

        let Some(row) = claimed else {
            db_tx.rollback().await?;
            return Ok(match self.fetch_transaction(reference).await? {
                Some(existing) if existing.status == TransactionStatus::Pending => {
                    Claim::HeldForReview(existing)
                }
                Some(existing) => Claim::AlreadyTerminal(existing),
                None => Claim::NotFound,
            });
        };
        let transaction = Transaction::try_from(row)?;

        let wallet = match transition.effect {
            BalanceEffect::None => None,
            BalanceEffect::Credit(amount) => {
                let credit_sql = format!(
                    "UPDATE wallets SET balance = balance + $1, updated_at = NOW() \
                     WHERE user_id = $2 RETURNING {}",
                    WALLET_COLUMNS
                );
                let credited = sqlx::query_as::<_, WalletRow>(&credit_sql)
                    .bind(amount)
                    .bind(&transaction.user_id)
                    .fetch_optional(&mut *db_tx)
                    .await?;
                match credited {
                    Some(wallet) => Some(Wallet::from(wallet)),
                    None => {
                        db_tx.rollback().await?;
                        warn!(
                            reference = %reference,
                            user_id = %transaction.user_id,
                            "Credit target wallet missing, claim rolled back"
                        );
                        return Err(AppError::not_found("wallet", transaction.user_id));
                    }
                }
            }
        };

        db_tx.commit().await?;
        Ok(Claim::Claimed {
            transaction,
            wallet,
        })
    }

    async fn annotate(
        &self,
        reference: &str,
        patch: JsonValue,
    ) -> Result<Option<Transaction>, AppError> {
        let sql = format!(
            "UPDATE transactions SET metadata = metadata || $2::jsonb, updated_at = NOW() \
             WHERE reference = $1 RETURNING {}",
            TX_COLUMNS
        );
        let row = log_database_query(
            "UPDATE transaction metadata",
            sqlx::query_as::<_, TransactionRow>(&sql)
                .bind(reference)
                .bind(&patch)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE status = 'pending' AND created_at < $1 \
             AND NOT (metadata ? 'amount_mismatch') ORDER BY created_at ASC LIMIT $2",
            TX_COLUMNS
        );
        let rows = log_database_query(
            "SELECT pending transactions",
            sqlx::query_as::<_, TransactionRow>(&sql)
                .bind(created_before)
                .bind(limit)
                .fetch_all(&self.pool),
        )
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }
}
