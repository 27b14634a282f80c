//! PostgreSQL ledger tests.
//!
//! Run with a scratch database:
//! `DATABASE_URL=postgres://localhost/wallet_test cargo test -- --ignored`

#![cfg(feature = "database")]

use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;
use wallet_gateway::error::AppError;
use wallet_gateway::ledger::{BalanceEffect, Claim, LedgerStore, PgLedger, Transition};
use wallet_gateway::models::{NewTransaction, TransactionStatus, TransactionType, VirtualAccount};

async fn ledger() -> Arc<PgLedger> {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/wallet_test".to_string());
    let ledger = PgLedger::connect(&url, 10).await.unwrap();
    ledger.ensure_schema().await.unwrap();
    Arc::new(ledger)
}

fn user() -> String {
    format!("pg-test-{}", Uuid::new_v4().simple())
}

async fn fund(ledger: &PgLedger, user: &str, amount: i64) {
    ledger.get_or_create_wallet(user).await.unwrap();
    let tx = ledger
        .insert_transaction(NewTransaction::new(user, TransactionType::Deposit, amount))
        .await
        .unwrap();
    ledger
        .settle(
            &tx.reference,
            Transition::new(TransactionStatus::Completed, BalanceEffect::Credit(amount)),
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL database"]
async fn concurrent_settles_credit_once() {
    let ledger = ledger().await;
    let user = user();
    ledger.get_or_create_wallet(&user).await.unwrap();
    let tx = ledger
        .insert_transaction(NewTransaction::new(&user, TransactionType::Deposit, 500_000))
        .await
        .unwrap();

    let claims = join_all((0..16).map(|_| {
        let ledger = ledger.clone();
        let reference = tx.reference.clone();
        tokio::spawn(async move {
            ledger
                .settle(
                    &reference,
                    Transition::new(TransactionStatus::Completed, BalanceEffect::Credit(500_000)),
                )
                .await
                .unwrap()
        })
    }))
    .await;
    let won = claims
        .into_iter()
        .filter(|c| matches!(c.as_ref().unwrap(), Claim::Claimed { .. }))
        .count();
    assert_eq!(won, 1);
    assert_eq!(
        ledger.get_wallet(&user).await.unwrap().unwrap().balance,
        500_000
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL database"]
async fn concurrent_reservations_never_overdraw() {
    let ledger = ledger().await;
    let user = user();
    fund(&ledger, &user, 1_000_000).await;

    let results = join_all((0..10).map(|_| {
        let ledger = ledger.clone();
        let user = user.clone();
        tokio::spawn(async move {
            ledger
                .reserve(NewTransaction::new(&user, TransactionType::Withdrawal, 300_000))
                .await
        })
    }))
    .await;
    let accepted = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_ok())
        .count();
    assert_eq!(accepted, 3);
    assert!(results.iter().all(|r| match r.as_ref().unwrap() {
        Ok(_) => true,
        Err(e) => matches!(e, AppError::InsufficientFunds { .. }),
    }));
    assert_eq!(
        ledger.get_wallet(&user).await.unwrap().unwrap().balance,
        100_000
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn duplicate_wallet_and_reference_are_reported() {
    let ledger = ledger().await;
    let user = user();
    ledger.create_wallet(&user).await.unwrap();
    assert!(matches!(
        ledger.create_wallet(&user).await,
        Err(AppError::DuplicateWallet { .. })
    ));

    let reference = format!("PSK_{}", Uuid::new_v4().simple());
    let new_tx = || {
        NewTransaction::new(&user, TransactionType::Deposit, 10_000).with_reference(&reference)
    };
    let (_, inserted) = ledger.insert_transaction_if_absent(new_tx()).await.unwrap();
    assert!(inserted);
    let (existing, inserted) = ledger.insert_transaction_if_absent(new_tx()).await.unwrap();
    assert!(!inserted);
    assert_eq!(existing.reference, reference);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn virtual_account_lookup_and_annotation() {
    let ledger = ledger().await;
    let user = user();
    ledger.create_wallet(&user).await.unwrap();
    let account_number = format!("99{:08}", rand_suffix());
    ledger
        .set_virtual_account(
            &user,
            &VirtualAccount {
                provider_account_id: "va_1".to_string(),
                account_number: account_number.clone(),
                account_name: "WALLET/test".to_string(),
                bank_name: "Test Bank".to_string(),
            },
        )
        .await
        .unwrap();
    let found = ledger
        .find_wallet_by_account_number(&account_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.user_id, user);

    let tx = ledger
        .insert_transaction(NewTransaction::new(&user, TransactionType::Deposit, 10_000))
        .await
        .unwrap();
    let annotated = ledger
        .annotate(&tx.reference, serde_json::json!({ "amount_mismatch": { "paid": 1 } }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(annotated.metadata["amount_mismatch"]["paid"], 1);
    let pending = ledger
        .list_pending(chrono::Utc::now() + chrono::Duration::seconds(1), 1_000)
        .await
        .unwrap();
    assert!(pending.iter().all(|p| p.reference != tx.reference));
}

fn rand_suffix() -> u32 {
    Uuid::new_v4().as_u128() as u32 % 100_000_000
}
