//! Wallet-backed payment gateway with webhook and pull-based reconciliation.
//!
//! Money moves in minor units through a ledger whose idempotency guard lets
//! webhooks, client verification and the background sweep race safely on
//! the same transaction.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod reconciliation;
pub mod state_machine;
pub mod webhook;
