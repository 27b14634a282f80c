//! Reconciliation: user-facing money flows and the background sweep that
//! re-verifies stale pending transactions.

pub mod service;
pub mod sweeper;

pub use service::{
    DepositInitiated, DepositRequest, MerchantInfo, MovementResult, ReconciliationService,
    Reverification, ServicePurchaseRequest, VerifyResult, VirtualAccountFunding,
    WithdrawalRequest,
};
pub use sweeper::{ReconciliationSweeper, SweepReport};
