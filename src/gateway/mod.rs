//! Payment Gateway Client
//!
//! Outbound-only abstraction over the external processor. Every call carries
//! the transaction reference and is safe to retry; de-duplication happens in
//! the ledger's idempotency guard, not here. A timed-out call reports
//! `AppError::GatewayTimeout` and its outcome must be treated as unknown.

pub mod http;
#[cfg(any(test, feature = "mock-gateway"))]
pub mod mock;
pub mod types;

use async_trait::async_trait;

use crate::error::AppError;

pub use http::HttpGateway;
#[cfg(any(test, feature = "mock-gateway"))]
pub use mock::MockGateway;
pub use types::*;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, AppError>;

    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccountDetails, AppError>;

    async fn verify(&self, reference: &str) -> Result<Verification, AppError>;

    /// Verify an outbound transfer. Providers that use one endpoint for both
    /// directions can rely on the default.
    async fn verify_payout(&self, reference: &str) -> Result<Verification, AppError> {
        self.verify(reference).await
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, AppError>;

    async fn debit_for_service(
        &self,
        request: &ServiceDebitRequest,
    ) -> Result<ServiceDebitOutcome, AppError>;
}
