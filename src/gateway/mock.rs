//! Scripted in-process gateway
//!
//! Records every call and answers from scripted state. Backs the `mock`
//! provider for local development and the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::types::*;
use super::PaymentGateway;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutBehavior {
    Accept,
    Reject(String),
    Timeout,
    /// 2xx whose body could not be read.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceBehavior {
    Deliver,
    Queue,
    Reject(String),
    Timeout,
    Unreadable,
}

fn unreadable(operation: &str) -> AppError {
    AppError::Gateway(format!("{} returned 200 OK without a readable result", operation))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockGateway {
    /// Amounts by reference for checkouts, accepted payouts and queued
    /// service debits; auto-confirm answers from here.
    checkouts: Mutex<HashMap<String, i64>>,
    verifications: Mutex<HashMap<String, Verification>>,
    payouts: Mutex<Vec<PayoutRequest>>,
    auto_confirm: Mutex<bool>,
    verify_timeout: Mutex<bool>,
    fail_checkout: Mutex<bool>,
    payout_behavior: Mutex<PayoutBehavior>,
    service_behavior: Mutex<ServiceBehavior>,
    latency: Mutex<Option<Duration>>,
    checkout_count: AtomicUsize,
    verify_count: AtomicUsize,
    payout_count: AtomicUsize,
    service_count: AtomicUsize,
    virtual_account_count: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            checkouts: Mutex::new(HashMap::new()),
            verifications: Mutex::new(HashMap::new()),
            payouts: Mutex::new(Vec::new()),
            auto_confirm: Mutex::new(false),
            verify_timeout: Mutex::new(false),
            fail_checkout: Mutex::new(false),
            payout_behavior: Mutex::new(PayoutBehavior::Accept),
            service_behavior: Mutex::new(ServiceBehavior::Deliver),
            latency: Mutex::new(None),
            checkout_count: AtomicUsize::new(0),
            verify_count: AtomicUsize::new(0),
            payout_count: AtomicUsize::new(0),
            service_count: AtomicUsize::new(0),
            virtual_account_count: AtomicUsize::new(0),
        }
    }

    /// Script the answer `verify`/`verify_payout` gives for `reference`.
    pub fn set_verification(&self, reference: &str, verification: Verification) {
        lock(&self.verifications).insert(reference.to_string(), verification);
    }

    /// Unscripted checkout references verify as paid in full.
    pub fn set_auto_confirm(&self, enabled: bool) {
        *lock(&self.auto_confirm) = enabled;
    }

    pub fn set_verify_timeout(&self, timeout: bool) {
        *lock(&self.verify_timeout) = timeout;
    }

    pub fn set_fail_checkout(&self, fail: bool) {
        *lock(&self.fail_checkout) = fail;
    }

    pub fn set_payout_behavior(&self, behavior: PayoutBehavior) {
        *lock(&self.payout_behavior) = behavior;
    }

    pub fn set_service_behavior(&self, behavior: ServiceBehavior) {
        *lock(&self.service_behavior) = behavior;
    }

    /// Delay every call, widening race windows in concurrency tests.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn checkout_count(&self) -> usize {
        self.checkout_count.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.verify_count.load(Ordering::SeqCst)
    }

    pub fn payout_count(&self) -> usize {
        self.payout_count.load(Ordering::SeqCst)
    }

    pub fn service_count(&self) -> usize {
        self.service_count.load(Ordering::SeqCst)
    }

    pub fn virtual_account_count(&self) -> usize {
        self.virtual_account_count.load(Ordering::SeqCst)
    }

    pub fn payouts(&self) -> Vec<PayoutRequest> {
        lock(&self.payouts).clone()
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.latency);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    fn scripted_verification(&self, reference: &str) -> Result<Verification, AppError> {
        if *lock(&self.verify_timeout) {
            return Err(AppError::GatewayTimeout {
                operation: "verify".to_string(),
            });
        }
        if let Some(scripted) = lock(&self.verifications).get(reference) {
            return Ok(scripted.clone());
        }
        let checkout = lock(&self.checkouts).get(reference).copied();
        Ok(match checkout {
            Some(amount) if *lock(&self.auto_confirm) => Verification::success(amount),
            Some(_) => Verification::with_status(ExternalStatus::Pending),
            None => Verification::not_found(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, AppError> {
        self.checkout_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if *lock(&self.fail_checkout) {
            return Err(AppError::Gateway("mock checkout failure".to_string()));
        }
        lock(&self.checkouts).insert(request.reference.clone(), request.amount);
        Ok(CheckoutSession {
            reference: request.reference.clone(),
            checkout_url: format!("https://checkout.mock/{}", request.reference),
            access_code: Some(format!("ac_{}", request.reference)),
        })
    }

    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccountDetails, AppError> {
        let n = self.virtual_account_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate_latency().await;
        Ok(VirtualAccountDetails {
            provider_account_id: format!("mock_va_{}", n),
            account_number: format!("99{:08}", n),
            account_name: format!("WALLET/{}", request.user_id),
            bank_name: "Mock Bank".to_string(),
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, AppError> {
        self.verify_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.scripted_verification(reference)
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, AppError> {
        self.payout_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        lock(&self.payouts).push(request.clone());
        let behavior = lock(&self.payout_behavior).clone();
        match behavior {
            PayoutBehavior::Accept => {
                lock(&self.checkouts).insert(request.reference.clone(), request.amount);
                Ok(PayoutReceipt {
                    accepted: true,
                    transfer_code: Some(format!("TRF_{}", request.reference)),
                    message: "Transfer has been queued".to_string(),
                })
            }
            PayoutBehavior::Reject(message) => Ok(PayoutReceipt {
                accepted: false,
                transfer_code: None,
                message,
            }),
            PayoutBehavior::Timeout => Err(AppError::GatewayTimeout {
                operation: "initiate_payout".to_string(),
            }),
            PayoutBehavior::Unreadable => Err(unreadable("initiate_payout")),
        }
    }

    async fn debit_for_service(
        &self,
        request: &ServiceDebitRequest,
    ) -> Result<ServiceDebitOutcome, AppError> {
        self.service_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let behavior = lock(&self.service_behavior).clone();
        match behavior {
            ServiceBehavior::Deliver => Ok(ServiceDebitOutcome::Delivered),
            ServiceBehavior::Queue => {
                lock(&self.checkouts).insert(request.reference.clone(), request.amount);
                Ok(ServiceDebitOutcome::Queued)
            }
            ServiceBehavior::Reject(reason) => Ok(ServiceDebitOutcome::Rejected(reason)),
            ServiceBehavior::Timeout => Err(AppError::GatewayTimeout {
                operation: "debit_for_service".to_string(),
            }),
            ServiceBehavior::Unreadable => Err(unreadable("debit_for_service")),
        }
    }
}
