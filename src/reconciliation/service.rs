//! Reconciliation Service
//!
//! Orchestrates the user-facing money flows. Initiation creates the pending
//! transaction (and, for outflows, reserves funds) before any outbound call;
//! settlement always goes through [`TransactionStateMachine`], whether it was
//! triggered by a webhook, a client verify, or the background sweep.
//!
//! Outbound failures never settle anything on their own: a timed-out or
//! erroring call leaves the transaction pending for the next verify.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, LimitsConfig, MerchantConfig};
use crate::error::AppError;
use crate::gateway::{
    CheckoutRequest, ExternalStatus, PaymentGateway, PayoutRequest, ServiceDebitOutcome,
    ServiceDebitRequest, ServiceKind, Verification, VirtualAccountRequest,
};
use crate::ledger::LedgerStore;
use crate::logging::mask_account_number;
use crate::models::{
    format_minor, Direction, NewTransaction, Transaction, TransactionStatus, TransactionType,
    VirtualAccount, Wallet,
};
use crate::state_machine::{GatewayEvent, Outcome, TransactionStateMachine};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub amount: i64,
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub amount: i64,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub narration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServicePurchaseRequest {
    pub service: ServiceKind,
    pub provider: String,
    pub phone: String,
    pub amount: i64,
    pub plan: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VirtualAccountFunding {
    pub reference: String,
    pub account_number: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInitiated {
    pub reference: String,
    pub checkout_url: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantInfo {
    pub name: String,
    pub support_email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub message: String,
    pub transaction: Transaction,
    pub wallet: Option<Wallet>,
    pub merchant_info: MerchantInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementResult {
    pub transaction: Transaction,
    pub wallet: Option<Wallet>,
}

/// What a re-verification learned and what it changed.
#[derive(Debug, Clone)]
pub struct Reverification {
    pub verification: Verification,
    pub outcome: Option<Outcome>,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn validate_bank_details(request: &WithdrawalRequest) -> Result<(), AppError> {
    if request.account_number.len() != 10 || !all_digits(&request.account_number) {
        return Err(AppError::validation(
            "accountNumber must be a 10-digit NUBAN account number",
        ));
    }
    if !(3..=6).contains(&request.bank_code.len()) || !all_digits(&request.bank_code) {
        return Err(AppError::validation("bankCode must be 3 to 6 digits"));
    }
    let name = request.account_name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::validation(
            "accountName must be between 1 and 100 characters",
        ));
    }
    Ok(())
}

/// Nigerian mobile numbers: `080...`, `+23480...` or `23480...`.
fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    let local = if let Some(rest) = compact.strip_prefix("+234") {
        format!("0{}", rest)
    } else if let Some(rest) = compact.strip_prefix("234") {
        format!("0{}", rest)
    } else {
        compact
    };
    let valid = local.len() == 11
        && all_digits(&local)
        && local.starts_with('0')
        && matches!(local.as_bytes()[1], b'7' | b'8' | b'9');
    if valid {
        Ok(local)
    } else {
        Err(AppError::validation(format!(
            "'{}' is not a valid mobile number",
            raw
        )))
    }
}

fn check_range(kind: &str, amount: i64, min: i64, max: i64) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    if amount < min || amount > max {
        return Err(AppError::validation(format!(
            "{} amount must be between {} and {}",
            kind,
            format_minor(min),
            format_minor(max)
        )));
    }
    Ok(())
}

/// The state-machine event a verification implies, if any.
fn event_for(tx: &Transaction, verification: &Verification) -> Option<GatewayEvent> {
    if !verification.found {
        return None;
    }
    let reference = tx.reference.clone();
    match &verification.status {
        ExternalStatus::Success => Some(GatewayEvent::Confirmed {
            reference,
            amount_paid: verification.amount_paid,
        }),
        ExternalStatus::Failed => Some(GatewayEvent::Failed {
            reference,
            reason: "gateway reported failure".to_string(),
        }),
        ExternalStatus::Abandoned => Some(GatewayEvent::Failed {
            reference,
            reason: "payment abandoned".to_string(),
        }),
        ExternalStatus::Reversed => Some(GatewayEvent::Refunded { reference }),
        ExternalStatus::Pending | ExternalStatus::Unknown(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ReconciliationService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    machine: TransactionStateMachine,
    limits: LimitsConfig,
    merchant: MerchantConfig,
    currency: String,
    callback_url: Option<String>,
}

impl ReconciliationService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            machine: TransactionStateMachine::new(ledger.clone()),
            ledger,
            gateway,
            limits: config.limits.clone(),
            merchant: config.merchant.clone(),
            currency: config.gateway.currency.clone(),
            callback_url: config.gateway.callback_url.clone(),
        }
    }

    pub fn merchant_info(&self) -> MerchantInfo {
        MerchantInfo {
            name: self.merchant.name.clone(),
            support_email: self.merchant.support_email.clone(),
        }
    }

    /// Route a gateway event through the state machine.
    pub async fn apply_event(&self, event: GatewayEvent) -> Result<Outcome, AppError> {
        self.machine.apply(event).await
    }

    async fn owned_transaction(
        &self,
        user_id: &str,
        reference: &str,
    ) -> Result<Transaction, AppError> {
        self.ledger
            .find_transaction(reference)
            .await?
            .filter(|tx| tx.user_id == user_id)
            .ok_or_else(|| AppError::not_found("transaction", reference))
    }

    async fn reload(&self, reference: &str) -> Result<Transaction, AppError> {
        self.ledger
            .find_transaction(reference)
            .await?
            .ok_or_else(|| AppError::not_found("transaction", reference))
    }

    #[instrument(skip(self, request), fields(user_id = %user_id, amount = request.amount))]
    pub async fn initiate_deposit(
        &self,
        user_id: &str,
        request: DepositRequest,
    ) -> Result<DepositInitiated, AppError> {
        check_range(
            "deposit",
            request.amount,
            self.limits.min_deposit,
            self.limits.max_deposit,
        )?;
        self.ledger.get_or_create_wallet(user_id).await?;

        let tx = self
            .ledger
            .insert_transaction(
                NewTransaction::new(user_id, TransactionType::Deposit, request.amount)
                    .with_description("Wallet funding via checkout")
                    .with_metadata(json!({ "channel": "checkout" })),
            )
            .await?;
        info!(reference = %tx.reference, "Deposit initiated");

        let session = self
            .gateway
            .create_checkout(&CheckoutRequest {
                reference: tx.reference.clone(),
                amount: tx.amount,
                currency: self.currency.clone(),
                customer_email: request.email,
                callback_url: request.callback_url.or_else(|| self.callback_url.clone()),
            })
            .await
            .inspect_err(|e| {
                warn!(
                    reference = %tx.reference,
                    error = %e,
                    "Checkout creation failed, deposit left pending"
                )
            })?;

        let tx = self
            .ledger
            .annotate(
                &tx.reference,
                json!({
                    "checkout_url": session.checkout_url,
                    "access_code": session.access_code,
                }),
            )
            .await?
            .unwrap_or(tx);

        Ok(DepositInitiated {
            reference: tx.reference.clone(),
            checkout_url: session.checkout_url,
            transaction: tx,
        })
    }

    /// Ask the gateway about a pending transaction and apply what it says.
    pub async fn reverify(&self, tx: &Transaction) -> Result<Reverification, AppError> {
        let verification = match tx.direction() {
            Direction::Inflow => self.gateway.verify(&tx.reference).await?,
            Direction::Outflow => self.gateway.verify_payout(&tx.reference).await?,
        };
        let outcome = match event_for(tx, &verification) {
            Some(event) => Some(self.machine.apply(event).await?),
            None => None,
        };
        Ok(Reverification {
            verification,
            outcome,
        })
    }

    /// Pull path. Converges with the webhook path through the guard, so it
    /// is safe to run before, after or during a webhook for the same
    /// reference.
    #[instrument(skip(self), fields(user_id = %user_id, reference = %reference))]
    pub async fn verify_deposit(
        &self,
        user_id: &str,
        reference: &str,
    ) -> Result<VerifyResult, AppError> {
        let tx = self.owned_transaction(user_id, reference).await?;
        if !tx.status.is_terminal() {
            self.reverify(&tx).await?;
        }

        let tx = self.reload(reference).await?;
        let wallet = self.ledger.get_wallet(user_id).await?;
        let (success, code, message) = match tx.status {
            TransactionStatus::Completed => (true, None, "Transaction completed".to_string()),
            TransactionStatus::Pending if tx.is_held_for_review() => (
                false,
                Some("AMOUNT_MISMATCH"),
                "Paid amount differs from the requested amount; held for review".to_string(),
            ),
            TransactionStatus::Pending => (
                false,
                Some("PENDING"),
                "Payment has not been confirmed yet".to_string(),
            ),
            TransactionStatus::Failed => (false, Some("FAILED"), "Transaction failed".to_string()),
            TransactionStatus::Refunded => (
                false,
                Some("REFUNDED"),
                "Transaction was refunded".to_string(),
            ),
        };

        Ok(VerifyResult {
            success,
            code,
            message,
            transaction: tx,
            wallet,
            merchant_info: self.merchant_info(),
        })
    }

    #[instrument(
        skip(self, request),
        fields(user_id = %user_id, amount = request.amount, account = %mask_account_number(&request.account_number))
    )]
    pub async fn withdraw(
        &self,
        user_id: &str,
        request: WithdrawalRequest,
    ) -> Result<MovementResult, AppError> {
        validate_bank_details(&request)?;
        check_range(
            "withdrawal",
            request.amount,
            self.limits.min_withdrawal,
            self.limits.max_withdrawal,
        )?;

        let narration = request
            .narration
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Wallet withdrawal".to_string());
        let new_tx = NewTransaction::new(user_id, TransactionType::Withdrawal, request.amount)
            .with_fee(self.limits.withdrawal_fee)
            .with_description(format!(
                "Withdrawal to {} {}",
                request.bank_code,
                mask_account_number(&request.account_number)
            ))
            .with_metadata(json!({
                "bank_code": request.bank_code,
                "account_number": request.account_number,
                "account_name": request.account_name.trim(),
                "narration": narration,
            }));

        let (tx, wallet) = match self.ledger.reserve(new_tx).await {
            Ok(reserved) => reserved,
            // No wallet yet means nothing to withdraw.
            Err(AppError::NotFound { entity: "wallet", .. }) => {
                return Err(AppError::InsufficientFunds {
                    available: 0,
                    required: request.amount.saturating_add(self.limits.withdrawal_fee),
                })
            }
            Err(e) => return Err(e),
        };
        info!(
            reference = %tx.reference,
            reserved = tx.reserved_total(),
            balance = wallet.balance,
            "Withdrawal funds reserved"
        );

        let payout = self
            .gateway
            .initiate_payout(&PayoutRequest {
                reference: tx.reference.clone(),
                amount: tx.amount,
                currency: self.currency.clone(),
                bank_code: request.bank_code,
                account_number: request.account_number,
                account_name: request.account_name.trim().to_string(),
                narration,
            })
            .await;

        match payout {
            Ok(receipt) if receipt.accepted => {
                let tx = self
                    .ledger
                    .annotate(
                        &tx.reference,
                        json!({ "transfer_code": receipt.transfer_code, "gateway_message": receipt.message }),
                    )
                    .await?
                    .unwrap_or(tx);
                Ok(MovementResult {
                    transaction: tx,
                    wallet: Some(wallet),
                })
            }
            Ok(receipt) => {
                warn!(reference = %tx.reference, message = %receipt.message, "Payout rejected by gateway");
                self.settle_now(
                    GatewayEvent::Failed {
                        reference: tx.reference.clone(),
                        reason: receipt.message,
                    },
                    user_id,
                )
                .await
            }
            Err(e) => {
                warn!(
                    reference = %tx.reference,
                    error = %e,
                    "Payout outcome unknown, withdrawal left pending"
                );
                let tx = self
                    .ledger
                    .annotate(&tx.reference, json!({ "last_gateway_error": e.to_string() }))
                    .await?
                    .unwrap_or(tx);
                Ok(MovementResult {
                    transaction: tx,
                    wallet: Some(wallet),
                })
            }
        }
    }

    #[instrument(skip(self, request), fields(user_id = %user_id, amount = request.amount, service = request.service.as_str()))]
    pub async fn purchase_service(
        &self,
        user_id: &str,
        request: ServicePurchaseRequest,
    ) -> Result<MovementResult, AppError> {
        let phone = normalize_phone(&request.phone)?;
        let provider = request.provider.trim().to_lowercase();
        if provider.is_empty() {
            return Err(AppError::validation("provider is required"));
        }
        if request.service == ServiceKind::Data && request.plan.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(AppError::validation("plan is required for data purchases"));
        }
        check_range(
            "service purchase",
            request.amount,
            1,
            self.limits.max_service_purchase,
        )?;

        let new_tx = NewTransaction::new(user_id, TransactionType::ServicePurchase, request.amount)
            .with_description(format!("{} {} for {}", provider, request.service.as_str(), phone))
            .with_metadata(json!({
                "service": request.service.as_str(),
                "provider": provider,
                "phone": phone,
                "plan": request.plan,
            }));
        let (tx, wallet) = match self.ledger.reserve(new_tx).await {
            Ok(reserved) => reserved,
            Err(AppError::NotFound { entity: "wallet", .. }) => {
                return Err(AppError::InsufficientFunds {
                    available: 0,
                    required: request.amount,
                })
            }
            Err(e) => return Err(e),
        };

        let outcome = self
            .gateway
            .debit_for_service(&ServiceDebitRequest {
                reference: tx.reference.clone(),
                service: request.service,
                provider,
                phone,
                amount: tx.amount,
                plan: request.plan,
            })
            .await;

        match outcome {
            Ok(ServiceDebitOutcome::Delivered) => {
                self.settle_now(
                    GatewayEvent::Confirmed {
                        reference: tx.reference.clone(),
                        amount_paid: None,
                    },
                    user_id,
                )
                .await
            }
            Ok(ServiceDebitOutcome::Rejected(reason)) => {
                warn!(reference = %tx.reference, reason = %reason, "Service purchase rejected");
                self.settle_now(
                    GatewayEvent::Failed {
                        reference: tx.reference.clone(),
                        reason,
                    },
                    user_id,
                )
                .await
            }
            Ok(ServiceDebitOutcome::Queued) => Ok(MovementResult {
                transaction: tx,
                wallet: Some(wallet),
            }),
            Err(e) => {
                warn!(
                    reference = %tx.reference,
                    error = %e,
                    "Service purchase outcome unknown, left pending"
                );
                Ok(MovementResult {
                    transaction: tx,
                    wallet: Some(wallet),
                })
            }
        }
    }

    /// Apply a synchronous verdict and report the resulting state.
    async fn settle_now(&self, event: GatewayEvent, user_id: &str) -> Result<MovementResult, AppError> {
        let reference = event.reference().to_string();
        self.machine.apply(event).await?;
        Ok(MovementResult {
            transaction: self.reload(&reference).await?,
            wallet: self.ledger.get_wallet(user_id).await?,
        })
    }

    /// Create-or-fetch the user's dedicated account.
    #[instrument(skip(self, email), fields(user_id = %user_id))]
    pub async fn provision_virtual_account(
        &self,
        user_id: &str,
        email: Option<String>,
        preferred_bank: Option<String>,
    ) -> Result<Wallet, AppError> {
        let wallet = self.ledger.get_or_create_wallet(user_id).await?;
        if wallet.has_virtual_account() {
            return Ok(wallet);
        }

        let details = self
            .gateway
            .create_virtual_account(&VirtualAccountRequest {
                user_id: user_id.to_string(),
                customer_email: email,
                preferred_bank,
            })
            .await?;
        let wallet = self
            .ledger
            .set_virtual_account(
                user_id,
                &VirtualAccount {
                    provider_account_id: details.provider_account_id,
                    account_number: details.account_number,
                    account_name: details.account_name,
                    bank_name: details.bank_name,
                },
            )
            .await?;
        info!(
            account = %wallet
                .virtual_account
                .as_ref()
                .map(|va| mask_account_number(&va.account_number))
                .unwrap_or_default(),
            "Virtual account provisioned"
        );
        Ok(wallet)
    }

    /// Funding pushed to a virtual account, keyed by the payment's own
    /// reference: recorded if new, then settled like any deposit.
    #[instrument(skip(self, funding), fields(reference = %funding.reference, account = %mask_account_number(&funding.account_number)))]
    pub async fn handle_virtual_account_funding(
        &self,
        funding: VirtualAccountFunding,
    ) -> Result<Outcome, AppError> {
        let Some(wallet) = self
            .ledger
            .find_wallet_by_account_number(&funding.account_number)
            .await?
        else {
            warn!("Funding for unknown virtual account, ignoring");
            return Ok(Outcome::UnknownReference(funding.reference));
        };

        let (tx, inserted) = self
            .ledger
            .insert_transaction_if_absent(
                NewTransaction::new(&wallet.user_id, TransactionType::Deposit, funding.amount)
                    .with_reference(&funding.reference)
                    .with_description("Wallet funding via virtual account")
                    .with_metadata(json!({
                        "channel": "virtual_account",
                        "account_number": mask_account_number(&funding.account_number),
                    })),
            )
            .await?;
        // An existing row only counts if it is this wallet's deposit.
        if !inserted && (tx.user_id != wallet.user_id || tx.tx_type != TransactionType::Deposit) {
            warn!(
                owner = %tx.user_id,
                account_owner = %wallet.user_id,
                tx_type = %tx.tx_type,
                "Funding reference collides with an unrelated transaction, ignoring"
            );
            return Ok(Outcome::UnknownReference(funding.reference));
        }

        self.machine
            .apply(GatewayEvent::Confirmed {
                reference: funding.reference,
                amount_paid: Some(funding.amount),
            })
            .await
    }

    pub async fn wallet_snapshot(&self, user_id: &str) -> Result<Wallet, AppError> {
        self.ledger
            .get_wallet(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("wallet", user_id))
    }

    pub async fn get_transaction(
        &self,
        user_id: &str,
        reference: &str,
    ) -> Result<Transaction, AppError> {
        self.owned_transaction(user_id, reference).await
    }

    pub async fn pending_transactions(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        self.ledger.list_pending(created_before, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn withdrawal(account: &str, bank: &str, name: &str) -> WithdrawalRequest {
        WithdrawalRequest {
            amount: 1_000,
            bank_code: bank.to_string(),
            account_number: account.to_string(),
            account_name: name.to_string(),
            narration: None,
        }
    }

    #[test]
    fn bank_details_require_nuban_and_bank_code() {
        assert!(validate_bank_details(&withdrawal("0123456789", "058", "Ada Obi")).is_ok());
        assert!(validate_bank_details(&withdrawal("012345678", "058", "Ada Obi")).is_err());
        assert!(validate_bank_details(&withdrawal("01234567ab", "058", "Ada Obi")).is_err());
        assert!(validate_bank_details(&withdrawal("0123456789", "05", "Ada Obi")).is_err());
        assert!(validate_bank_details(&withdrawal("0123456789", "058", "  ")).is_err());
    }

    #[test]
    fn phone_numbers_are_normalized() {
        assert_eq!(normalize_phone("08031234567").unwrap(), "08031234567");
        assert_eq!(normalize_phone("+234 803 123 4567").unwrap(), "08031234567");
        assert_eq!(normalize_phone("2349031234567").unwrap(), "09031234567");
        assert!(normalize_phone("0603123456").is_err());
        assert!(normalize_phone("phone").is_err());
    }

    #[test]
    fn range_check_reports_major_units() {
        let err = check_range("deposit", 50, 10_000, 1_000_000).unwrap_err();
        assert!(err.to_string().contains("100.00"));
        assert!(check_range("deposit", 10_000, 10_000, 1_000_000).is_ok());
        assert!(check_range("deposit", -1, 0, 10).is_err());
    }

    #[test]
    fn verification_maps_to_events() {
        let tx = NewTransaction::new("u1", TransactionType::Deposit, 100)
            .with_reference("D1")
            .into_transaction();
        assert!(event_for(&tx, &Verification::not_found()).is_none());
        assert!(event_for(&tx, &Verification::with_status(ExternalStatus::Pending)).is_none());
        assert_eq!(
            event_for(&tx, &Verification::success(100)),
            Some(GatewayEvent::Confirmed {
                reference: "D1".into(),
                amount_paid: Some(100)
            })
        );
        assert!(matches!(
            event_for(&tx, &Verification::with_status(ExternalStatus::Abandoned)),
            Some(GatewayEvent::Failed { .. })
        ));
        assert!(matches!(
            event_for(&tx, &Verification::with_status(ExternalStatus::Reversed)),
            Some(GatewayEvent::Refunded { .. })
        ));
    }
}
