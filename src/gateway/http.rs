//! HTTP gateway client for a Paystack-compatible processor API
//!
//! Responses are wrapped in `{"status": bool, "message": str, "data": {...}}`.
//! Only a 4xx or an explicit `status: false` envelope is a rejection. 5xx,
//! transport failures and 2xx bodies that cannot be read are indeterminate
//! and surface as errors so callers keep the transaction pending.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use super::types::*;
use super::PaymentGateway;
use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::logging::redact_sensitive_data;
use crate::middleware::logging::log_external_call;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

struct Reply<T> {
    status: StatusCode,
    envelope: Option<Envelope<T>>,
}

/// Definitive answer from the processor.
enum Verdict<T> {
    Accepted(T),
    Rejected(String),
}

impl<T> Reply<T> {
    fn message(&self) -> String {
        self.envelope
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.status.to_string())
    }

    fn verdict(self, operation: &str) -> Result<Verdict<T>, AppError> {
        let message = self.message();
        if self.status.is_client_error() {
            return Ok(Verdict::Rejected(message));
        }
        if !self.status.is_success() {
            return Err(server_error(operation, &self));
        }
        match self.envelope {
            Some(Envelope { status: false, .. }) => Ok(Verdict::Rejected(message)),
            Some(Envelope {
                data: Some(data), ..
            }) => Ok(Verdict::Accepted(data)),
            _ => {
                warn!(operation, status = %self.status, "Gateway answered without a readable result");
                Err(AppError::Gateway(format!(
                    "{} returned {} without a readable result",
                    operation, self.status
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BankData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DedicatedAccountData {
    id: JsonValue,
    account_number: String,
    account_name: String,
    bank: BankData,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    transfer_code: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BillData {
    status: String,
}

fn transport_error(operation: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::GatewayTimeout {
            operation: operation.to_string(),
        }
    } else {
        AppError::Gateway(format!("{} request failed: {}", operation, err))
    }
}

fn server_error<T>(operation: &str, reply: &Reply<T>) -> AppError {
    AppError::Gateway(format!("{} returned {}: {}", operation, reply.status, reply.message()))
}

pub struct HttpGateway {
    client: Client,
    name: String,
    base_url: String,
    secret_key: String,
    callback_url: Option<String>,
    preferred_bank: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            callback_url: config.callback_url.clone(),
            preferred_bank: config.preferred_bank.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<Reply<T>, AppError> {
        log_external_call(&self.name, endpoint, async {
            let response = request
                .bearer_auth(&self.secret_key)
                .send()
                .await
                .map_err(|e| transport_error(operation, e))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(operation, e))?;
            let envelope = serde_json::from_slice::<Envelope<T>>(&body).ok();
            if envelope.is_none() {
                debug!(
                    operation,
                    status = %status,
                    body = %redact_sensitive_data(&String::from_utf8_lossy(&body)),
                    "Unparseable gateway response body"
                );
            }
            Ok::<_, AppError>(Reply { status, envelope })
        })
        .await
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, AppError> {
        let mut body = json!({
            "amount": request.amount,
            "reference": request.reference,
            "currency": request.currency,
        });
        if let Some(email) = &request.customer_email {
            body["email"] = json!(email);
        }
        if let Some(callback) = request.callback_url.as_ref().or(self.callback_url.as_ref()) {
            body["callback_url"] = json!(callback);
        }

        let reply: Reply<InitializeData> = self
            .execute(
                "create_checkout",
                "POST /transaction/initialize",
                self.client.post(self.url("/transaction/initialize")).json(&body),
            )
            .await?;
        let data = match reply.verdict("create_checkout")? {
            Verdict::Accepted(data) => data,
            Verdict::Rejected(message) => {
                return Err(AppError::Gateway(format!("checkout rejected: {}", message)))
            }
        };
        Ok(CheckoutSession {
            reference: data.reference.unwrap_or_else(|| request.reference.clone()),
            checkout_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccountDetails, AppError> {
        let mut body = json!({ "customer": request.user_id });
        if let Some(email) = &request.customer_email {
            body["email"] = json!(email);
        }
        if let Some(bank) = request.preferred_bank.as_ref().or(self.preferred_bank.as_ref()) {
            body["preferred_bank"] = json!(bank);
        }

        let reply: Reply<DedicatedAccountData> = self
            .execute(
                "create_virtual_account",
                "POST /dedicated_account",
                self.client.post(self.url("/dedicated_account")).json(&body),
            )
            .await?;
        let data = match reply.verdict("create_virtual_account")? {
            Verdict::Accepted(data) => data,
            Verdict::Rejected(message) => {
                return Err(AppError::Gateway(format!(
                    "virtual account rejected: {}",
                    message
                )))
            }
        };
        let provider_account_id = match data.id {
            JsonValue::String(s) => s,
            other => other.to_string(),
        };
        Ok(VirtualAccountDetails {
            provider_account_id,
            account_number: data.account_number,
            account_name: data.account_name,
            bank_name: data.bank.name,
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, AppError> {
        let path = format!("/transaction/verify/{}", reference);
        let reply: Reply<VerifyData> = self
            .execute(
                "verify",
                "GET /transaction/verify/{reference}",
                self.client.get(self.url(&path)),
            )
            .await?;
        interpret_verification("verify", reference, reply)
    }

    async fn verify_payout(&self, reference: &str) -> Result<Verification, AppError> {
        let path = format!("/transfer/verify/{}", reference);
        let reply: Reply<VerifyData> = self
            .execute(
                "verify_payout",
                "GET /transfer/verify/{reference}",
                self.client.get(self.url(&path)),
            )
            .await?;
        interpret_verification("verify_payout", reference, reply)
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, AppError> {
        let recipient: Reply<RecipientData> = self
            .execute(
                "create_recipient",
                "POST /transferrecipient",
                self.client.post(self.url("/transferrecipient")).json(&json!({
                    "type": "nuban",
                    "name": request.account_name,
                    "account_number": request.account_number,
                    "bank_code": request.bank_code,
                    "currency": request.currency,
                })),
            )
            .await?;
        let recipient = match recipient.verdict("create_recipient")? {
            Verdict::Accepted(data) => data,
            Verdict::Rejected(message) => {
                warn!(reference = %request.reference, message = %message, "Transfer recipient rejected");
                return Ok(PayoutReceipt {
                    accepted: false,
                    transfer_code: None,
                    message,
                });
            }
        };

        let transfer: Reply<TransferData> = self
            .execute(
                "initiate_payout",
                "POST /transfer",
                self.client.post(self.url("/transfer")).json(&json!({
                    "source": "balance",
                    "amount": request.amount,
                    "recipient": recipient.recipient_code,
                    "reference": request.reference,
                    "reason": request.narration,
                })),
            )
            .await?;
        let message = transfer.message();
        match transfer.verdict("initiate_payout")? {
            Verdict::Accepted(data) => {
                let rejected = data
                    .status
                    .as_deref()
                    .map(ExternalStatus::parse)
                    .is_some_and(|s| s == ExternalStatus::Failed);
                Ok(PayoutReceipt {
                    accepted: !rejected,
                    transfer_code: data.transfer_code,
                    message,
                })
            }
            Verdict::Rejected(message) => Ok(PayoutReceipt {
                accepted: false,
                transfer_code: None,
                message,
            }),
        }
    }

    async fn debit_for_service(
        &self,
        request: &ServiceDebitRequest,
    ) -> Result<ServiceDebitOutcome, AppError> {
        let mut body = json!({
            "service": request.service.as_str(),
            "provider": request.provider,
            "phone": request.phone,
            "amount": request.amount,
            "reference": request.reference,
        });
        if let Some(plan) = &request.plan {
            body["plan"] = json!(plan);
        }
        let reply: Reply<BillData> = self
            .execute(
                "debit_for_service",
                "POST /bills/purchase",
                self.client.post(self.url("/bills/purchase")).json(&body),
            )
            .await?;
        let message = reply.message();
        Ok(match reply.verdict("debit_for_service")? {
            Verdict::Accepted(data) => match ExternalStatus::parse(&data.status) {
                ExternalStatus::Success => ServiceDebitOutcome::Delivered,
                ExternalStatus::Failed | ExternalStatus::Reversed => {
                    ServiceDebitOutcome::Rejected(message)
                }
                _ => ServiceDebitOutcome::Queued,
            },
            Verdict::Rejected(message) => ServiceDebitOutcome::Rejected(message),
        })
    }
}

fn interpret_verification(
    operation: &str,
    reference: &str,
    reply: Reply<VerifyData>,
) -> Result<Verification, AppError> {
    if reply.status.is_server_error() {
        return Err(server_error(operation, &reply));
    }
    // Unknown references come back as 400 or 404 depending on the endpoint.
    if reply.status == StatusCode::NOT_FOUND || reply.status == StatusCode::BAD_REQUEST {
        debug!(reference = %reference, status = %reply.status, "Reference unknown to gateway");
        return Ok(Verification::not_found());
    }
    if !reply.status.is_success() {
        return Err(server_error(operation, &reply));
    }
    match reply.verdict(operation)? {
        Verdict::Accepted(data) => Ok(Verification {
            found: true,
            amount_paid: data.amount,
            currency: data.currency,
            status: ExternalStatus::parse(&data.status),
        }),
        Verdict::Rejected(message) => {
            debug!(reference = %reference, message = %message, "Gateway has no record of reference");
            Ok(Verification::not_found())
        }
    }
}
