//! Webhook Ingestion
//!
//! Parses processor notifications (`{eventType, reference, body}`) and
//! dispatches them to the state machine or to virtual-account funding.
//! Authenticity is checked by [`crate::middleware::webhook_auth`] before
//! anything here runs.
//!
//! The processor only learns "received": every notification, including
//! malformed, unknown, duplicate or failing ones, is answered with the same
//! acknowledgement envelope so the sender never enters a retry storm. The
//! local outcome is logged and, where relevant, left for the sweep.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn, Instrument};

use crate::error::AppError;
use crate::models::parse_amount;
use crate::reconciliation::{ReconciliationService, VirtualAccountFunding};
use crate::request_span;
use crate::state_machine::{GatewayEvent, Outcome};

pub const ACK_RESPONSE_CODE: &str = "00";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub body: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub response_code: String,
    pub transaction_reference: String,
    pub response_description: String,
}

impl WebhookAck {
    pub fn new(reference: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            response_code: ACK_RESPONSE_CODE.to_string(),
            transaction_reference: reference.into(),
            response_description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Transition(GatewayEvent),
    VirtualAccountFunded(VirtualAccountFundingEvent),
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualAccountFundingEvent {
    pub reference: String,
    pub account_number: String,
    pub amount: i64,
}

fn body_str<'a>(body: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| body.get(*k).and_then(JsonValue::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `amountPaid` in major units; absent means "not stated".
fn body_amount(body: &JsonValue) -> Result<Option<i64>, AppError> {
    match body.get("amountPaid") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => parse_amount(value).map(Some),
    }
}

/// Map a payload onto the event it represents.
pub fn parse_event(payload: &WebhookPayload) -> Result<WebhookEvent, AppError> {
    let event_type = payload.event_type.trim().to_ascii_lowercase();
    let reference = payload
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    let require_reference =
        || reference.clone().ok_or_else(|| AppError::validation("reference is required"));
    let body = &payload.body;

    let event = match event_type.as_str() {
        "charge.success" | "charge.completed" | "transfer.success" => {
            WebhookEvent::Transition(GatewayEvent::Confirmed {
                reference: require_reference()?,
                amount_paid: body_amount(body)?,
            })
        }
        "charge.failed" | "transfer.failed" => WebhookEvent::Transition(GatewayEvent::Failed {
            reference: require_reference()?,
            reason: body_str(body, &["reason", "gatewayResponse", "message"])
                .unwrap_or("gateway reported failure")
                .to_string(),
        }),
        "transfer.reversed" | "refund.processed" => {
            WebhookEvent::Transition(GatewayEvent::Refunded {
                reference: require_reference()?,
            })
        }
        "virtual_account.funded" | "dedicatedaccount.credit" => {
            let account_number = body_str(body, &["accountNumber"])
                .ok_or_else(|| AppError::validation("body.accountNumber is required"))?
                .to_string();
            let amount = body_amount(body)?
                .ok_or_else(|| AppError::validation("body.amountPaid is required"))?;
            WebhookEvent::VirtualAccountFunded(VirtualAccountFundingEvent {
                reference: require_reference()?,
                account_number,
                amount,
            })
        }
        _ => WebhookEvent::Ignored(event_type),
    };
    Ok(event)
}

fn describe(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Settled { .. } => "Processed",
        Outcome::AlreadyTerminal(_) => "Duplicate ignored",
        Outcome::UnknownReference(_) => "Unknown reference",
        Outcome::HeldForReview { .. } => "Accepted for review",
    }
}

#[derive(Clone)]
pub struct WebhookIngestor {
    service: Arc<ReconciliationService>,
}

impl WebhookIngestor {
    pub fn new(service: Arc<ReconciliationService>) -> Self {
        Self { service }
    }

    /// Handle a raw, already-authenticated notification. Never fails.
    pub async fn ingest(&self, raw: &[u8]) -> WebhookAck {
        let payload: WebhookPayload = match serde_json::from_slice(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Malformed webhook payload ignored");
                return WebhookAck::new("", "Malformed payload ignored");
            }
        };

        let reference = payload.reference.clone().unwrap_or_default();
        let span = request_span!(
            "webhook_ingest",
            event_type = payload.event_type,
            reference = reference,
        );
        self.dispatch(payload).instrument(span).await
    }

    async fn dispatch(&self, payload: WebhookPayload) -> WebhookAck {
        let reference = payload.reference.clone().unwrap_or_default();
        let event = match parse_event(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, event_type = %payload.event_type, "Invalid webhook event ignored");
                return WebhookAck::new(reference, "Invalid event ignored");
            }
        };

        let result = match event {
            WebhookEvent::Ignored(event_type) => {
                info!(event_type = %event_type, "Unhandled webhook event type");
                return WebhookAck::new(reference, "Event ignored");
            }
            WebhookEvent::Transition(event) => self.service.apply_event(event).await,
            WebhookEvent::VirtualAccountFunded(funding) => {
                self.service
                    .handle_virtual_account_funding(VirtualAccountFunding {
                        reference: funding.reference,
                        account_number: funding.account_number,
                        amount: funding.amount,
                    })
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                info!(outcome = describe(&outcome), "Webhook processed");
                WebhookAck::new(reference, describe(&outcome))
            }
            Err(e) => {
                error!(error = %e, "Webhook processing failed, leaving for reconciliation");
                WebhookAck::new(reference, "Accepted; processing deferred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn charge_success_maps_to_confirmation_in_minor_units() {
        let event = parse_event(&payload(json!({
            "eventType": "charge.success",
            "reference": "DEP_1",
            "body": {"amountPaid": 5000}
        })))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::Transition(GatewayEvent::Confirmed {
                reference: "DEP_1".into(),
                amount_paid: Some(500_000),
            })
        );
    }

    #[test]
    fn missing_amount_is_not_a_mismatch() {
        let event = parse_event(&payload(json!({
            "eventType": "CHARGE.SUCCESS",
            "reference": "DEP_1"
        })))
        .unwrap();
        assert!(matches!(
            event,
            WebhookEvent::Transition(GatewayEvent::Confirmed {
                amount_paid: None,
                ..
            })
        ));
    }

    #[test]
    fn transfer_events_map_to_failure_and_refund() {
        let failed = parse_event(&payload(json!({
            "eventType": "transfer.failed",
            "reference": "WDR_1",
            "body": {"reason": "Account closed"}
        })))
        .unwrap();
        assert_eq!(
            failed,
            WebhookEvent::Transition(GatewayEvent::Failed {
                reference: "WDR_1".into(),
                reason: "Account closed".into(),
            })
        );

        let reversed = parse_event(&payload(json!({
            "eventType": "transfer.reversed",
            "reference": "WDR_1"
        })))
        .unwrap();
        assert!(matches!(
            reversed,
            WebhookEvent::Transition(GatewayEvent::Refunded { .. })
        ));
    }

    #[test]
    fn virtual_account_funding_requires_account_and_amount() {
        let event = parse_event(&payload(json!({
            "eventType": "virtual_account.funded",
            "reference": "PSK_998",
            "body": {"accountNumber": "9900000001", "amountPaid": "2500.50"}
        })))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::VirtualAccountFunded(VirtualAccountFundingEvent {
                reference: "PSK_998".into(),
                account_number: "9900000001".into(),
                amount: 250_050,
            })
        );

        assert!(parse_event(&payload(json!({
            "eventType": "virtual_account.funded",
            "reference": "PSK_999",
            "body": {"amountPaid": 10}
        })))
        .is_err());
    }

    #[test]
    fn rejects_bad_amounts_and_missing_references() {
        assert!(parse_event(&payload(json!({
            "eventType": "charge.success",
            "reference": "DEP_1",
            "body": {"amountPaid": "lots"}
        })))
        .is_err());
        assert!(parse_event(&payload(json!({
            "eventType": "charge.success",
            "reference": "  "
        })))
        .is_err());
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let event = parse_event(&payload(json!({
            "eventType": "subscription.create",
        })))
        .unwrap();
        assert_eq!(event, WebhookEvent::Ignored("subscription.create".into()));
    }

    #[test]
    fn ack_envelope_shape() {
        let ack = serde_json::to_value(WebhookAck::new("DEP_1", "Processed")).unwrap();
        assert_eq!(
            ack,
            json!({
                "responseCode": "00",
                "transactionReference": "DEP_1",
                "responseDescription": "Processed"
            })
        );
    }
}
