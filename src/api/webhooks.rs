//! Processor webhook endpoint

use axum::{body::Bytes, extract::State, Json};

use super::AppState;
use crate::webhook::WebhookAck;

/// `POST /api/webhooks/payment`
///
/// Signature checks run in a route layer. Past that point the answer is
/// always 200 with an acknowledgement, whatever happened internally.
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> Json<WebhookAck> {
    Json(state.ingestor.ingest(&body).await)
}
