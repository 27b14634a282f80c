//! HTTP surface
//!
//! Wallet endpoints for authenticated users plus the processor webhook.
//! Authentication itself happens upstream; the caller's identity arrives in
//! the `x-user-id` header.

pub mod wallet;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, MatchedPath},
    http::{request::Parts, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::middleware::webhook_auth::{verify_webhook_signature, WebhookVerifier};
use crate::reconciliation::ReconciliationService;
use crate::webhook::WebhookIngestor;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReconciliationService>,
    pub ingestor: WebhookIngestor,
}

impl AppState {
    pub fn new(service: Arc<ReconciliationService>) -> Self {
        Self {
            ingestor: WebhookIngestor::new(service.clone()),
            service,
        }
    }
}

/// Caller identity set by the upstream auth gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| UserId(id.to_string()))
            .ok_or_else(|| AppError::Unauthorized("missing x-user-id header".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthOut> {
    Json(HealthOut {
        status: "ok",
        service: "wallet-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router.
pub fn router(state: AppState, verifier: Arc<WebhookVerifier>, max_body_bytes: usize) -> Router {
    let wallet_routes = Router::new()
        .route("/api/wallet", get(wallet::get_wallet))
        .route("/api/wallet/deposit", post(wallet::deposit))
        .route("/api/wallet/verify/{reference}", get(wallet::verify))
        .route("/api/wallet/withdraw", post(wallet::withdraw))
        .route("/api/wallet/virtual-account", post(wallet::provision_virtual_account))
        .route("/api/wallet/services", post(wallet::purchase_service))
        .route(
            "/api/wallet/transactions/{reference}",
            get(wallet::get_transaction),
        );

    let webhook_routes = Router::new()
        .route("/api/webhooks/payment", post(webhooks::payment_webhook))
        .route_layer(middleware::from_fn_with_state(
            verifier,
            verify_webhook_signature,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(wallet_routes)
        .merge(webhook_routes)
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(
                    TraceLayer::new_for_http().make_span_with(
                        |req: &axum::http::Request<_>| {
                            let path = req
                                .extensions()
                                .get::<MatchedPath>()
                                .map(MatchedPath::as_str)
                                .unwrap_or_else(|| req.uri().path());
                            tracing::debug_span!("http", method = %req.method(), path = %path)
                        },
                    ),
                )
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
