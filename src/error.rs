//! Error taxonomy for the wallet gateway
//!
//! Every fallible operation in the ledger, gateway client, state machine and
//! reconciliation service returns [`AppError`]. The HTTP layer renders it as
//! `{"error": {"code", "message", "reference"?, "retry_after"?}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient funds: available={available}, required={required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("wallet already exists for user {user_id}")]
    DuplicateWallet { user_id: String },

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("gateway call timed out: {operation}")]
    GatewayTimeout { operation: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::DuplicateWallet { .. } => "DUPLICATE_WALLET",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::GatewayTimeout { .. } => "GATEWAY_TIMEOUT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateWallet { .. } => StatusCode::CONFLICT,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller can safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Gateway(_) | AppError::GatewayTimeout { .. } | AppError::Database(_)
        )
    }

    /// Outcome of an outbound call is unknown; local state must stay pending.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, AppError::GatewayTimeout { .. } | AppError::Gateway(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound { entity, .. } => format!("{} not found", entity),
            AppError::InsufficientFunds { .. } => {
                "Wallet balance is insufficient for this transaction".to_string()
            }
            AppError::DuplicateWallet { .. } => "A wallet already exists for this user".to_string(),
            AppError::Gateway(_) => {
                "Payment processor is unavailable, please retry shortly".to_string()
            }
            AppError::GatewayTimeout { .. } => {
                "Payment processor did not respond in time; the transaction remains pending"
                    .to_string()
            }
            AppError::Unauthorized(_) => "Authentication required".to_string(),
            AppError::Database(_) | AppError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    fn reference(&self) -> Option<String> {
        match self {
            AppError::NotFound {
                entity: "transaction",
                id,
            } => Some(id.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            error: ErrorDetail {
                code: err.error_code(),
                message: err.user_message(),
                reference: err.reference(),
                retry_after: if err.is_retryable() { Some(10) } else { None },
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {}", e))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InsufficientFunds {
                available: 1,
                required: 2
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::GatewayTimeout {
                operation: "verify".into()
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::not_found("wallet", "u1").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(AppError::Gateway("502".into()).is_retryable());
        assert!(AppError::Database("conn reset".into()).is_retryable());
        assert!(!AppError::validation("amount").is_retryable());
        assert!(!AppError::InsufficientFunds {
            available: 0,
            required: 1
        }
        .is_retryable());
    }

    #[test]
    fn error_response_carries_reference_for_transaction_errors() {
        let err = AppError::not_found("transaction", "DEP_1");
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["reference"], "DEP_1");
        assert!(body["error"].get("retry_after").is_none());

        let wallet = serde_json::to_value(ErrorResponse::from(&AppError::not_found("wallet", "u1")))
            .unwrap();
        assert!(wallet["error"].get("reference").is_none());
    }

    #[test]
    fn gateway_failures_are_indeterminate() {
        assert!(AppError::Gateway("502".into()).is_indeterminate());
        assert!(AppError::GatewayTimeout {
            operation: "initiate_payout".into()
        }
        .is_indeterminate());
        assert!(!AppError::Database("conn reset".into()).is_indeterminate());
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::Database("relation \"wallets\" does not exist".into());
        assert_eq!(err.user_message(), "An internal error occurred");
    }
}
