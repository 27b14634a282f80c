//! Webhook signature verification
//!
//! The processor signs the raw request body with HMAC-SHA512 using the shared
//! secret and sends the hex digest in a configurable header. Requests that
//! fail the check are rejected with 401 before any parsing happens; the body
//! is buffered here and handed on unchanged.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::warn;

use super::logging::extract_client_ip;
use crate::config::WebhookConfig;
use crate::error::AppError;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    header: String,
    require_signature: bool,
    max_body_bytes: usize,
}

impl WebhookVerifier {
    pub fn new(config: &WebhookConfig, max_body_bytes: usize) -> Self {
        Self {
            secret: config.secret.clone(),
            header: config.signature_header.to_ascii_lowercase(),
            require_signature: config.require_signature,
            max_body_bytes,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Hex HMAC-SHA512 of `body` under the shared secret.
    pub fn sign(&self, body: &[u8]) -> Result<String, AppError> {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
        if !self.require_signature {
            return Ok(());
        }
        if self.secret.is_empty() {
            return Err(AppError::Unauthorized(
                "webhook secret is not configured".to_string(),
            ));
        }

        let signature = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;
        let expected = hex::decode(signature)
            .map_err(|_| AppError::Unauthorized("malformed webhook signature".to_string()))?;

        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| AppError::Unauthorized("webhook signature mismatch".to_string()))
    }
}

/// Axum middleware rejecting webhooks whose signature does not match.
pub async fn verify_webhook_signature(
    State(verifier): State<Arc<WebhookVerifier>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, verifier.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Webhook body could not be read");
            return AppError::validation("webhook body too large or unreadable").into_response();
        }
    };

    if let Err(e) = verifier.verify(&parts.headers, &bytes) {
        warn!(
            client_ip = %extract_client_ip(&parts.headers).unwrap_or_else(|| "-".to_string()),
            error = %e,
            "Rejected webhook with invalid signature"
        );
        return e.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(require_signature: bool) -> WebhookVerifier {
        WebhookVerifier::new(
            &WebhookConfig {
                secret: "whsec_test".to_string(),
                signature_header: "X-Gateway-Signature".to_string(),
                require_signature,
            },
            1024,
        )
    }

    fn signed_headers(v: &WebhookVerifier, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(v.header_name().as_bytes()).unwrap(),
            signature.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_matching_signature() {
        let v = verifier(true);
        let body = br#"{"eventType":"charge.success","reference":"DEP_1"}"#;
        let signature = v.sign(body).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(v.verify(&signed_headers(&v, &signature), body).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let v = verifier(true);
        let signature = v.sign(b"original").unwrap();
        let err = v.verify(&signed_headers(&v, &signature), b"tampered").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn rejects_missing_or_malformed_signature() {
        let v = verifier(true);
        assert!(v.verify(&HeaderMap::new(), b"{}").is_err());
        assert!(v.verify(&signed_headers(&v, "not-hex"), b"{}").is_err());
    }

    #[test]
    fn passes_through_when_not_required() {
        let v = verifier(false);
        assert!(v.verify(&HeaderMap::new(), b"{}").is_ok());
    }
}
