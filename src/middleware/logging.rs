//! Request and response logging middleware
//!
//! Records method, matched route, status, duration and request id for every
//! HTTP exchange, plus timing helpers for database queries and processor
//! calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const SLOW_REQUEST_MS: u128 = 200;
const SLOW_QUERY_MS: u128 = 100;

/// Generate request ids using UUIDv4
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(id.parse().ok()?))
    }
}

fn request_id_of(request: &Request) -> String {
    request
        .headers()
        .get("x-request-id")
        .or_else(|| {
            request
                .extensions()
                .get::<RequestId>()
                .map(RequestId::header_value)
        })
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Log every request and its outcome.
///
/// Slow requests (over 200ms) and client errors log at WARN, server errors
/// at ERROR.
///
/// ```no_run
/// use axum::{routing::get, Router};
/// use tower::ServiceBuilder;
/// use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
/// use wallet_gateway::middleware::logging::{request_logging_middleware, UuidRequestId};
///
/// async fn handler() -> &'static str { "ok" }
/// let app: Router = Router::new().route("/", get(handler)).layer(
///     ServiceBuilder::new()
///         .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
///         .layer(axum::middleware::from_fn(request_logging_middleware))
///         .layer(PropagateRequestIdLayer::x_request_id()),
/// );
/// ```
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let request_id = request_id_of(&request);
    let client_ip = extract_client_ip(request.headers()).unwrap_or_else(|| "-".to_string());
    let user_id = request
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
        "Request started"
    );

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
        user_id = %user_id,
    );
    let response = next.run(request).instrument(span).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        error!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            duration_ms = %duration_ms,
            "Request failed with server error"
        );
    } else if duration_ms > SLOW_REQUEST_MS {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            duration_ms = %duration_ms,
            "Slow request completed"
        );
    } else if response.status().is_client_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            duration_ms = %duration_ms,
            "Request completed with client error"
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            duration_ms = %duration_ms,
            "Request completed"
        );
    }

    response
}

/// Client address from `X-Forwarded-For` (first hop) or `X-Real-IP`.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Time a database operation, warning on queries slower than 100ms.
pub async fn log_database_query<F, T, E>(query: &str, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) if duration_ms > SLOW_QUERY_MS => warn!(
            event_type = "slow_database_query",
            query = %query,
            duration_ms = %duration_ms,
            "Slow database query detected"
        ),
        Ok(_) => debug!(
            event_type = "database_query_complete",
            query = %query,
            duration_ms = %duration_ms,
            "Database query completed"
        ),
        Err(e) => error!(
            event_type = "database_query_error",
            query = %query,
            duration_ms = %duration_ms,
            error = %e,
            "Database query failed"
        ),
    }

    result
}

/// Time a call to the payment processor.
pub async fn log_external_call<F, T, E>(service: &str, endpoint: &str, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    debug!(
        event_type = "external_call_start",
        service = %service,
        endpoint = %endpoint,
        "Calling external service"
    );

    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) => info!(
            event_type = "external_call_complete",
            service = %service,
            endpoint = %endpoint,
            duration_ms = %duration_ms,
            "External service call completed"
        ),
        Err(e) => error!(
            event_type = "external_call_error",
            service = %service,
            endpoint = %endpoint,
            duration_ms = %duration_ms,
            error = %e,
            "External service call failed"
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;
    use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

    #[tokio::test]
    async fn test_request_logging_middleware_passes_response_through() {
        async fn handler() -> &'static str {
            "ok"
        }

        let app = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers().get("x-request-id").unwrap();
        assert!(Uuid::parse_str(request_id.to_str().unwrap()).is_ok());
    }

    #[test]
    fn test_extract_client_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "192.168.1.1, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), Some("192.168.1.1".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.7".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), Some("10.0.0.7".to_string()));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_log_database_query_returns_inner_result() {
        let result = log_database_query("SELECT 1", async { Ok::<_, String>(42) }).await;
        assert_eq!(result, Ok(42));

        let result: Result<(), String> =
            log_database_query("SELECT 1", async { Err("boom".to_string()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_log_external_call_returns_inner_result() {
        let result =
            log_external_call("paystack", "GET /transaction/verify/{reference}", async {
                Ok::<_, String>("success")
            })
            .await;
        assert_eq!(result, Ok("success"));
    }
}
