//! `HttpGateway` against a stub processor served on a loopback port.

use std::time::Duration;

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use wallet_gateway::config::{GatewayConfig, GatewayProvider};
use wallet_gateway::error::AppError;
use wallet_gateway::gateway::{
    CheckoutRequest, ExternalStatus, HttpGateway, PaymentGateway, PayoutRequest,
    ServiceDebitOutcome, ServiceDebitRequest, ServiceKind, VirtualAccountRequest,
};

const SECRET: &str = "sk_test_stub";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", SECRET))
}

async fn initialize(headers: HeaderMap, Json(body): Json<JsonValue>) -> (StatusCode, Json<JsonValue>) {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": false, "message": "Invalid key" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": format!("https://checkout.stub/{}", body["reference"].as_str().unwrap_or_default()),
                "access_code": "ac_stub",
                "reference": body["reference"],
            }
        })),
    )
}

async fn verify(Path(reference): Path<String>) -> (StatusCode, Json<JsonValue>) {
    match reference.as_str() {
        "PAID" => (
            StatusCode::OK,
            Json(json!({
                "status": true,
                "message": "Verification successful",
                "data": { "status": "success", "amount": 500_000, "currency": "NGN" }
            })),
        ),
        "ABANDONED" => (
            StatusCode::OK,
            Json(json!({
                "status": true,
                "message": "Verification successful",
                "data": { "status": "abandoned", "amount": 500_000 }
            })),
        ),
        "BROKEN" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": false, "message": "upstream failure" })),
        ),
        "SLOW" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, Json(json!({ "status": true })))
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": false, "message": "Transaction reference not found" })),
        ),
    }
}

async fn transfer_verify(Path(reference): Path<String>) -> (StatusCode, Json<JsonValue>) {
    let status = if reference == "WDR_REVERSED" { "reversed" } else { "success" };
    (
        StatusCode::OK,
        Json(json!({
            "status": true,
            "message": "Transfer retrieved",
            "data": { "status": status, "amount": 300_000 }
        })),
    )
}

async fn recipient(Json(body): Json<JsonValue>) -> (StatusCode, Json<JsonValue>) {
    if body["account_number"] == "0000000000" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": false, "message": "Could not resolve account name" })),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({ "status": true, "message": "Recipient created", "data": { "recipient_code": "RCP_stub" } })),
    )
}

async fn transfer(Json(body): Json<JsonValue>) -> Response {
    match body["reference"].as_str() {
        Some("WDR_DOWN") => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": false, "message": "try again" })),
        )
            .into_response(),
        // A proxy in front of the processor answered instead of the API.
        Some("WDR_PROXY") => (StatusCode::OK, "<html>upstream proxy</html>").into_response(),
        Some("WDR_NODATA") => (
            StatusCode::OK,
            Json(json!({ "status": true, "message": "Transfer has been queued" })),
        )
            .into_response(),
        _ => (
            StatusCode::OK,
            Json(json!({
                "status": true,
                "message": "Transfer has been queued",
                "data": { "transfer_code": "TRF_stub", "status": "pending" }
            })),
        )
            .into_response(),
    }
}

async fn dedicated_account() -> Json<JsonValue> {
    Json(json!({
        "status": true,
        "message": "Assigned",
        "data": {
            "id": 4021,
            "account_number": "9930000001",
            "account_name": "WALLET/user-1",
            "bank": { "name": "Wema Bank" }
        }
    }))
}

async fn bills(Json(body): Json<JsonValue>) -> Response {
    match body["provider"].as_str() {
        Some("glo") => Json(json!({
            "status": true,
            "message": "Bill processed",
            "data": { "status": "failed" }
        }))
        .into_response(),
        Some("airtel") => (StatusCode::OK, "").into_response(),
        Some("9mobile") => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": false, "message": "Invalid biller" })),
        )
            .into_response(),
        _ => Json(json!({
            "status": true,
            "message": "Bill processed",
            "data": { "status": "success" }
        }))
        .into_response(),
    }
}

async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/transaction/initialize", post(initialize))
        .route("/transaction/verify/{reference}", get(verify))
        .route("/transfer/verify/{reference}", get(transfer_verify))
        .route("/transferrecipient", post(recipient))
        .route("/transfer", post(transfer))
        .route("/dedicated_account", post(dedicated_account))
        .route("/bills/purchase", post(bills));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gateway(base_url: String, secret_key: &str) -> HttpGateway {
    HttpGateway::new(&GatewayConfig {
        provider: GatewayProvider::Http,
        name: "stub".to_string(),
        base_url,
        secret_key: secret_key.to_string(),
        callback_url: Some("https://app.example.com/wallet/callback".to_string()),
        preferred_bank: None,
        timeout_secs: 1,
        connect_timeout_secs: 1,
        currency: "NGN".to_string(),
    })
    .unwrap()
}

fn payout(reference: &str, account_number: &str) -> PayoutRequest {
    PayoutRequest {
        reference: reference.to_string(),
        amount: 300_000,
        currency: "NGN".to_string(),
        bank_code: "058".to_string(),
        account_number: account_number.to_string(),
        account_name: "Ada Obi".to_string(),
        narration: "Wallet withdrawal".to_string(),
    }
}

#[tokio::test]
async fn checkout_returns_authorization_url() {
    let gw = gateway(spawn_stub().await, SECRET);
    let session = gw
        .create_checkout(&CheckoutRequest {
            reference: "DEP_1".to_string(),
            amount: 500_000,
            currency: "NGN".to_string(),
            customer_email: Some("ada@example.com".to_string()),
            callback_url: None,
        })
        .await
        .unwrap();
    assert_eq!(session.checkout_url, "https://checkout.stub/DEP_1");
    assert_eq!(session.reference, "DEP_1");
    assert_eq!(session.access_code.as_deref(), Some("ac_stub"));
}

#[tokio::test]
async fn checkout_with_bad_key_is_a_gateway_error() {
    let gw = gateway(spawn_stub().await, "sk_wrong");
    let err = gw
        .create_checkout(&CheckoutRequest {
            reference: "DEP_1".to_string(),
            amount: 500_000,
            currency: "NGN".to_string(),
            customer_email: None,
            callback_url: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));
}

#[tokio::test]
async fn verify_maps_processor_answers() {
    let gw = gateway(spawn_stub().await, SECRET);

    let paid = gw.verify("PAID").await.unwrap();
    assert!(paid.found);
    assert_eq!(paid.status, ExternalStatus::Success);
    assert_eq!(paid.amount_paid, Some(500_000));
    assert_eq!(paid.currency.as_deref(), Some("NGN"));

    let abandoned = gw.verify("ABANDONED").await.unwrap();
    assert_eq!(abandoned.status, ExternalStatus::Abandoned);

    let missing = gw.verify("NOPE").await.unwrap();
    assert!(!missing.found);
}

#[tokio::test]
async fn server_errors_are_indeterminate() {
    let gw = gateway(spawn_stub().await, SECRET);
    let err = gw.verify("BROKEN").await.unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));
    assert!(err.is_indeterminate());
}

#[tokio::test]
async fn slow_processor_times_out() {
    let gw = gateway(spawn_stub().await, SECRET);
    let err = gw.verify("SLOW").await.unwrap_err();
    assert!(matches!(err, AppError::GatewayTimeout { .. }), "{:?}", err);
}

#[tokio::test]
async fn payout_verification_uses_transfer_endpoint() {
    let gw = gateway(spawn_stub().await, SECRET);
    let reversed = gw.verify_payout("WDR_REVERSED").await.unwrap();
    assert_eq!(reversed.status, ExternalStatus::Reversed);
}

#[tokio::test]
async fn payout_is_accepted_or_rejected_by_verdict() {
    let gw = gateway(spawn_stub().await, SECRET);

    let accepted = gw.initiate_payout(&payout("WDR_1", "0123456789")).await.unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.transfer_code.as_deref(), Some("TRF_stub"));

    let rejected = gw.initiate_payout(&payout("WDR_2", "0000000000")).await.unwrap();
    assert!(!rejected.accepted);
    assert_eq!(rejected.message, "Could not resolve account name");

    let err = gw.initiate_payout(&payout("WDR_DOWN", "0123456789")).await.unwrap_err();
    assert!(err.is_indeterminate());
}

#[tokio::test]
async fn dedicated_account_details_are_parsed() {
    let gw = gateway(spawn_stub().await, SECRET);
    let details = gw
        .create_virtual_account(&VirtualAccountRequest {
            user_id: "user-1".to_string(),
            customer_email: None,
            preferred_bank: Some("wema-bank".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(details.provider_account_id, "4021");
    assert_eq!(details.account_number, "9930000001");
    assert_eq!(details.bank_name, "Wema Bank");
}

#[tokio::test]
async fn service_debit_outcomes() {
    let gw = gateway(spawn_stub().await, SECRET);
    let request = |provider: &str| ServiceDebitRequest {
        reference: "VAS_1".to_string(),
        service: ServiceKind::Airtime,
        provider: provider.to_string(),
        phone: "08031234567".to_string(),
        amount: 50_000,
        plan: None,
    };
    assert_eq!(
        gw.debit_for_service(&request("mtn")).await.unwrap(),
        ServiceDebitOutcome::Delivered
    );
    assert!(matches!(
        gw.debit_for_service(&request("glo")).await.unwrap(),
        ServiceDebitOutcome::Rejected(_)
    ));
}

#[tokio::test]
async fn unreadable_payout_answer_is_not_a_rejection() {
    let gw = gateway(spawn_stub().await, SECRET);

    for reference in ["WDR_PROXY", "WDR_NODATA"] {
        let err = gw
            .initiate_payout(&payout(reference, "0123456789"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)), "{}: {:?}", reference, err);
        assert!(err.is_indeterminate());
    }
}

#[tokio::test]
async fn unreadable_bill_answer_is_not_a_rejection() {
    let gw = gateway(spawn_stub().await, SECRET);
    let request = |provider: &str| ServiceDebitRequest {
        reference: "VAS_2".to_string(),
        service: ServiceKind::Airtime,
        provider: provider.to_string(),
        phone: "08031234567".to_string(),
        amount: 50_000,
        plan: None,
    };

    let err = gw.debit_for_service(&request("airtel")).await.unwrap_err();
    assert!(err.is_indeterminate());

    // An explicit 4xx is still a definitive rejection.
    assert_eq!(
        gw.debit_for_service(&request("9mobile")).await.unwrap(),
        ServiceDebitOutcome::Rejected("Invalid biller".to_string())
    );
}
