//! Wallet endpoints
//!
//! Amounts arrive in major units (naira) as JSON numbers or numeric strings
//! and are converted to minor units before anything else happens.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{AppState, UserId};
use crate::error::AppError;
use crate::gateway::ServiceKind;
use crate::models::{parse_amount, Transaction, Wallet};
use crate::reconciliation::{
    DepositInitiated, DepositRequest, MovementResult, ServicePurchaseRequest, VerifyResult,
    WithdrawalRequest,
};

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}

fn optional_json<T: DeserializeOwned + Default>(bytes: &Bytes) -> Result<T, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| AppError::validation(format!("invalid body: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositBody {
    #[serde(default)]
    pub amount: JsonValue,
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    #[serde(default)]
    pub amount: JsonValue,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub narration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAccountBody {
    pub email: Option<String>,
    pub preferred_bank: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePurchaseBody {
    pub service: ServiceKind,
    pub provider: String,
    pub phone: String,
    #[serde(default)]
    pub amount: JsonValue,
    pub plan: Option<String>,
}

/// `POST /api/wallet/deposit`
pub async fn deposit(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<DepositBody>, JsonRejection>,
) -> Result<(StatusCode, Json<DepositInitiated>), AppError> {
    let body = json_body(payload)?;
    let request = DepositRequest {
        amount: parse_amount(&body.amount)?,
        email: body.email,
        callback_url: body.callback_url,
    };
    let initiated = state.service.initiate_deposit(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

/// `GET /api/wallet/verify/{reference}`
pub async fn verify(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(reference): Path<String>,
) -> Result<Json<VerifyResult>, AppError> {
    let result = state
        .service
        .verify_deposit(&user_id, reference.trim())
        .await?;
    Ok(Json(result))
}

/// `POST /api/wallet/withdraw`
pub async fn withdraw(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<(StatusCode, Json<MovementResult>), AppError> {
    let body = json_body(payload)?;
    let request = WithdrawalRequest {
        amount: parse_amount(&body.amount)?,
        bank_code: body.bank_code.trim().to_string(),
        account_number: body.account_number.trim().to_string(),
        account_name: body.account_name,
        narration: body.narration,
    };
    let result = state.service.withdraw(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// `POST /api/wallet/virtual-account`; the body is optional.
pub async fn provision_virtual_account(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    body: Bytes,
) -> Result<Json<Wallet>, AppError> {
    let body: VirtualAccountBody = optional_json(&body)?;
    let wallet = state
        .service
        .provision_virtual_account(&user_id, body.email, body.preferred_bank)
        .await?;
    Ok(Json(wallet))
}

/// `POST /api/wallet/services`
pub async fn purchase_service(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<ServicePurchaseBody>, JsonRejection>,
) -> Result<(StatusCode, Json<MovementResult>), AppError> {
    let body = json_body(payload)?;
    let request = ServicePurchaseRequest {
        service: body.service,
        provider: body.provider,
        phone: body.phone,
        amount: parse_amount(&body.amount)?,
        plan: body.plan,
    };
    let result = state.service.purchase_service(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// `GET /api/wallet`
pub async fn get_wallet(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Wallet>, AppError> {
    Ok(Json(state.service.wallet_snapshot(&user_id).await?))
}

/// `GET /api/wallet/transactions/{reference}`
pub async fn get_transaction(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(reference): Path<String>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(
        state
            .service
            .get_transaction(&user_id, reference.trim())
            .await?,
    ))
}
