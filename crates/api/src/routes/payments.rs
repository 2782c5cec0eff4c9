use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tourdesk_payments::{InitializedPayment, PaymentError, ResetOutcome, SIGNATURE_HEADER};

use super::parse_booking_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(default)]
    pub booking_id: String,
}

/// POST /api/payments/initialize
pub async fn initialize_payment(
    State(state): State<AppState>,
    body: Result<Json<InitializeRequest>, JsonRejection>,
) -> ApiResult<Json<InitializedPayment>> {
    let Json(req) = body.map_err(|_| ApiError::Validation("Invalid booking ID".into()))?;
    let booking_id = parse_booking_id(&req.booking_id)?;

    let payment = state
        .payments
        .initialize_payment(booking_id)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to initialize payment"))?;

    Ok(Json(payment))
}

/// POST /api/payments/webhook
///
/// Takes the raw body so the signature is checked against the exact bytes
/// IremboPay signed. A body that is not UTF-8 cannot carry a valid signature.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let body = std::str::from_utf8(&body).map_err(|_| PaymentError::SignatureInvalid)?;

    state
        .payments
        .handle_webhook(body, signature)
        .await
        .map_err(|e| ApiError::from(e).context("Webhook processing failed"))?;

    Ok(Json(json!({ "received": true })))
}

/// POST /api/bookings/{id}/reset-payment
pub async fn reset_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResetOutcome>> {
    let booking_id = parse_booking_id(&id)?;

    let outcome = state
        .payments
        .reset_payment(booking_id)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to reset payment status"))?;

    Ok(Json(outcome))
}
