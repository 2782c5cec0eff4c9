//! HTTP routes

mod bookings;
mod payments;

use axum::{routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/{id}", get(bookings::get_booking))
        .route(
            "/api/bookings/{id}/reset-payment",
            post(payments::reset_payment),
        )
        .route("/api/payments/initialize", post(payments::initialize_payment))
        .route("/api/payments/webhook", post(payments::webhook))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Booking ids arrive as free-form strings; anything that is not a UUID
/// cannot name a booking.
pub(crate) fn parse_booking_id(raw: &str) -> Result<Uuid, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::Validation("Booking ID is required".into()));
    }
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Booking not found".into()))
}
