use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tourdesk_payments::{parse_start_date, Booking, BookingWithTour, CreateBooking};
use uuid::Uuid;

use super::parse_booking_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub tour_id: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub participants: i32,
    pub start_date: String,
}

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let Json(req) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let tour_id = Uuid::parse_str(req.tour_id.trim())
        .map_err(|_| ApiError::NotFound("Tour package not found".into()))?;
    let start_date = parse_start_date(&req.start_date)?;

    let booking = state
        .payments
        .create_booking(CreateBooking {
            tour_id,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            phone: req.phone,
            country: req.country,
            participants: req.participants,
            start_date,
        })
        .await
        .map_err(|e| ApiError::from(e).context("Failed to create booking"))?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /api/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingWithTour>> {
    let booking_id = parse_booking_id(&id)?;
    let booking = state.payments.get_booking(booking_id).await?;
    Ok(Json(booking))
}
