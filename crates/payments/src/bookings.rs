//! Booking creation and lookup

use std::sync::Arc;

use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tourdesk_shared::deposit_cents;
use uuid::Uuid;

use crate::audit::{log_best_effort, AuditAction, AuditEntry};
use crate::booking::{Booking, BookingWithTour, NewBooking};
use crate::error::{PaymentError, PaymentResult};
use crate::store::BookingRepository;

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub tour_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub participants: i32,
    pub start_date: Date,
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp
pub fn parse_start_date(raw: &str) -> PaymentResult<Date> {
    let raw = raw.trim();
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339).map(|dt| dt.date()))
        .map_err(|_| PaymentError::Validation(format!("Invalid start date: {}", raw)))
}

pub struct BookingService {
    bookings: Arc<dyn BookingRepository>,
}

impl BookingService {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }

    pub async fn create_booking(&self, input: CreateBooking) -> PaymentResult<Booking> {
        let name = input.customer_name.trim();
        let email = input.customer_email.trim();
        if name.is_empty() {
            return Err(PaymentError::Validation("Customer name is required".into()));
        }
        if !email.contains('@') {
            return Err(PaymentError::Validation("A valid email is required".into()));
        }
        if input.participants < 1 {
            return Err(PaymentError::Validation(
                "At least one participant is required".into(),
            ));
        }

        let tour = self
            .bookings
            .find_tour(input.tour_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Tour package not found".into()))?;

        let total = tour
            .price_cents
            .checked_mul(i64::from(input.participants))
            .filter(|total| deposit_cents(*total).is_some())
            .ok_or_else(|| PaymentError::Validation("Booking total is too large".into()))?;

        let booking = self
            .bookings
            .insert_booking(NewBooking {
                tour_package_id: tour.id,
                customer_name: name.to_string(),
                customer_email: email.to_string(),
                phone: input.phone.filter(|p| !p.trim().is_empty()),
                country: input.country.filter(|c| !c.trim().is_empty()),
                participants: input.participants,
                start_date: input.start_date,
                total_amount_cents: total,
            })
            .await?;

        tracing::info!(booking_id = %booking.id, tour_id = %tour.id, "Booking created");

        log_best_effort(
            "audit_log",
            booking.id,
            self.bookings.record_audit(
                AuditEntry::new(AuditAction::BookingCreated)
                    .booking(booking.id)
                    .metadata(json!({
                        "bookingId": booking.id,
                        "tourId": tour.id,
                        "participants": booking.participants,
                        "totalAmountCents": total,
                    })),
            ),
        )
        .await;

        Ok(booking)
    }

    pub async fn get_booking(&self, id: Uuid) -> PaymentResult<BookingWithTour> {
        self.bookings
            .find_booking(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Booking not found".into()))
    }
}
