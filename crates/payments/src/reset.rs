//! Client-initiated payment reset
//!
//! The checkout widget calls this when the customer dismisses it or the
//! client watchdog fires, so a fresh invoice can be created.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tourdesk_shared::PaymentStatus;
use uuid::Uuid;

use crate::audit::{log_best_effort, AuditAction, AuditEntry};
use crate::error::{PaymentError, PaymentResult};
use crate::store::BookingRepository;

pub const RESET_REASON: &str = "Payment cancelled or dismissed by user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    /// False when the booking left PROCESSING between the guard and the update
    pub success: bool,
    pub message: String,
    pub payment_status: PaymentStatus,
}

pub struct PaymentResetter {
    bookings: Arc<dyn BookingRepository>,
}

impl PaymentResetter {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }

    pub async fn reset(&self, booking_id: Uuid) -> PaymentResult<ResetOutcome> {
        let booking = self
            .bookings
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Booking not found".into()))?
            .booking;

        if booking.payment_status != PaymentStatus::Processing {
            return Err(PaymentError::StateConflict {
                message: "Can only reset payments in PROCESSING status".into(),
                current_status: booking.payment_status,
            });
        }

        let Some(updated) = self.bookings.reset_processing(booking_id).await? else {
            // Lost the race, most likely to the webhook
            let current = self
                .bookings
                .find_booking(booking_id)
                .await?
                .map(|b| b.booking.payment_status)
                .unwrap_or(booking.payment_status);
            tracing::info!(
                booking_id = %booking_id,
                current_status = %current,
                "Reset skipped, booking no longer processing"
            );
            return Ok(ResetOutcome {
                success: false,
                message: "Payment status changed before reset".into(),
                payment_status: current,
            });
        };

        tracing::info!(
            booking_id = %booking_id,
            previous_invoice = ?booking.payment_intent_id,
            "Payment reset to pending"
        );

        log_best_effort(
            "audit_log",
            booking_id,
            self.bookings.record_audit(
                AuditEntry::new(AuditAction::PaymentReset)
                    .booking(booking_id)
                    .metadata(json!({
                        "bookingId": booking_id,
                        "previousStatus": PaymentStatus::Processing,
                        "previousInvoiceId": booking.payment_intent_id,
                        "reason": RESET_REASON,
                    })),
            ),
        )
        .await;

        Ok(ResetOutcome {
            success: true,
            message: "Payment status reset successfully".into(),
            payment_status: updated.payment_status,
        })
    }
}
