//! Booking records and payment transitions
//!
//! The transition rules live here so the Postgres and in-memory
//! repositories apply exactly the same state machine.

use serde::Serialize;
use time::{Date, OffsetDateTime};
use tourdesk_shared::{BookingStatus, PaymentStatus};
use uuid::Uuid;

/// A bookable tour package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub price_cents: i64,
    pub duration_days: i32,
}

/// One reservation attempt by a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub tour_package_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub participants: i32,
    pub start_date: Date,
    pub total_amount_cents: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// IremboPay invoice number of the current attempt
    pub payment_intent_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub payment_initiated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingWithTour {
    #[serde(flatten)]
    pub booking: Booking,
    pub tour_package: Tour,
}

/// Insert payload for a new booking
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub tour_package_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub participants: i32,
    pub start_date: Date,
    pub total_amount_cents: i64,
}

/// Payment outcome reported by IremboPay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid { paid_at: Option<OffsetDateTime> },
    Failed,
    /// Any other provider status, e.g. `NEW`; only the reference is recorded
    Other(String),
}

impl PaymentOutcome {
    /// Map the provider's (case-insensitive) status string
    pub fn from_provider_status(status: &str, paid_at: Option<OffsetDateTime>) -> Self {
        match status.trim().to_uppercase().as_str() {
            "PAID" => PaymentOutcome::Paid { paid_at },
            "FAILED" => PaymentOutcome::Failed,
            other => PaymentOutcome::Other(other.to_string()),
        }
    }
}

/// Write a repository performs for one outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedTransition {
    /// `PAID` + `CONFIRMED`; existing timestamps are kept on re-delivery
    MarkPaid { paid_at: OffsetDateTime },
    MarkFailed,
    /// Only the invoice reference changes
    ReferenceOnly,
    /// Nothing is written
    Untouched,
}

/// Decide the write for `outcome` given the booking's current payment status.
///
/// A settled booking never moves backwards, and a repeated outcome writes
/// nothing new, so duplicate or reordered webhooks converge.
pub fn plan_transition(
    current: PaymentStatus,
    outcome: &PaymentOutcome,
    now: OffsetDateTime,
) -> PlannedTransition {
    match outcome {
        PaymentOutcome::Paid { paid_at } => match current {
            PaymentStatus::Paid | PaymentStatus::Refunded => PlannedTransition::Untouched,
            _ => PlannedTransition::MarkPaid {
                paid_at: paid_at.unwrap_or(now),
            },
        },
        PaymentOutcome::Failed => match current {
            PaymentStatus::Paid | PaymentStatus::Refunded => PlannedTransition::Untouched,
            PaymentStatus::Failed => PlannedTransition::ReferenceOnly,
            _ => PlannedTransition::MarkFailed,
        },
        // A PENDING booking has no active invoice to attach a reference to
        PaymentOutcome::Other(_) => match current {
            PaymentStatus::Processing | PaymentStatus::Failed => PlannedTransition::ReferenceOnly,
            _ => PlannedTransition::Untouched,
        },
    }
}

/// [`plan_transition`] for a loaded booking and the reference the outcome
/// arrived with.
///
/// A non-PAID outcome for an invoice other than the booking's active one is
/// stale and writes nothing. A reference equal to the booking id names no
/// particular invoice and is never stale.
pub fn plan_for_booking(
    booking: &Booking,
    reference: Option<&str>,
    outcome: &PaymentOutcome,
    now: OffsetDateTime,
) -> PlannedTransition {
    let stale = match (booking.payment_intent_id.as_deref(), reference) {
        (Some(active), Some(reference)) => {
            active != reference && !reference.eq_ignore_ascii_case(&booking.id.to_string())
        }
        _ => false,
    };
    if stale && !matches!(outcome, PaymentOutcome::Paid { .. }) {
        return PlannedTransition::Untouched;
    }
    plan_transition(booking.payment_status, outcome, now)
}

/// Result of applying an outcome to a booking
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub booking: Booking,
    pub previous_status: PaymentStatus,
    pub planned: PlannedTransition,
}

impl TransitionResult {
    /// True exactly once per real status change
    pub fn changed(&self) -> bool {
        self.booking.payment_status != self.previous_status
    }

    pub fn became_paid(&self) -> bool {
        self.changed() && self.booking.payment_status == PaymentStatus::Paid
    }
}

/// Keep digits and a leading `+`, drop everything else.
pub fn normalize_phone(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '+' && out.is_empty() {
            out.push(c);
        }
    }
    out
}
