//! Booking persistence
//!
//! Every status write is a single conditional statement or runs inside one
//! transaction holding the row lock, so concurrent webhook deliveries and
//! resets cannot interleave a read and a write.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditEntry, NewPaymentEvent};
use crate::booking::{Booking, BookingWithTour, NewBooking, PaymentOutcome, Tour, TransitionResult};
use crate::error::PaymentResult;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBookingRepository;
pub use postgres::PgBookingRepository;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_tour(&self, tour_id: Uuid) -> PaymentResult<Option<Tour>>;

    /// New bookings start PENDING/PENDING with no invoice
    async fn insert_booking(&self, booking: NewBooking) -> PaymentResult<Booking>;

    async fn find_booking(&self, id: Uuid) -> PaymentResult<Option<BookingWithTour>>;

    /// Attach a new invoice and move to PROCESSING.
    ///
    /// Only applies while the booking is PENDING, PROCESSING or FAILED.
    /// Returns `None` when the booking settled in the meantime.
    async fn mark_processing(&self, id: Uuid, invoice_number: &str)
        -> PaymentResult<Option<Booking>>;

    /// Locate the booking a provider callback refers to.
    ///
    /// Preference: intent == invoice number, intent == transaction id,
    /// id == invoice number, id == transaction id. Empty references never match.
    async fn find_by_payment_reference(
        &self,
        invoice_number: &str,
        transaction_id: &str,
    ) -> PaymentResult<Option<Booking>>;

    /// Apply a provider outcome under the row lock.
    ///
    /// `reference` replaces `payment_intent_id` when present. A non-PAID
    /// outcome for a superseded invoice leaves the booking untouched.
    async fn apply_outcome(
        &self,
        id: Uuid,
        reference: Option<&str>,
        outcome: &PaymentOutcome,
    ) -> PaymentResult<TransitionResult>;

    /// PROCESSING -> PENDING and clear the invoice. `None` when the booking
    /// was no longer PROCESSING.
    async fn reset_processing(&self, id: Uuid) -> PaymentResult<Option<Booking>>;

    /// PROCESSING bookings whose invoice was created before `initiated_before`
    async fn list_stuck_processing(
        &self,
        initiated_before: OffsetDateTime,
        limit: i64,
    ) -> PaymentResult<Vec<Booking>>;

    async fn record_payment_event(&self, event: NewPaymentEvent) -> PaymentResult<()>;

    async fn record_audit(&self, entry: AuditEntry) -> PaymentResult<()>;
}
