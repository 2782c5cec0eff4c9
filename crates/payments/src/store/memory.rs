//! In-process [`BookingRepository`] for tests and local runs without Postgres.
//!
//! A single mutex guards all tables, giving the same atomicity the
//! Postgres implementation gets from conditional updates and row locks.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tourdesk_shared::{BookingStatus, PaymentStatus};
use uuid::Uuid;

use super::BookingRepository;
use crate::audit::{AuditEntry, NewPaymentEvent};
use crate::booking::{
    plan_for_booking, Booking, BookingWithTour, NewBooking, PaymentOutcome, PlannedTransition,
    Tour, TransitionResult,
};
use crate::error::{PaymentError, PaymentResult};

#[derive(Default)]
struct State {
    tours: HashMap<Uuid, Tour>,
    bookings: HashMap<Uuid, Booking>,
    payment_events: Vec<NewPaymentEvent>,
    audit_logs: Vec<AuditEntry>,
    fail_observability: bool,
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    state: Mutex<State>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tour(&self, tour: Tour) {
        self.state.lock().await.tours.insert(tour.id, tour);
    }

    /// Store a booking as-is, bypassing the PENDING defaults
    pub async fn put_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn booking(&self, id: Uuid) -> Option<Booking> {
        self.state.lock().await.bookings.get(&id).cloned()
    }

    pub async fn payment_events(&self) -> Vec<NewPaymentEvent> {
        self.state.lock().await.payment_events.clone()
    }

    pub async fn audit_logs(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit_logs.clone()
    }

    /// Make payment event and audit inserts fail
    pub async fn set_fail_observability_writes(&self, fail: bool) {
        self.state.lock().await.fail_observability = fail;
    }
}

fn matches_reference(booking: &Booking, reference: Option<&str>) -> (bool, bool) {
    let Some(reference) = reference else {
        return (false, false);
    };
    let by_intent = booking.payment_intent_id.as_deref() == Some(reference);
    let by_id = booking.id.to_string() == reference.to_lowercase();
    (by_intent, by_id)
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_tour(&self, tour_id: Uuid) -> PaymentResult<Option<Tour>> {
        Ok(self.state.lock().await.tours.get(&tour_id).cloned())
    }

    async fn insert_booking(&self, new: NewBooking) -> PaymentResult<Booking> {
        let now = OffsetDateTime::now_utc();
        let booking = Booking {
            id: Uuid::new_v4(),
            tour_package_id: new.tour_package_id,
            customer_name: new.customer_name,
            customer_email: new.customer_email,
            phone: new.phone,
            country: new.country,
            participants: new.participants,
            start_date: new.start_date,
            total_amount_cents: new.total_amount_cents,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: None,
            payment_initiated_at: None,
            paid_at: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock().await;
        if !state.tours.contains_key(&booking.tour_package_id) {
            return Err(PaymentError::Database(
                "bookings.tour_package_id violates foreign key".into(),
            ));
        }
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_booking(&self, id: Uuid) -> PaymentResult<Option<BookingWithTour>> {
        let state = self.state.lock().await;
        let Some(booking) = state.bookings.get(&id) else {
            return Ok(None);
        };
        let tour = state
            .tours
            .get(&booking.tour_package_id)
            .cloned()
            .ok_or_else(|| {
                PaymentError::NotFound(format!(
                    "Tour package {} for booking {} not found",
                    booking.tour_package_id, booking.id
                ))
            })?;
        Ok(Some(BookingWithTour {
            booking: booking.clone(),
            tour_package: tour,
        }))
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        invoice_number: &str,
    ) -> PaymentResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let Some(booking) = state.bookings.get_mut(&id) else {
            return Ok(None);
        };
        if !booking.payment_status.can_initialize() {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        booking.payment_intent_id = Some(invoice_number.to_string());
        booking.payment_status = PaymentStatus::Processing;
        booking.payment_initiated_at = Some(now);
        booking.updated_at = now;
        Ok(Some(booking.clone()))
    }

    async fn find_by_payment_reference(
        &self,
        invoice_number: &str,
        transaction_id: &str,
    ) -> PaymentResult<Option<Booking>> {
        let invoice = Some(invoice_number.trim()).filter(|r| !r.is_empty());
        let transaction = Some(transaction_id.trim()).filter(|r| !r.is_empty());

        let state = self.state.lock().await;
        let best = state
            .bookings
            .values()
            .filter_map(|booking| {
                let (intent_inv, id_inv) = matches_reference(booking, invoice);
                let (intent_txn, id_txn) = matches_reference(booking, transaction);
                let rank = if intent_inv {
                    0
                } else if intent_txn {
                    1
                } else if id_inv {
                    2
                } else if id_txn {
                    3
                } else {
                    return None;
                };
                Some((rank, booking))
            })
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, booking)| booking.clone());
        Ok(best)
    }

    async fn apply_outcome(
        &self,
        id: Uuid,
        reference: Option<&str>,
        outcome: &PaymentOutcome,
    ) -> PaymentResult<TransitionResult> {
        let reference = reference.map(str::trim).filter(|r| !r.is_empty());
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound("Booking not found".into()))?;

        let previous_status = booking.payment_status;
        let now = OffsetDateTime::now_utc();
        let planned = plan_for_booking(booking, reference, outcome, now);

        match &planned {
            PlannedTransition::MarkPaid { paid_at } => {
                booking.payment_status = PaymentStatus::Paid;
                booking.status = BookingStatus::Confirmed;
                booking.paid_at = booking.paid_at.or(Some(*paid_at));
                booking.confirmed_at = booking.confirmed_at.or(Some(now));
                if let Some(reference) = reference {
                    booking.payment_intent_id = Some(reference.to_string());
                }
                booking.updated_at = now;
            }
            PlannedTransition::MarkFailed => {
                booking.payment_status = PaymentStatus::Failed;
                if let Some(reference) = reference {
                    booking.payment_intent_id = Some(reference.to_string());
                }
                booking.updated_at = now;
            }
            PlannedTransition::ReferenceOnly => {
                if let Some(reference) = reference {
                    if booking.payment_intent_id.as_deref() != Some(reference) {
                        booking.payment_intent_id = Some(reference.to_string());
                        booking.updated_at = now;
                    }
                }
            }
            PlannedTransition::Untouched => {}
        }

        Ok(TransitionResult {
            booking: booking.clone(),
            previous_status,
            planned,
        })
    }

    async fn reset_processing(&self, id: Uuid) -> PaymentResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let Some(booking) = state.bookings.get_mut(&id) else {
            return Ok(None);
        };
        if booking.payment_status != PaymentStatus::Processing {
            return Ok(None);
        }
        booking.payment_status = PaymentStatus::Pending;
        booking.payment_intent_id = None;
        booking.payment_initiated_at = None;
        booking.updated_at = OffsetDateTime::now_utc();
        Ok(Some(booking.clone()))
    }

    async fn list_stuck_processing(
        &self,
        initiated_before: OffsetDateTime,
        limit: i64,
    ) -> PaymentResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut stuck: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.payment_status == PaymentStatus::Processing)
            .filter(|b| b.payment_initiated_at.unwrap_or(b.updated_at) < initiated_before)
            .cloned()
            .collect();
        stuck.sort_by_key(|b| b.payment_initiated_at.unwrap_or(b.updated_at));
        stuck.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stuck)
    }

    async fn record_payment_event(&self, event: NewPaymentEvent) -> PaymentResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_observability {
            return Err(PaymentError::Database("payment_events unavailable".into()));
        }
        state.payment_events.push(event);
        Ok(())
    }

    async fn record_audit(&self, entry: AuditEntry) -> PaymentResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_observability {
            return Err(PaymentError::Database("audit_logs unavailable".into()));
        }
        state.audit_logs.push(entry);
        Ok(())
    }
}
