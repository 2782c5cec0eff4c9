//! Stuck payment reconciliation
//!
//! Webhooks get lost. Bookings left in PROCESSING past a threshold are
//! checked against the provider: settled invoices go through the same
//! transition path as webhooks, and expired ones are reset to PENDING.

use std::sync::Arc;

use serde_json::json;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::audit::{log_best_effort, AuditAction, AuditEntry};
use crate::booking::{Booking, PaymentOutcome};
use crate::client::InvoiceProvider;
use crate::error::PaymentResult;
use crate::initializer::INVOICE_EXPIRY_HOURS;
use crate::store::BookingRepository;
use crate::webhook::{OutcomeSource, WebhookReconciler};

pub const DEFAULT_STUCK_MINUTES: i64 = 30;
const DEFAULT_BATCH_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub paid: usize,
    pub failed: usize,
    pub expired: usize,
    pub untouched: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepAction {
    Paid,
    Failed,
    Expired,
    Untouched,
}

pub struct StuckPaymentSweeper {
    bookings: Arc<dyn BookingRepository>,
    provider: Arc<dyn InvoiceProvider>,
    reconciler: Arc<WebhookReconciler>,
    stuck_after: Duration,
    batch_limit: i64,
}

impl StuckPaymentSweeper {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        provider: Arc<dyn InvoiceProvider>,
        reconciler: Arc<WebhookReconciler>,
    ) -> Self {
        Self {
            bookings,
            provider,
            reconciler,
            stuck_after: Duration::minutes(DEFAULT_STUCK_MINUTES),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_stuck_after(mut self, stuck_after: Duration) -> Self {
        self.stuck_after = stuck_after;
        self
    }

    pub fn with_batch_limit(mut self, limit: i64) -> Self {
        self.batch_limit = limit;
        self
    }

    pub async fn sweep(&self) -> PaymentResult<SweepSummary> {
        self.sweep_at(OffsetDateTime::now_utc()).await
    }

    pub async fn sweep_at(&self, now: OffsetDateTime) -> PaymentResult<SweepSummary> {
        let stuck = self
            .bookings
            .list_stuck_processing(now - self.stuck_after, self.batch_limit)
            .await?;

        let mut summary = SweepSummary {
            examined: stuck.len(),
            ..Default::default()
        };

        for booking in &stuck {
            match self.reconcile(booking, now).await {
                Ok(SweepAction::Paid) => summary.paid += 1,
                Ok(SweepAction::Failed) => summary.failed += 1,
                Ok(SweepAction::Expired) => summary.expired += 1,
                Ok(SweepAction::Untouched) => summary.untouched += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(
                        booking_id = %booking.id,
                        invoice_number = ?booking.payment_intent_id,
                        error = %e,
                        "Failed to reconcile stuck payment"
                    );
                }
            }
        }

        if summary.examined > 0 {
            tracing::info!(
                examined = summary.examined,
                paid = summary.paid,
                failed = summary.failed,
                expired = summary.expired,
                untouched = summary.untouched,
                errors = summary.errors,
                "Stuck payment sweep complete"
            );
        }
        Ok(summary)
    }

    async fn reconcile(&self, booking: &Booking, now: OffsetDateTime) -> PaymentResult<SweepAction> {
        let Some(invoice_number) = booking.payment_intent_id.as_deref() else {
            return self.expire(booking.id, None, "no invoice on record").await;
        };

        let snapshot = self.provider.fetch_invoice(invoice_number).await?;
        let outcome =
            PaymentOutcome::from_provider_status(&snapshot.payment_status, snapshot.paid_at);

        match outcome {
            PaymentOutcome::Paid { .. } | PaymentOutcome::Failed => {
                let result = self
                    .reconciler
                    .apply_outcome(
                        booking.id,
                        Some(invoice_number),
                        &outcome,
                        json!({
                            "invoiceNumber": invoice_number,
                            "transactionId": snapshot.transaction_id,
                            "paymentStatus": snapshot.payment_status,
                            "source": "sweeper",
                        }),
                        OutcomeSource::Sweep,
                    )
                    .await?;

                Ok(match (result.changed(), &outcome) {
                    (false, _) => SweepAction::Untouched,
                    (true, PaymentOutcome::Paid { .. }) => SweepAction::Paid,
                    (true, _) => SweepAction::Failed,
                })
            }
            PaymentOutcome::Other(_) => {
                let expired = snapshot.is_expired(now)
                    || (snapshot.expires_at.is_none()
                        && booking
                            .payment_initiated_at
                            .is_some_and(|at| at + Duration::hours(INVOICE_EXPIRY_HOURS) <= now));
                if expired {
                    self.expire(booking.id, Some(invoice_number), "invoice expired unpaid")
                        .await
                } else {
                    Ok(SweepAction::Untouched)
                }
            }
        }
    }

    async fn expire(
        &self,
        booking_id: Uuid,
        invoice_number: Option<&str>,
        reason: &str,
    ) -> PaymentResult<SweepAction> {
        if self.bookings.reset_processing(booking_id).await?.is_none() {
            return Ok(SweepAction::Untouched);
        }

        tracing::info!(booking_id = %booking_id, reason, "Expired payment reset to pending");
        log_best_effort(
            "audit_log",
            booking_id,
            self.bookings.record_audit(
                AuditEntry::new(AuditAction::PaymentExpired)
                    .booking(booking_id)
                    .metadata(json!({
                        "bookingId": booking_id,
                        "invoiceId": invoice_number,
                        "reason": reason,
                    })),
            ),
        )
        .await;
        Ok(SweepAction::Expired)
    }
}
