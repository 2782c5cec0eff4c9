//! IremboPay webhook reconciliation
//!
//! Processing is split in two:
//! 1. Core transition: verify, parse, locate the booking and apply the
//!    outcome under the row lock. Errors here are returned to the caller.
//! 2. Observability: payment event, audit log and confirmation email. These
//!    never fail the delivery, so the provider does not retry a webhook
//!    whose transition already committed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tourdesk_shared::PaymentStatus;
use uuid::Uuid;

use crate::audit::{log_best_effort, AuditAction, AuditEntry, NewPaymentEvent, PaymentEventKind};
use crate::booking::{PaymentOutcome, TransitionResult};
use crate::client::irembopay::parse_timestamp;
use crate::email::BookingNotifier;
use crate::error::{PaymentError, PaymentResult};
use crate::signature::{now_ms, verify_signature};
use crate::store::BookingRepository;

/// Fields read from the webhook `data` object. Missing or non-string
/// values are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookData {
    pub invoice_number: String,
    pub transaction_id: String,
    pub payment_status: String,
    pub paid_at: String,
    pub amount: Option<String>,
    pub currency: Option<String>,
}

impl WebhookData {
    /// Parse a verified body
    pub fn from_body(raw: &str) -> PaymentResult<Self> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|_| PaymentError::Validation("Invalid JSON payload".into()))?;

        let data = payload
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| PaymentError::Validation("Invalid webhook data structure".into()))?;

        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        // amount may arrive as a number or a string
        let scalar = |key: &str| match data.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self {
            invoice_number: text("invoiceNumber"),
            transaction_id: text("transactionId"),
            payment_status: text("paymentStatus"),
            paid_at: text("paidAt"),
            amount: scalar("amount"),
            currency: scalar("currency"),
        })
    }

    /// Reference stored on the booking: invoice number, else transaction id
    pub fn reference(&self) -> Option<&str> {
        [&self.invoice_number, &self.transaction_id]
            .into_iter()
            .find(|r| !r.is_empty())
            .map(String::as_str)
    }
}

/// Where a provider outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSource {
    Webhook,
    /// Status pulled by the stuck payment sweeper
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub booking_id: Uuid,
    pub payment_status: PaymentStatus,
    pub changed: bool,
}

pub struct WebhookReconciler {
    bookings: Arc<dyn BookingRepository>,
    secret: Option<String>,
    notifier: Arc<dyn BookingNotifier>,
}

impl WebhookReconciler {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        secret: Option<String>,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Self {
        Self {
            bookings,
            secret,
            notifier,
        }
    }

    pub async fn handle(&self, raw_body: &str, signature: Option<&str>) -> PaymentResult<WebhookReceipt> {
        self.handle_at(raw_body, signature, now_ms()).await
    }

    /// [`Self::handle`] with an explicit clock for the replay window
    pub async fn handle_at(
        &self,
        raw_body: &str,
        signature: Option<&str>,
        now_ms: i64,
    ) -> PaymentResult<WebhookReceipt> {
        let secret = self.secret.as_deref().unwrap_or_default();
        if let Err(e) = verify_signature(secret, signature, raw_body, now_ms) {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(e);
        }

        let data = WebhookData::from_body(raw_body)?;
        tracing::info!(
            invoice_number = %data.invoice_number,
            transaction_id = %data.transaction_id,
            payment_status = %data.payment_status,
            "IremboPay webhook received"
        );

        let booking = self
            .bookings
            .find_by_payment_reference(&data.invoice_number, &data.transaction_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    invoice_number = %data.invoice_number,
                    transaction_id = %data.transaction_id,
                    "No booking matches webhook reference"
                );
                PaymentError::NotFound("Booking not found".into())
            })?;

        let paid_at = if data.paid_at.is_empty() {
            None
        } else {
            let parsed = parse_timestamp(&data.paid_at);
            if parsed.is_none() {
                tracing::warn!(
                    booking_id = %booking.id,
                    paid_at = %data.paid_at,
                    "Unparseable paidAt, using current time"
                );
            }
            parsed
        };
        let outcome = PaymentOutcome::from_provider_status(&data.payment_status, paid_at);

        let metadata = json!({
            "invoiceNumber": data.invoice_number,
            "transactionId": data.transaction_id,
            "paymentStatus": data.payment_status,
            "paidAt": data.paid_at,
            "amount": data.amount,
            "currency": data.currency,
        });

        let result = self
            .apply_outcome(booking.id, data.reference(), &outcome, metadata, OutcomeSource::Webhook)
            .await?;

        Ok(WebhookReceipt {
            booking_id: result.booking.id,
            payment_status: result.booking.payment_status,
            changed: result.changed(),
        })
    }

    /// Apply an outcome, then write the payment event, audit row and email.
    pub async fn apply_outcome(
        &self,
        booking_id: Uuid,
        reference: Option<&str>,
        outcome: &PaymentOutcome,
        mut metadata: Value,
        source: OutcomeSource,
    ) -> PaymentResult<TransitionResult> {
        let result = self
            .bookings
            .apply_outcome(booking_id, reference, outcome)
            .await
            .map_err(|e| {
                tracing::error!(booking_id = %booking_id, error = %e, "Failed to apply payment outcome");
                e
            })?;

        tracing::info!(
            booking_id = %booking_id,
            previous_status = %result.previous_status,
            payment_status = %result.booking.payment_status,
            changed = result.changed(),
            "Payment outcome applied"
        );

        let kind = match outcome {
            PaymentOutcome::Paid { .. } => PaymentEventKind::Success,
            PaymentOutcome::Failed => PaymentEventKind::Failed,
            PaymentOutcome::Other(_) => PaymentEventKind::Updated,
        };
        let action = match source {
            OutcomeSource::Webhook => kind.audit_action(),
            OutcomeSource::Sweep => AuditAction::PaymentReconciled,
        };

        if let Value::Object(map) = &mut metadata {
            map.insert("bookingId".into(), json!(booking_id));
            map.insert("previousStatus".into(), json!(result.previous_status));
            map.insert("newStatus".into(), json!(result.booking.payment_status));
            map.insert("changed".into(), json!(result.changed()));
        }

        // Provider retries add a row per delivery; `changed` tells them apart
        log_best_effort(
            "payment_event",
            booking_id,
            self.bookings.record_payment_event(NewPaymentEvent {
                booking_id,
                kind,
                metadata: metadata.clone(),
            }),
        )
        .await;
        log_best_effort(
            "audit_log",
            booking_id,
            self.bookings
                .record_audit(AuditEntry::new(action).booking(booking_id).metadata(metadata)),
        )
        .await;

        if result.became_paid() {
            self.send_confirmation(booking_id).await;
        }

        Ok(result)
    }

    async fn send_confirmation(&self, booking_id: Uuid) {
        let booking = match self.bookings.find_booking(booking_id).await {
            Ok(Some(b)) => b,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(booking_id = %booking_id, error = %e, "Failed to load booking for confirmation email");
                return;
            }
        };
        if let Err(e) = self.notifier.payment_confirmed(&booking).await {
            tracing::error!(booking_id = %booking_id, error = %e, "Failed to send confirmation email");
        }
    }
}
