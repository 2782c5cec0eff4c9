//! Audit log and payment event records
//!
//! Both tables are append-only. Writes happen after the core state
//! transition has committed and never fail the caller; see [`log_best_effort`].

use std::future::Future;

use serde_json::Value;
use uuid::Uuid;

use crate::error::PaymentResult;

/// Actions recorded in `audit_logs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    BookingCreated,
    PaymentInitialized,
    PaymentReset,
    PaymentCompleted,
    PaymentFailed,
    PaymentUpdated,
    PaymentReconciled,
    PaymentExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BookingCreated => "BOOKING_CREATED",
            AuditAction::PaymentInitialized => "PAYMENT_INITIALIZED",
            AuditAction::PaymentReset => "PAYMENT_RESET",
            AuditAction::PaymentCompleted => "PAYMENT_COMPLETED",
            AuditAction::PaymentFailed => "PAYMENT_FAILED",
            AuditAction::PaymentUpdated => "PAYMENT_UPDATED",
            AuditAction::PaymentReconciled => "PAYMENT_RECONCILED",
            AuditAction::PaymentExpired => "PAYMENT_EXPIRED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event names recorded in `payment_events`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentEventKind {
    Success,
    Failed,
    Updated,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::Success => "PAYMENT_SUCCESS",
            PaymentEventKind::Failed => "PAYMENT_FAILED",
            PaymentEventKind::Updated => "PAYMENT_UPDATED",
        }
    }

    /// Audit action that accompanies this event
    pub fn audit_action(&self) -> AuditAction {
        match self {
            PaymentEventKind::Success => AuditAction::PaymentCompleted,
            PaymentEventKind::Failed => AuditAction::PaymentFailed,
            PaymentEventKind::Updated => AuditAction::PaymentUpdated,
        }
    }
}

/// Audit log entry builder
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub booking_id: Option<Uuid>,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            booking_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn booking(mut self, booking_id: Uuid) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentEvent {
    pub booking_id: Uuid,
    pub kind: PaymentEventKind,
    pub metadata: Value,
}

/// Run an observability write and swallow its failure.
///
/// Failures are logged at `warn` with the booking id and cause so lost
/// audit rows show up in the logs.
pub async fn log_best_effort<F>(what: &'static str, booking_id: Uuid, write: F)
where
    F: Future<Output = PaymentResult<()>>,
{
    if let Err(e) = write.await {
        tracing::warn!(
            booking_id = %booking_id,
            record = what,
            error = %e,
            "Failed to write observability record"
        );
    }
}
