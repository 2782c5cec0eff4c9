//! Deposit invoice creation
//!
//! Creates a 50% deposit invoice with IremboPay and moves the booking to
//! PROCESSING. Nothing is written to the booking unless the provider
//! returned an invoice.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tourdesk_shared::{deposit_cents, format_amount, to_major_units};
use uuid::Uuid;

use crate::audit::{log_best_effort, AuditAction, AuditEntry};
use crate::booking::normalize_phone;
use crate::catalog::ProductCatalog;
use crate::client::{InvoiceCustomer, InvoiceProvider, InvoiceRequest};
use crate::error::{PaymentError, PaymentResult};
use crate::store::BookingRepository;

/// Hosted invoice lifetime
pub const INVOICE_EXPIRY_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub invoice_id: String,
    pub payment_url: String,
}

pub struct PaymentInitializer {
    bookings: Arc<dyn BookingRepository>,
    catalog: Arc<dyn ProductCatalog>,
    provider: Arc<dyn InvoiceProvider>,
}

impl PaymentInitializer {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        catalog: Arc<dyn ProductCatalog>,
        provider: Arc<dyn InvoiceProvider>,
    ) -> Self {
        Self {
            bookings,
            catalog,
            provider,
        }
    }

    pub async fn initialize(&self, booking_id: Uuid) -> PaymentResult<InitializedPayment> {
        if !self.provider.is_configured() {
            tracing::error!("IremboPay credentials or APP_BASE_URL missing");
            return Err(PaymentError::Config(
                "Required environment variables missing".into(),
            ));
        }

        let found = self
            .bookings
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Booking not found".into()))?;
        let booking = found.booking;
        let tour = found.tour_package;

        if !booking.payment_status.can_initialize() {
            return Err(PaymentError::StateConflict {
                message: format!(
                    "Booking payment is already {}",
                    booking.payment_status.as_str().to_lowercase()
                ),
                current_status: booking.payment_status,
            });
        }

        let phone = normalize_phone(booking.phone.as_deref().unwrap_or_default());
        let total = booking.total_amount_cents;
        let deposit = deposit_cents(total)
            .ok_or_else(|| PaymentError::Validation("Booking total is too large".into()))?;
        if deposit <= 0 {
            return Err(PaymentError::Validation(
                "Booking total must be greater than zero".into(),
            ));
        }

        let product_code =
            self.catalog
                .resolve(tour.id)
                .await?
                .ok_or_else(|| PaymentError::MissingProductMapping {
                    tour_id: tour.id,
                    tour_title: tour.title.clone(),
                })?;

        let request = InvoiceRequest {
            transaction_id: booking.id,
            amount_cents: deposit,
            product_code,
            customer: InvoiceCustomer {
                name: booking.customer_name.clone(),
                email: booking.customer_email.clone(),
                phone_number: phone,
            },
            description: format!(
                "50% Deposit for tour booking: {} (Total: ${}, Deposit: ${})",
                tour.title,
                format_amount(total),
                format_amount(deposit)
            ),
            expires_at: OffsetDateTime::now_utc() + Duration::hours(INVOICE_EXPIRY_HOURS),
        };

        let invoice = self.provider.create_invoice(request).await.map_err(|e| {
            tracing::error!(booking_id = %booking.id, error = %e, "Invoice creation failed");
            e
        })?;

        let Some(updated) = self
            .bookings
            .mark_processing(booking.id, &invoice.invoice_number)
            .await?
        else {
            // Settled while the invoice was being created; the new invoice is left unused
            let current = self
                .bookings
                .find_booking(booking.id)
                .await?
                .map(|b| b.booking.payment_status)
                .unwrap_or(booking.payment_status);
            tracing::warn!(
                booking_id = %booking.id,
                invoice_number = %invoice.invoice_number,
                current_status = %current,
                "Booking settled during initialization, invoice orphaned"
            );
            return Err(PaymentError::StateConflict {
                message: "Booking payment status changed during initialization".into(),
                current_status: current,
            });
        };

        tracing::info!(
            booking_id = %updated.id,
            invoice_number = %invoice.invoice_number,
            deposit = %format_amount(deposit),
            "Payment initialized"
        );

        log_best_effort(
            "audit_log",
            updated.id,
            self.bookings.record_audit(
                AuditEntry::new(AuditAction::PaymentInitialized)
                    .booking(updated.id)
                    .metadata(json!({
                        "bookingId": updated.id,
                        "totalAmount": to_major_units(total),
                        "depositAmount": to_major_units(deposit),
                        "customerEmail": updated.customer_email,
                        "invoiceId": invoice.invoice_number,
                        "transactionId": invoice.transaction_id,
                    })),
            ),
        )
        .await;

        Ok(InitializedPayment {
            invoice_id: invoice.invoice_number,
            payment_url: invoice.payment_url,
        })
    }
}
