// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tourdesk Payments
//!
//! Deposit payments for tour bookings through IremboPay.
//!
//! ## Flow
//!
//! - **Initialize**: create a 50% deposit invoice and move the booking to PROCESSING
//! - **Webhook**: verify the provider signature and apply PAID/FAILED to the booking
//! - **Reset**: return a PROCESSING booking to PENDING when checkout is abandoned
//! - **Sweep**: reconcile bookings stuck in PROCESSING against the provider

pub mod audit;
pub mod booking;
pub mod bookings;
pub mod catalog;
pub mod client;
pub mod email;
pub mod error;
pub mod initializer;
pub mod reset;
pub mod signature;
pub mod store;
pub mod sweeper;
pub mod webhook;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

pub use audit::{AuditAction, AuditEntry, NewPaymentEvent, PaymentEventKind};
pub use booking::{Booking, BookingWithTour, NewBooking, PaymentOutcome, Tour, TransitionResult};
pub use bookings::{parse_start_date, BookingService, CreateBooking};
pub use catalog::{
    validate_mappings, MappingReport, PgProductCatalog, ProductCatalog, ProductCode,
    StaticProductCatalog,
};
pub use client::{
    InvoiceProvider, InvoiceSnapshot, IremboPayClient, IremboPayConfig, MockInvoiceProvider,
};
pub use email::{BookingEmailService, BookingNotifier, EmailConfig};
pub use error::{PaymentError, PaymentResult};
pub use initializer::{InitializedPayment, PaymentInitializer};
pub use reset::{PaymentResetter, ResetOutcome};
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use store::{BookingRepository, InMemoryBookingRepository, PgBookingRepository};
pub use sweeper::{StuckPaymentSweeper, SweepSummary};
pub use webhook::{WebhookReceipt, WebhookReconciler};

/// Entry point for the payment flow
pub struct PaymentService {
    bookings: Arc<dyn BookingRepository>,
    provider: Arc<dyn InvoiceProvider>,
    pub booking_service: BookingService,
    pub initializer: PaymentInitializer,
    pub webhooks: Arc<WebhookReconciler>,
    pub resetter: PaymentResetter,
}

impl PaymentService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        catalog: Arc<dyn ProductCatalog>,
        provider: Arc<dyn InvoiceProvider>,
        webhook_secret: Option<String>,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Self {
        let webhooks = Arc::new(WebhookReconciler::new(
            bookings.clone(),
            webhook_secret,
            notifier,
        ));
        Self {
            booking_service: BookingService::new(bookings.clone()),
            initializer: PaymentInitializer::new(bookings.clone(), catalog, provider.clone()),
            resetter: PaymentResetter::new(bookings.clone()),
            webhooks,
            bookings,
            provider,
        }
    }

    /// Postgres store, IremboPay client and Resend email, configured from env.
    ///
    /// Product codes come from `IREMBO_PRODUCT_MAPPINGS_PATH` when set, otherwise
    /// from the `tour_product_codes` table.
    pub async fn from_env(pool: PgPool) -> PaymentResult<Self> {
        let client = IremboPayClient::from_env()?;
        let secret = client.config().secret_key.clone();
        if !client.is_configured() {
            tracing::warn!("IremboPay not configured - payment initialization disabled");
        }

        let catalog: Arc<dyn ProductCatalog> = match std::env::var("IREMBO_PRODUCT_MAPPINGS_PATH")
        {
            Ok(path) if !path.trim().is_empty() => {
                Arc::new(StaticProductCatalog::from_json_file(path.trim()).await?)
            }
            _ => Arc::new(PgProductCatalog::new(pool.clone())),
        };

        Ok(Self::new(
            Arc::new(PgBookingRepository::new(pool)),
            catalog,
            Arc::new(client),
            secret,
            Arc::new(BookingEmailService::from_env()),
        ))
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub async fn create_booking(&self, input: CreateBooking) -> PaymentResult<Booking> {
        self.booking_service.create_booking(input).await
    }

    pub async fn get_booking(&self, id: Uuid) -> PaymentResult<BookingWithTour> {
        self.booking_service.get_booking(id).await
    }

    pub async fn initialize_payment(&self, booking_id: Uuid) -> PaymentResult<InitializedPayment> {
        self.initializer.initialize(booking_id).await
    }

    pub async fn handle_webhook(
        &self,
        raw_body: &str,
        signature: Option<&str>,
    ) -> PaymentResult<WebhookReceipt> {
        self.webhooks.handle(raw_body, signature).await
    }

    pub async fn reset_payment(&self, booking_id: Uuid) -> PaymentResult<ResetOutcome> {
        self.resetter.reset(booking_id).await
    }

    /// Sweeper sharing this service's store, provider and reconciler
    pub fn sweeper(&self) -> StuckPaymentSweeper {
        StuckPaymentSweeper::new(
            self.bookings.clone(),
            self.provider.clone(),
            self.webhooks.clone(),
        )
    }
}
