//! Payment provider clients

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::ProductCode;
use crate::error::PaymentResult;

pub mod irembopay;
pub mod mock;

pub use irembopay::{IremboPayClient, IremboPayConfig};
pub use mock::MockInvoiceProvider;

/// Customer contact details sent with an invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceCustomer {
    pub name: String,
    pub email: String,
    /// Digits with an optional leading `+`
    pub phone_number: String,
}

/// Deposit invoice for one booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    /// Merchant reference; always the booking id
    pub transaction_id: Uuid,
    pub amount_cents: i64,
    pub product_code: ProductCode,
    pub customer: InvoiceCustomer,
    pub description: String,
    pub expires_at: OffsetDateTime,
}

/// Invoice returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInvoice {
    pub invoice_number: String,
    pub payment_url: String,
    pub transaction_id: Option<String>,
}

/// Current provider-side state of an invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSnapshot {
    pub invoice_number: String,
    pub transaction_id: Option<String>,
    /// Raw provider status such as `NEW`, `PAID`, `FAILED`
    pub payment_status: String,
    pub paid_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
}

impl InvoiceSnapshot {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Hosted invoice API
#[async_trait]
pub trait InvoiceProvider: Send + Sync {
    /// False when credentials are missing; callers fail fast before any request
    fn is_configured(&self) -> bool;

    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<ProviderInvoice>;

    async fn fetch_invoice(&self, invoice_number: &str) -> PaymentResult<InvoiceSnapshot>;
}
