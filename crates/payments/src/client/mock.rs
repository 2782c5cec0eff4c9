use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{InvoiceProvider, InvoiceRequest, InvoiceSnapshot, ProviderInvoice};
use crate::error::{PaymentError, PaymentResult};

/// How the mock answers `create_invoice`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    /// Provider returned this HTTP status
    FailWith(u16),
    Timeout,
}

/// Scripted provider for tests and local development
pub struct MockInvoiceProvider {
    configured: bool,
    behavior: Mutex<MockBehavior>,
    counter: AtomicU64,
    requests: Mutex<Vec<InvoiceRequest>>,
    snapshots: Mutex<HashMap<String, InvoiceSnapshot>>,
}

impl Default for MockInvoiceProvider {
    fn default() -> Self {
        Self {
            configured: true,
            behavior: Mutex::new(MockBehavior::Succeed),
            counter: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

impl MockInvoiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaves like a deployment with no credentials
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().await = behavior;
    }

    /// Provider-side state returned by `fetch_invoice`
    pub async fn set_snapshot(&self, snapshot: InvoiceSnapshot) {
        self.snapshots
            .lock()
            .await
            .insert(snapshot.invoice_number.clone(), snapshot);
    }

    pub async fn requests(&self) -> Vec<InvoiceRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl InvoiceProvider for MockInvoiceProvider {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<ProviderInvoice> {
        self.requests.lock().await.push(request.clone());

        match self.behavior.lock().await.clone() {
            MockBehavior::Succeed => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                let invoice_number = format!("MOCK-INV-{:06}", n);
                Ok(ProviderInvoice {
                    payment_url: format!("https://checkout.mock/{}", invoice_number),
                    invoice_number,
                    transaction_id: Some(request.transaction_id.to_string()),
                })
            }
            MockBehavior::FailWith(status) => Err(PaymentError::Upstream {
                status: Some(status),
                message: format!("HTTP {}: mock failure", status),
                retryable: status >= 500,
            }),
            MockBehavior::Timeout => Err(PaymentError::Upstream {
                status: None,
                message: "Request to IremboPay timed out".to_string(),
                retryable: true,
            }),
        }
    }

    async fn fetch_invoice(&self, invoice_number: &str) -> PaymentResult<InvoiceSnapshot> {
        self.snapshots
            .lock()
            .await
            .get(invoice_number)
            .cloned()
            .ok_or_else(|| PaymentError::Upstream {
                status: Some(404),
                message: format!("Invoice {} not found", invoice_number),
                retryable: false,
            })
    }
}
