//! IremboPay hosted invoice API (v2)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tourdesk_shared::to_major_units;

use super::{InvoiceProvider, InvoiceRequest, InvoiceSnapshot, ProviderInvoice};
use crate::error::{PaymentError, PaymentResult};

pub const SANDBOX_API_URL: &str = "https://api.sandbox.irembopay.com";
const SECRET_KEY_HEADER: &str = "irembopay-secretKey";
const API_VERSION: &str = "2";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Extra attempts for idempotent status lookups
const FETCH_RETRIES: usize = 2;
const FETCH_RETRY_INTERVAL_MS: u64 = 250;

/// IremboPay configuration
#[derive(Debug, Clone)]
pub struct IremboPayConfig {
    /// Also the webhook signing secret
    pub secret_key: Option<String>,
    /// Public base URL of this application, used for callback and return URLs
    pub app_base_url: Option<String>,
    pub api_url: String,
    pub payment_account: String,
    pub currency: String,
    pub timeout: Duration,
}

impl IremboPayConfig {
    /// Load from environment. Missing credentials are allowed here and
    /// reported by [`IremboPayClient::is_configured`].
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let timeout_secs = non_empty("IREMBO_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            secret_key: non_empty("IREMBO_SECRET_KEY"),
            app_base_url: non_empty("APP_BASE_URL")
                .or_else(|| non_empty("NEXT_PUBLIC_APP_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            api_url: non_empty("IREMBO_API_URL")
                .unwrap_or_else(|| SANDBOX_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            payment_account: non_empty("IREMBO_PAYMENT_ACCOUNT").unwrap_or_default(),
            currency: non_empty("IREMBO_CURRENCY").unwrap_or_else(|| "USD".to_string()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn callback_url(&self) -> Option<String> {
        self.app_base_url
            .as_ref()
            .map(|base| format!("{}/api/payments/webhook", base))
    }

    pub fn return_url(&self, booking_id: &uuid::Uuid) -> Option<String> {
        self.app_base_url
            .as_ref()
            .map(|base| format!("{}/bookings/{}/success", base, booking_id))
    }
}

/// Response envelope shared by all IremboPay endpoints
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceData {
    invoice_number: String,
    #[serde(default)]
    payment_link_url: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    expiry_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentItem<'a> {
    code: &'a str,
    quantity: u32,
    unit_amount: f64,
}

/// reqwest client for the IremboPay invoice API
pub struct IremboPayClient {
    config: IremboPayConfig,
    http: reqwest::Client,
}

impl IremboPayClient {
    pub fn new(config: IremboPayConfig) -> PaymentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(IremboPayConfig::from_env())
    }

    pub fn config(&self) -> &IremboPayConfig {
        &self.config
    }

    fn secret(&self) -> PaymentResult<&str> {
        self.config
            .secret_key
            .as_deref()
            .ok_or_else(|| PaymentError::Config("IREMBO_SECRET_KEY is not set".into()))
    }

    async fn read_envelope(response: reqwest::Response) -> PaymentResult<InvoiceData> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Upstream {
                status: Some(status.as_u16()),
                message: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(200).collect::<String>()
                ),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let envelope: Envelope<InvoiceData> = response.json().await.map_err(|e| {
            PaymentError::Upstream {
                status: Some(status.as_u16()),
                message: format!("Unreadable response: {}", e),
                retryable: false,
            }
        })?;

        if envelope.success == Some(false) {
            return Err(PaymentError::Upstream {
                status: Some(status.as_u16()),
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request rejected".to_string()),
                retryable: false,
            });
        }

        envelope.data.ok_or_else(|| PaymentError::Upstream {
            status: Some(status.as_u16()),
            message: "Response has no data".to_string(),
            retryable: false,
        })
    }

    async fn get_invoice(&self, invoice_number: &str) -> PaymentResult<InvoiceSnapshot> {
        let url = format!("{}/payments/invoices/{}", self.config.api_url, invoice_number);
        let response = self
            .http
            .get(url)
            .header(SECRET_KEY_HEADER, self.secret()?)
            .header("X-API-Version", API_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        let data = Self::read_envelope(response).await?;
        Ok(InvoiceSnapshot {
            invoice_number: data.invoice_number,
            transaction_id: data.transaction_id,
            payment_status: data.payment_status.unwrap_or_default(),
            paid_at: data.paid_at.as_deref().and_then(parse_timestamp),
            expires_at: data.expiry_at.as_deref().and_then(parse_timestamp),
        })
    }
}

fn transport_error(e: reqwest::Error) -> PaymentError {
    let retryable = e.is_timeout() || e.is_connect();
    let message = if e.is_timeout() {
        "Request to IremboPay timed out".to_string()
    } else {
        format!("Request to IremboPay failed: {}", e)
    };
    PaymentError::Upstream {
        status: e.status().map(|s| s.as_u16()),
        message,
        retryable,
    }
}

/// Parse an RFC 3339 provider timestamp
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

#[async_trait]
impl InvoiceProvider for IremboPayClient {
    fn is_configured(&self) -> bool {
        self.config.secret_key.is_some() && self.config.app_base_url.is_some()
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<ProviderInvoice> {
        let secret = self.secret()?;
        let callback_url = self
            .config
            .callback_url()
            .ok_or_else(|| PaymentError::Config("APP_BASE_URL is not set".into()))?;
        let return_url = self
            .config
            .return_url(&request.transaction_id)
            .ok_or_else(|| PaymentError::Config("APP_BASE_URL is not set".into()))?;
        let expiry_at = request.expires_at.format(&Rfc3339).map_err(|e| {
            PaymentError::Validation(format!("Invalid invoice expiry: {}", e))
        })?;

        let body = json!({
            "transactionId": request.transaction_id.to_string(),
            "paymentAccountIdentifier": self.config.payment_account,
            "customer": {
                "email": request.customer.email,
                "phoneNumber": request.customer.phone_number,
                "name": request.customer.name,
            },
            "paymentItems": [PaymentItem {
                code: request.product_code.as_str(),
                quantity: 1,
                unit_amount: to_major_units(request.amount_cents),
            }],
            "currency": self.config.currency,
            "description": request.description,
            "expiryAt": expiry_at,
            "callbackUrl": callback_url,
            "returnUrl": return_url,
            "language": "EN",
        });

        let response = self
            .http
            .post(format!("{}/payments/invoices", self.config.api_url))
            .header(SECRET_KEY_HEADER, secret)
            .header("X-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let data = Self::read_envelope(response).await?;
        let payment_url = data.payment_link_url.ok_or_else(|| PaymentError::Upstream {
            status: None,
            message: "Invoice created without a payment link".to_string(),
            retryable: false,
        })?;

        tracing::info!(
            booking_id = %request.transaction_id,
            invoice_number = %data.invoice_number,
            "IremboPay invoice created"
        );

        Ok(ProviderInvoice {
            invoice_number: data.invoice_number,
            payment_url,
            transaction_id: data.transaction_id,
        })
    }

    async fn fetch_invoice(&self, invoice_number: &str) -> PaymentResult<InvoiceSnapshot> {
        let strategy = FixedInterval::from_millis(FETCH_RETRY_INTERVAL_MS).take(FETCH_RETRIES);
        RetryIf::spawn(
            strategy,
            || self.get_invoice(invoice_number),
            |e: &PaymentError| {
                let retry = e.is_retryable();
                if retry {
                    tracing::debug!(invoice_number, error = %e, "Retrying invoice lookup");
                }
                retry
            },
        )
        .await
    }
}
