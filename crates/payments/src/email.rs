//! Booking confirmation emails via Resend

use async_trait::async_trait;
use serde_json::json;
use tourdesk_shared::{deposit_cents, format_amount};

use crate::booking::BookingWithTour;
use crate::error::{PaymentError, PaymentResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Sent after a booking's deposit is confirmed
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn payment_confirmed(&self, booking: &BookingWithTour) -> PaymentResult<()>;
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub resend_api_key: Option<String>,
    pub from: String,
    pub api_url: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Bookings <bookings@tourdesk.app>".to_string()),
            api_url: RESEND_API_URL.to_string(),
        }
    }
}

/// Resend-backed [`BookingNotifier`]. Without an API key every send is a
/// logged no-op.
#[derive(Clone)]
pub struct BookingEmailService {
    config: EmailConfig,
    http: reqwest::Client,
}

impl BookingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        if config.resend_api_key.is_none() {
            tracing::warn!("RESEND_API_KEY not set, booking emails disabled");
        }
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    pub fn disabled() -> Self {
        Self {
            config: EmailConfig {
                resend_api_key: None,
                from: String::new(),
                api_url: RESEND_API_URL.to_string(),
            },
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.resend_api_key.is_some()
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> PaymentResult<()> {
        let Some(api_key) = self.config.resend_api_key.as_deref() else {
            tracing::debug!(to, subject, "Email disabled, skipping send");
            return Ok(());
        };

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.config.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| PaymentError::Upstream {
                status: None,
                message: format!("Email delivery failed: {}", e),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Upstream {
                status: Some(status),
                message: format!(
                    "Email API returned {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
                retryable: status >= 500,
            });
        }

        tracing::info!(to, subject, "Email sent");
        Ok(())
    }
}

fn confirmation_html(booking: &BookingWithTour) -> String {
    let b = &booking.booking;
    let deposit = deposit_cents(b.total_amount_cents).unwrap_or(b.total_amount_cents);
    let balance = b.total_amount_cents - deposit;
    format!(
        "<h2>Your booking is confirmed</h2>\
         <p>Hi {name},</p>\
         <p>We received your deposit for <strong>{tour}</strong> starting {start}.</p>\
         <ul>\
         <li>Participants: {participants}</li>\
         <li>Total: ${total}</li>\
         <li>Deposit paid: ${deposit}</li>\
         <li>Balance due before the tour: ${balance}</li>\
         </ul>\
         <p>Booking reference: {id}</p>",
        name = b.customer_name,
        tour = booking.tour_package.title,
        start = b.start_date,
        participants = b.participants,
        total = format_amount(b.total_amount_cents),
        deposit = format_amount(deposit),
        balance = format_amount(balance),
        id = b.id,
    )
}

#[async_trait]
impl BookingNotifier for BookingEmailService {
    async fn payment_confirmed(&self, booking: &BookingWithTour) -> PaymentResult<()> {
        let subject = format!("Booking confirmed: {}", booking.tour_package.title);
        self.send(
            &booking.booking.customer_email,
            &subject,
            confirmation_html(booking),
        )
        .await
    }
}
