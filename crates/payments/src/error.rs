//! Payment error types

use thiserror::Error;
use tourdesk_shared::PaymentStatus;
use uuid::Uuid;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Missing secrets or environment
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed request body or webhook structure
    #[error("{0}")]
    Validation(String),

    /// Deliberately carries no detail about which check failed
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("No IremboPay product mapping for tour package '{tour_title}' ({tour_id})")]
    MissingProductMapping { tour_id: Uuid, tour_title: String },

    /// IremboPay HTTP or network failure
    #[error("IremboPay error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    /// Operation not allowed from the booking's current payment status
    #[error("{message}")]
    StateConflict {
        message: String,
        current_status: PaymentStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl PaymentError {
    /// Provider 5xx, timeouts and connection failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Upstream {
                retryable: true,
                ..
            }
        )
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::Database(e.to_string())
    }
}

impl From<tourdesk_shared::ParseStatusError> for PaymentError {
    fn from(e: tourdesk_shared::ParseStatusError) -> Self {
        PaymentError::Database(e.to_string())
    }
}
