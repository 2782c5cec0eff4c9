//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tourdesk_payments::PaymentError;
use tourdesk_shared::PaymentStatus;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Never says which verification step failed
    #[error("Invalid webhook signature")]
    Unauthorized,

    #[error("{message}")]
    Conflict {
        message: String,
        current_status: PaymentStatus,
    },

    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
            details: None,
        }
    }

    /// Replace the headline of a 500 response, keeping its details
    pub fn context(self, message: &str) -> Self {
        match self {
            ApiError::Internal { details, .. } => ApiError::Internal {
                message: message.to_string(),
                details,
            },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Validation(msg) => ApiError::Validation(msg),
            PaymentError::NotFound(msg) => ApiError::NotFound(msg),
            PaymentError::SignatureInvalid => ApiError::Unauthorized,
            PaymentError::StateConflict {
                message,
                current_status,
            } => ApiError::Conflict {
                message,
                current_status,
            },
            PaymentError::Config(msg) => {
                tracing::error!(error = %msg, "Payment configuration error");
                ApiError::Internal {
                    message: "Payment service is not configured".into(),
                    details: Some(msg),
                }
            }
            e @ PaymentError::MissingProductMapping { .. } => ApiError::Internal {
                message: "Internal server error".into(),
                details: Some(e.to_string()),
            },
            PaymentError::Upstream {
                status, message, ..
            } => {
                tracing::error!(provider_status = ?status, error = %message, "Payment provider error");
                ApiError::Internal {
                    message: "Payment provider error".into(),
                    details: Some(message),
                }
            }
            PaymentError::Database(msg) => {
                // Database messages can carry schema details; keep them in the logs only
                tracing::error!(error = %msg, "Database error");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Conflict {
                message,
                current_status,
            } => json!({ "error": message, "currentStatus": current_status }),
            ApiError::Internal {
                message,
                details: Some(details),
            } => json!({ "error": message, "details": details }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
