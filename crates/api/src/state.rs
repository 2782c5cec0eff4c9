//! Application state

use std::sync::Arc;

use tourdesk_payments::PaymentService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub payments: Arc<PaymentService>,
}

impl AppState {
    pub fn new(config: Config, payments: PaymentService) -> Self {
        Self {
            config,
            payments: Arc::new(payments),
        }
    }
}
