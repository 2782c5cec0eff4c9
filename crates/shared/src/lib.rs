#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tourdesk Shared
//!
//! Types and infrastructure used by every Tourdesk crate: booking and
//! payment status enums, money helpers, and the Postgres pool.

pub mod db;
pub mod money;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use money::{deposit_cents, format_amount, to_major_units, DEPOSIT_PERCENT};
pub use types::{BookingStatus, ParseStatusError, PaymentStatus};
