//! Money helpers
//!
//! All amounts are integer minor units (cents).

/// Share of the booking total collected at payment time. Fixed business rule.
pub const DEPOSIT_PERCENT: i64 = 50;

/// Deposit owed for a booking total, rounded half-up to the cent.
///
/// `None` when the total is too large to take a percentage of.
pub fn deposit_cents(total_cents: i64) -> Option<i64> {
    total_cents
        .checked_mul(DEPOSIT_PERCENT)?
        .checked_add(50)
        .map(|scaled| scaled / 100)
}

/// Render cents as a plain decimal string, e.g. `453500` -> `"4535.00"`.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Cents as major currency units for provider payloads.
pub fn to_major_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}
