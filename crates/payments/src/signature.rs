//! IremboPay webhook signature verification
//!
//! The provider sends `irembopay-signature: t=<unix-ms>,s=<hex hmac>` where
//! the HMAC-SHA256 is computed over `"<t>#<raw body>"` with the shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{PaymentError, PaymentResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "irembopay-signature";

/// Replay window, in milliseconds
pub const TIMESTAMP_TOLERANCE_MS: i64 = 300_000;

/// Parsed `t=..,s=..` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    /// Timestamp exactly as sent; the signed payload uses this text
    pub timestamp_raw: &'a str,
    pub timestamp_ms: i64,
    pub signature_hex: &'a str,
}

/// Parse the signature header. Returns `None` when either part is absent
/// or the timestamp is not an integer.
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader<'_>> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key.trim() {
                "t" => timestamp = Some(value.trim()),
                "s" => signature = Some(value.trim()),
                _ => {}
            }
        }
    }

    let timestamp_raw = timestamp.filter(|t| !t.is_empty())?;
    let signature_hex = signature.filter(|s| !s.is_empty())?;
    let timestamp_ms = timestamp_raw.parse::<i64>().ok()?;

    Some(SignatureHeader {
        timestamp_raw,
        timestamp_ms,
        signature_hex,
    })
}

fn compute_mac(secret: &str, timestamp: &str, body: &str) -> PaymentResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::SignatureInvalid)?;
    mac.update(timestamp.as_bytes());
    mac.update(b"#");
    mac.update(body.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify a webhook delivery against the shared secret.
///
/// Every failure collapses into [`PaymentError::SignatureInvalid`]; the
/// specific reason is only logged at debug level.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &str,
    now_ms: i64,
) -> PaymentResult<()> {
    if secret.is_empty() {
        tracing::error!("Webhook secret not configured, rejecting delivery");
        return Err(PaymentError::SignatureInvalid);
    }

    let header = header.ok_or_else(|| {
        tracing::debug!("Missing signature header");
        PaymentError::SignatureInvalid
    })?;

    let parsed = parse_signature_header(header).ok_or_else(|| {
        tracing::debug!("Malformed signature header");
        PaymentError::SignatureInvalid
    })?;

    let skew = now_ms.saturating_sub(parsed.timestamp_ms).saturating_abs();
    if skew > TIMESTAMP_TOLERANCE_MS {
        tracing::debug!(
            timestamp = parsed.timestamp_ms,
            now = now_ms,
            skew_ms = skew,
            "Webhook timestamp outside tolerance"
        );
        return Err(PaymentError::SignatureInvalid);
    }

    let provided = hex::decode(parsed.signature_hex).map_err(|_| {
        tracing::debug!("Signature is not valid hex");
        PaymentError::SignatureInvalid
    })?;

    let expected = compute_mac(secret, parsed.timestamp_raw, body)?;

    if provided.len() != expected.len() {
        tracing::debug!("Signature length mismatch");
        return Err(PaymentError::SignatureInvalid);
    }

    if bool::from(provided.ct_eq(&expected)) {
        Ok(())
    } else {
        tracing::debug!("Signature mismatch");
        Err(PaymentError::SignatureInvalid)
    }
}

/// Build a header value the way IremboPay signs deliveries.
pub fn sign_payload(secret: &str, timestamp_ms: i64, body: &str) -> PaymentResult<String> {
    let timestamp = timestamp_ms.to_string();
    let mac = compute_mac(secret, &timestamp, body)?;
    Ok(format!("t={},s={}", timestamp, hex::encode(mac)))
}

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}
