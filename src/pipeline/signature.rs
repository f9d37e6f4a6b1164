//! Webhook authenticity and freshness checks.
//!
//! Senders sign the raw request body with HMAC-SHA256 under the shared secret
//! and send the lowercase hex digest in `X-Signature`, optionally prefixed
//! with `sha256=`. Verification must run over the bytes exactly as received,
//! before any JSON parsing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_MAX_AGE_SECONDS: i64 = 5 * 60;

/// Lowercase hex HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature_header` against the HMAC of the raw body.
///
/// Only lowercase hex is accepted, matching the digest format senders are
/// told to produce. The byte comparison is constant-time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .unwrap_or(signature_header);

    if hex_sig.chars().any(|c| c.is_ascii_uppercase()) {
        return false;
    }

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&expected).is_ok()
}

/// Accepts the event when `now - timestamp <= max_age_seconds`.
///
/// There is no upper bound: a timestamp in the future always passes.
/// Headers that are not an integer fail.
pub fn verify_freshness(timestamp_header: &str, now: i64, max_age_seconds: i64) -> bool {
    match timestamp_header.trim().parse::<i64>() {
        Ok(timestamp) => now.saturating_sub(timestamp) <= max_age_seconds,
        Err(_) => false,
    }
}
