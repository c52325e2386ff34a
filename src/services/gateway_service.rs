//! Payment-gateway webhook authenticity checks.
//!
//! The gateway signs every notification with HMAC-SHA256 over the raw
//! request body using a shared secret, and sends the result as
//! `X-Gateway-Signature: sha256=<hex>`. Verification runs before any
//! business field is parsed or trusted; a notification that fails here is
//! rejected without side effects.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the gateway's signature.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook signature against the raw body.
///
/// # Process
///
/// 1. Strip the `sha256=` prefix and hex-decode the claimed signature
/// 2. Compute HMAC-SHA256(secret, raw_body)
/// 3. Compare in constant time (`Mac::verify_slice`)
///
/// Every failure mode - missing header, malformed prefix, non-hex
/// payload, wrong MAC - collapses into the same `InvalidSignature`
/// error so the response leaks nothing about which check tripped.
pub fn verify_signature(
    secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<(), AppError> {
    let header = signature_header.ok_or(AppError::InvalidSignature)?;
    let encoded = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(AppError::InvalidSignature)?;
    let claimed = hex::decode(encoded).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&claimed)
        .map_err(|_| AppError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test-side twin of the gateway's signing step.
    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    const SECRET: &str = "test-webhook-secret";
    const BODY: &[u8] = br#"{"event_type":"payment.completed"}"#;

    #[test]
    fn valid_signature_passes() {
        let header = sign(SECRET, BODY);
        assert!(verify_signature(SECRET, Some(&header), BODY).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign(SECRET, BODY);
        let tampered = br#"{"event_type":"payment.completed","amount":"9999.00"}"#;
        assert!(verify_signature(SECRET, Some(&header), tampered).is_err());
    }

    #[test]
    fn wrong_secret_fails() {
        let header = sign("other-secret", BODY);
        assert!(verify_signature(SECRET, Some(&header), BODY).is_err());
    }

    #[test]
    fn missing_header_fails() {
        assert!(verify_signature(SECRET, None, BODY).is_err());
    }

    #[test]
    fn missing_prefix_fails() {
        let header = sign(SECRET, BODY);
        let bare = header.strip_prefix("sha256=").unwrap();
        assert!(verify_signature(SECRET, Some(bare), BODY).is_err());
    }

    #[test]
    fn non_hex_signature_fails() {
        assert!(verify_signature(SECRET, Some("sha256=not-hex"), BODY).is_err());
    }
}
