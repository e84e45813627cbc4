//! Inbound webhook signature verification.
//!
//! Adapted from the teacher's outbound callback signer
//! (`common::api::callback::{generate_callback_signature, verify_callback_signature}`,
//! written for its own QR-payment callback delivery) to the Stripe
//! convention of verifying a signature the *other* party generated over
//! `timestamp + "." + raw_body`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age, in seconds, of a webhook delivery before it is rejected as
/// stale (§4.5: "reject if timestamp older than 5 minutes").
pub const WEBHOOK_MAX_AGE_SECONDS: i64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookSignatureError {
    #[error("webhook secret not configured")]
    MissingSecret,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
    #[error("timestamp outside tolerance window")]
    StaleTimestamp,
}

fn hmac_sha256_hex(secret: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a Stripe-style `t=<timestamp>,v1=<hex>` signature header against
/// `raw_body`, using `secret`. Fails closed: a missing secret is always a
/// hard error, never silently accepted (§4.5 / §7 Configuration).
pub fn verify_stripe_signature(
    secret: Option<&[u8]>,
    signature_header: &str,
    raw_body: &str,
    now_unix: i64,
) -> Result<(), WebhookSignatureError> {
    let secret = secret.ok_or(WebhookSignatureError::MissingSecret)?;

    let mut timestamp: Option<i64> = None;
    let mut v1: Option<&str> = None;
    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => v1 = Some(v),
            _ => {}
        }
    }
    let (timestamp, v1) = match (timestamp, v1) {
        (Some(t), Some(v)) => (t, v),
        _ => return Err(WebhookSignatureError::Malformed),
    };

    if (now_unix - timestamp).abs() > WEBHOOK_MAX_AGE_SECONDS {
        return Err(WebhookSignatureError::StaleTimestamp);
    }

    let signed_payload = format!("{timestamp}.{raw_body}");
    let expected = hmac_sha256_hex(secret, &signed_payload);

    if expected.as_bytes().ct_eq(v1.as_bytes()).into() {
        Ok(())
    } else {
        Err(WebhookSignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], timestamp: i64, body: &str) -> String {
        let payload = format!("{timestamp}.{body}");
        format!("t={timestamp},v1={}", hmac_sha256_hex(secret, &payload))
    }

    #[test]
    fn missing_secret_fails_closed() {
        let err = verify_stripe_signature(None, "t=1,v1=abc", "{}", 1).unwrap_err();
        assert_eq!(err, WebhookSignatureError::MissingSecret);
    }

    #[test]
    fn valid_signature_is_accepted() {
        let secret = b"whsec_test";
        let body = r#"{"id":"evt_1"}"#;
        let header = sign(secret, 1_000, body);
        verify_stripe_signature(Some(secret), &header, body, 1_000).unwrap();
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = b"whsec_test";
        let header = sign(secret, 1_000, r#"{"id":"evt_1"}"#);
        let err = verify_stripe_signature(Some(secret), &header, r#"{"id":"evt_2"}"#, 1_000).unwrap_err();
        assert_eq!(err, WebhookSignatureError::Mismatch);
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let secret = b"whsec_test";
        let body = "{}";
        let header = sign(secret, 1_000, body);
        let err = verify_stripe_signature(Some(secret), &header, body, 1_000 + 301).unwrap_err();
        assert_eq!(err, WebhookSignatureError::StaleTimestamp);
    }
}
