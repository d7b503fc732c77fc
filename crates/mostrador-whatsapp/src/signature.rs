// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook authenticity checks.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use mostrador_core::MostradorError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

fn keyed_mac(app_secret: &str, body: &[u8]) -> Result<HmacSha256, MostradorError> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|e| MostradorError::Internal(format!("hmac key error: {e}")))?;
    mac.update(body);
    Ok(mac)
}

/// `X-Hub-Signature-256` value for `body` under `app_secret`.
pub fn sign_payload(app_secret: &str, body: &[u8]) -> Result<String, MostradorError> {
    let digest = keyed_mac(app_secret, body)?.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Check an `X-Hub-Signature-256` header against the raw body.
///
/// The comparison is constant-time.
pub fn verify_signature(
    app_secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), MostradorError> {
    let header =
        header.ok_or_else(|| MostradorError::Unauthorized("missing webhook signature".into()))?;
    let hex_digest = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| MostradorError::Unauthorized("unsupported signature scheme".into()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| MostradorError::Unauthorized("malformed webhook signature".into()))?;

    keyed_mac(app_secret, body)?
        .verify_slice(&expected)
        .map_err(|_| MostradorError::Unauthorized("webhook signature mismatch".into()))
}

/// Query parameters of the webhook subscription handshake.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Returns the challenge to echo when the handshake is valid.
pub fn verify_subscription(
    query: &SubscriptionQuery,
    expected_token: Option<&str>,
) -> Result<String, MostradorError> {
    let expected = expected_token
        .ok_or_else(|| MostradorError::Unauthorized("webhook verify token not configured".into()))?;
    if query.mode.as_deref() != Some("subscribe") {
        return Err(MostradorError::Validation("hub.mode must be `subscribe`".into()));
    }
    if query.verify_token.as_deref() != Some(expected) {
        return Err(MostradorError::Unauthorized("verify token mismatch".into()));
    }
    query
        .challenge
        .clone()
        .ok_or_else(|| MostradorError::Validation("hub.challenge is missing".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "app-secret";

    #[test]
    fn signed_payload_verifies() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = sign_payload(SECRET, body).unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(SECRET, body, Some(&header)).is_ok());
    }

    #[test]
    fn tampered_or_foreign_signatures_fail() {
        let body = b"{}";
        let header = sign_payload(SECRET, body).unwrap();
        assert!(matches!(
            verify_signature(SECRET, b"{ }", Some(&header)),
            Err(MostradorError::Unauthorized(_))
        ));
        assert!(verify_signature("other-secret", body, Some(&header)).is_err());
        assert!(verify_signature(SECRET, body, None).is_err());
        assert!(verify_signature(SECRET, body, Some("sha1=abcd")).is_err());
        assert!(verify_signature(SECRET, body, Some("sha256=zz")).is_err());
    }

    #[test]
    fn subscription_handshake() {
        let query = SubscriptionQuery {
            mode: Some("subscribe".into()),
            verify_token: Some("tok".into()),
            challenge: Some("1158201444".into()),
        };
        assert_eq!(verify_subscription(&query, Some("tok")).unwrap(), "1158201444");
        assert!(matches!(
            verify_subscription(&query, Some("other")),
            Err(MostradorError::Unauthorized(_))
        ));
        assert!(verify_subscription(&query, None).is_err());

        let wrong_mode = SubscriptionQuery {
            mode: Some("unsubscribe".into()),
            ..query
        };
        assert!(matches!(
            verify_subscription(&wrong_mode, Some("tok")),
            Err(MostradorError::Validation(_))
        ));
    }
}
