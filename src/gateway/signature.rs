//! HMAC-SHA256 webhook signatures.
//!
//! The processor signs the manifest `id:<data_id>;request-id:<request_id>;ts:<ts>;`
//! with the shared secret and sends `x-signature: ts=<ts>,v1=<hex digest>`.
//! Verification is constant-time and happens before any state is read.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BookingError;
use crate::ports::WebhookRequest;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `x-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader<'a> {
    ts: &'a str,
    v1: &'a str,
}

fn parse_header(header: &str) -> Option<SignatureHeader<'_>> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        let (key, value) = part.split_once('=')?;
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }
    Some(SignatureHeader { ts: ts?, v1: v1? })
}

fn manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{data_id};request-id:{request_id};ts:{ts};")
}

fn forbidden(reason: &str) -> BookingError {
    BookingError::Forbidden(format!("webhook signature rejected: {reason}"))
}

/// Verifies (and, for tests and tooling, produces) webhook signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, BookingError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| BookingError::Internal(format!("hmac key: {e}")))
    }

    /// Checks the request's `x-signature` against its data id and request id.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] if no secret is configured, the
    /// header is missing or malformed, or the digest does not match.
    pub fn verify(&self, request: &WebhookRequest) -> Result<(), BookingError> {
        if self.secret.is_empty() {
            return Err(forbidden("no webhook secret configured"));
        }
        let header = request
            .signature
            .as_deref()
            .ok_or_else(|| forbidden("missing x-signature"))?;
        let parsed = parse_header(header).ok_or_else(|| forbidden("malformed x-signature"))?;
        let expected = hex::decode(parsed.v1).map_err(|_| forbidden("digest is not hex"))?;

        let mut mac = self.mac()?;
        mac.update(
            manifest(
                request.data_id.as_deref().unwrap_or_default(),
                request.request_id.as_deref().unwrap_or_default(),
                parsed.ts,
            )
            .as_bytes(),
        );
        mac.verify_slice(&expected)
            .map_err(|_| forbidden("digest mismatch"))
    }

    /// Produces the `x-signature` header value for a notification.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] if the key cannot be used.
    pub fn sign(&self, data_id: &str, request_id: &str, ts: &str) -> Result<String, BookingError> {
        let mut mac = self.mac()?;
        mac.update(manifest(data_id, request_id, ts).as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        Ok(format!("ts={ts},v1={digest}"))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request(signature: Option<String>) -> WebhookRequest {
        WebhookRequest {
            event_type: Some("payment".to_string()),
            data_id: Some("123456".to_string()),
            signature,
            request_id: Some("req-1".to_string()),
        }
    }

    #[test]
    fn signed_request_verifies() {
        let verifier = WebhookVerifier::new("s3cret");
        let Ok(header) = verifier.sign("123456", "req-1", "1700000000") else {
            panic!("signing failed");
        };
        assert!(verifier.verify(&request(Some(header))).is_ok());
    }

    #[test]
    fn wrong_secret_is_forbidden() {
        let Ok(header) = WebhookVerifier::new("other").sign("123456", "req-1", "1700000000")
        else {
            panic!("signing failed");
        };
        let result = WebhookVerifier::new("s3cret").verify(&request(Some(header)));
        assert!(matches!(result, Err(BookingError::Forbidden(_))));
    }

    #[test]
    fn tampered_data_id_is_forbidden() {
        let verifier = WebhookVerifier::new("s3cret");
        let Ok(header) = verifier.sign("999", "req-1", "1700000000") else {
            panic!("signing failed");
        };
        assert!(verifier.verify(&request(Some(header))).is_err());
    }

    #[test]
    fn missing_or_malformed_header_is_forbidden() {
        let verifier = WebhookVerifier::new("s3cret");
        assert!(matches!(
            verifier.verify(&request(None)),
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            verifier.verify(&request(Some("garbage".to_string()))),
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            verifier.verify(&request(Some("ts=1,v1=zz".to_string()))),
            Err(BookingError::Forbidden(_))
        ));
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let verifier = WebhookVerifier::new("");
        let header = "ts=1,v1=00".to_string();
        assert!(verifier.verify(&request(Some(header))).is_err());
    }

    #[test]
    fn header_parsing_tolerates_spaces() {
        let Some(parsed) = parse_header("ts=17, v1=abcd") else {
            panic!("header should parse");
        };
        assert_eq!(parsed.ts, "17");
        assert_eq!(parsed.v1, "abcd");
    }
}
