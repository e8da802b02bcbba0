//! Webhook signature handling
//!
//! The platform signs each delivery with HMAC-SHA256 over the raw body and
//! sends it as `sha256=<hex>`.

use crate::{Result, WebhookError};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies delivery signatures against the app secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| WebhookError::InvalidSignature(e.to_string()))
    }

    /// Signature header value for a payload
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(format!(
            "{}{}",
            SIGNATURE_PREFIX,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Verify a signature header against the raw body
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<()> {
        let header = header.ok_or_else(|| {
            WebhookError::InvalidSignature("Missing signature header".to_string())
        })?;
        let hex_digest = header.trim().strip_prefix(SIGNATURE_PREFIX).ok_or_else(|| {
            WebhookError::InvalidSignature("Unsupported signature format".to_string())
        })?;
        let expected = hex::decode(hex_digest).map_err(|_| {
            WebhookError::InvalidSignature("Signature is not valid hex".to_string())
        })?;

        let mut mac = self.mac()?;
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature("Signature mismatch".to_string()))
    }
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
