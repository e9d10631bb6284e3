//! Carrier webhook signature verification (HMAC-SHA256, hex)

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC of the raw body
pub const SIGNATURE_HEADER: &str = "x-ringdesk-signature";
/// Header carrying the unix timestamp the carrier signed at
pub const TIMESTAMP_HEADER: &str = "x-ringdesk-timestamp";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs,
        }
    }

    /// Verify signature and timestamp freshness over the exact raw body
    pub fn verify(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        now_unix: i64,
    ) -> Result<()> {
        let timestamp = timestamp
            .ok_or_else(|| CallError::SignatureInvalid("missing timestamp".to_string()))?
            .trim()
            .parse::<i64>()
            .map_err(|_| CallError::SignatureInvalid("unparseable timestamp".to_string()))?;
        if now_unix.abs_diff(timestamp) > self.tolerance_secs {
            return Err(CallError::SignatureInvalid("stale timestamp".to_string()));
        }

        let signature = signature
            .ok_or_else(|| CallError::SignatureInvalid("missing signature".to_string()))?
            .trim();
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(signature)
            .map_err(|_| CallError::SignatureInvalid("signature is not hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CallError::Internal(format!("hmac key: {}", e)))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| CallError::SignatureInvalid("signature mismatch".to_string()))
    }

    /// Hex signature of a body; used by carriers-in-tests and tooling
    pub fn sign(&self, body: &[u8]) -> String {
        match HmacSha256::new_from_slice(&self.secret) {
            Ok(mut mac) => {
                mac.update(body);
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }
}
