//! Webhook signature verification
//!
//! The provider signs `"<t>.<raw body>"` with HMAC-SHA256 using the endpoint's
//! shared secret and sends `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]`.
//! A request authenticates when any `v1` matches and `t` is within the
//! tolerance window of our clock.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock distance between the signed timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> BillingResult<()> {
        self.verify_at(payload, header, OffsetDateTime::now_utc())
    }

    /// Verify against an explicit clock
    pub fn verify_at(&self, payload: &[u8], header: &str, now: OffsetDateTime) -> BillingResult<()> {
        if self.secret.is_empty() {
            tracing::error!("Webhook secret is not configured");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let Some(timestamp) = timestamp else {
            tracing::warn!("Missing timestamp in signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        };

        if signatures.is_empty() {
            tracing::warn!("Missing v1 signature in signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let drift = (now.unix_timestamp() - timestamp).abs();
        if drift > self.tolerance_secs {
            tracing::warn!(
                timestamp = timestamp,
                drift_secs = drift,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let mac = signed_mac(&self.secret, timestamp, payload)?;
        // verify_slice compares in constant time
        if signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
        {
            Ok(())
        } else {
            tracing::warn!(timestamp = timestamp, "Webhook signature mismatch");
            Err(BillingError::WebhookSignatureInvalid)
        }
    }
}

fn signed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Build a `t=..,v1=..` header for `payload` (used by tests and local tooling)
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<String> {
    let mac = signed_mac(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}
