use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verifies that inbound notifications genuinely originated from the
/// payment provider. Verification always runs over the exact request
/// bytes: re-encoding the body would change the signed digest.
#[derive(Debug, Clone)]
pub struct PaymentClient {
    webhook_secret: String,
}

impl PaymentClient {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify a webhook signature header of the form `t=<unix>,v1=<hex>`
    /// where `v1` is HMAC-SHA256 over `"<t>.<payload>"`.
    ///
    /// Fails closed: a missing secret, malformed header, stale timestamp or
    /// digest mismatch all reject the notification.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        if self.webhook_secret.is_empty() {
            tracing::warn!("Webhook rejected: no webhook secret configured");
            return Ok(false);
        }

        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;

        // Reject stale timestamps to limit replay of captured deliveries
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid timestamp in signature".into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance: 60 seconds into the future
        if age < -60 {
            tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        // Length check is not constant-time, but signature length is not
        // secret (always 64 hex chars for SHA-256)
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

/// Generic provider webhook event - object is parsed based on event type.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookEvent {
    /// Provider-assigned, globally unique event id. Keys the idempotency
    /// ledger.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: SessionMetadata,
    #[serde(default)]
    pub line_items: Vec<SessionLineItem>,
}

/// Metadata the storefront stamps onto the session when it starts
/// checkout. `kind = "quota_topup"` plus a `quota` sub-type marks a credit
/// purchase; everything else is an ordinary order.
#[derive(Debug, Default, Deserialize)]
pub struct SessionMetadata {
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    pub kind: Option<String>,
    pub quota: Option<String>,
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionLineItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub amount_cents: i64,
    #[serde(default)]
    pub metadata: LineItemMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemMetadata {
    /// Variant kind hint recorded at checkout time; used when the variant
    /// itself can no longer be resolved.
    pub kind: Option<String>,
    /// Credits granted per unit for quota top-up lines (decimal strings,
    /// the provider's metadata values are always strings).
    pub exports_per_unit: Option<String>,
    pub edits_per_unit: Option<String>,
}
