//! Buckets a verified provider event into exactly one processing path.
//!
//! Quota top-ups and ordinary orders arrive as the same completion event
//! shape and differ only in session metadata, so the metadata bag is
//! decoded here once into a closed variant set. The checks are tag
//! equality tests, not heuristics: downstream code never re-inspects
//! metadata strings.

use axum::http::StatusCode;

use crate::models::{Buyer, QuotaKind};
use crate::payments::{CheckoutSession, PaymentWebhookEvent, SessionLineItem};

use super::WebhookResult;

/// A completed session tagged as a credit purchase.
#[derive(Debug)]
pub struct QuotaTopupOrder {
    pub session_id: String,
    pub buyer: Buyer,
    pub product_id: String,
    pub kind: QuotaKind,
    pub line_items: Vec<SessionLineItem>,
}

/// Every verified event lands in exactly one bucket.
#[derive(Debug)]
pub enum ClassifiedEvent {
    QuotaTopup(QuotaTopupOrder),
    OrderFulfillment(CheckoutSession),
    Ignorable(&'static str),
}

pub fn classify(event: &PaymentWebhookEvent) -> Result<ClassifiedEvent, WebhookResult> {
    if event.event_type != "checkout.session.completed" {
        return Ok(ClassifiedEvent::Ignorable("Event kind not handled"));
    }

    let session: CheckoutSession =
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    if session.payment_status != "paid" {
        return Ok(ClassifiedEvent::Ignorable("Session not paid"));
    }

    if session.metadata.kind.as_deref() != Some("quota_topup") {
        return Ok(ClassifiedEvent::OrderFulfillment(session));
    }

    // Tagged as a top-up: a malformed tag must never fall through to order
    // fulfillment, and redelivery cannot repair it, so acknowledge and drop.
    let Some(kind) = session
        .metadata
        .quota
        .as_deref()
        .and_then(|q| q.parse::<QuotaKind>().ok())
    else {
        tracing::warn!(
            "Top-up session {} has unknown quota sub-type {:?}",
            session.id,
            session.metadata.quota
        );
        return Ok(ClassifiedEvent::Ignorable("Unknown quota sub-type"));
    };

    let Some(buyer) = Buyer::from_parts(
        session.metadata.user_id.clone(),
        session.metadata.guest_id.clone(),
    ) else {
        tracing::warn!("Top-up session {} has no buyer identity", session.id);
        return Ok(ClassifiedEvent::Ignorable("Top-up without buyer identity"));
    };

    let Some(product_id) = session.metadata.product_id.clone() else {
        tracing::warn!("Top-up session {} has no product id", session.id);
        return Ok(ClassifiedEvent::Ignorable("Top-up without product id"));
    };

    Ok(ClassifiedEvent::QuotaTopup(QuotaTopupOrder {
        session_id: session.id,
        buyer,
        product_id,
        kind,
        line_items: session.line_items,
    }))
}
