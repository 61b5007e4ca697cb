//! Inbound notification endpoint for the payment provider.
//!
//! Acknowledgement is the provider's signal to stop retrying, so the
//! handler only answers 200 once verification and processing are durably
//! complete (or the event is a benign duplicate / ignorable kind).

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::{queries, AppState};

use super::classifier::{classify, ClassifiedEvent};
use super::fulfillment::{process_order_fulfillment, FulfillmentOutcome};
use super::quota::{process_quota_topup, TopupOutcome};
use super::WebhookResult;

/// Axum handler for `POST /webhooks/payment-provider`.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (status, detail) = process_webhook(&state, &headers, &body).await;
    if status == StatusCode::OK {
        (status, Json(json!({ "received": true }))).into_response()
    } else {
        (status, Json(json!({ "error": detail }))).into_response()
    }
}

async fn process_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> WebhookResult {
    // Verification runs over the raw body bytes before anything else;
    // nothing unverified reaches the classifier.
    let Some(signature) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Missing signature header");
    };

    match state.payments.verify_webhook_signature(body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) => {
            tracing::debug!("Malformed webhook signature header: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid signature");
        }
    }

    let event: crate::payments::PaymentWebhookEvent = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Fast path for redeliveries whose side effects are already committed
    match queries::event_already_processed(&conn, &event.id) {
        Ok(true) => return (StatusCode::OK, "Already processed"),
        Ok(false) => {}
        Err(e) => {
            tracing::error!("Ledger lookup failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    let classified = match classify(&event) {
        Ok(c) => c,
        Err(result) => return result,
    };

    match classified {
        ClassifiedEvent::Ignorable(reason) => {
            tracing::debug!("Ignoring webhook event {}: {}", event.id, reason);
            (StatusCode::OK, reason)
        }
        ClassifiedEvent::QuotaTopup(topup) => {
            match process_quota_topup(&mut conn, &event.id, &topup) {
                Ok(TopupOutcome::Applied { .. }) => (StatusCode::OK, "OK"),
                Ok(TopupOutcome::AlreadyApplied) => (StatusCode::OK, "Already processed"),
                Ok(TopupOutcome::Noop) => (StatusCode::OK, "No credits to apply"),
                Err(e) => {
                    tracing::error!("Quota top-up failed for event {}: {}", event.id, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Processing failure")
                }
            }
        }
        ClassifiedEvent::OrderFulfillment(session) => {
            match process_order_fulfillment(
                &mut conn,
                &state.storage,
                &state.download_policy,
                &event.id,
                &session,
            ) {
                Ok(FulfillmentOutcome::Fulfilled { .. }) => (StatusCode::OK, "OK"),
                Ok(FulfillmentOutcome::AlreadyFulfilled { .. }) => {
                    (StatusCode::OK, "Already processed")
                }
                Ok(FulfillmentOutcome::Skipped { reason }) => (StatusCode::OK, reason),
                Err(e) => {
                    tracing::error!("Fulfillment failed for event {}: {}", event.id, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Processing failure")
                }
            }
        }
    }
}
