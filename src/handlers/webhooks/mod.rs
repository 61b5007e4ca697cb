pub mod classifier;
pub mod fulfillment;
pub mod payment;
pub mod quota;

pub use classifier::{classify, ClassifiedEvent, QuotaTopupOrder};
pub use fulfillment::{process_order_fulfillment, FulfillmentOutcome};
pub use payment::handle_payment_webhook;
pub use quota::{process_quota_topup, TopupOutcome};

use axum::http::StatusCode;
use axum::{routing::post, Router};

use crate::db::AppState;

/// Status + operator-facing detail for a webhook processing step. The
/// detail goes to logs and the provider dashboard, never to end users.
pub type WebhookResult = (StatusCode, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payment-provider", post(handle_payment_webhook))
}
