mod checkout;
mod claim;
mod downloads;
mod entitlements;

pub use checkout::*;
pub use claim::*;
pub use downloads::*;
pub use entitlements::*;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/checkout/success", get(checkout_success))
        .route("/orders/prepare-claim", post(prepare_claim))
        .route("/orders/claim", post(claim))
        .route("/orders/{order_ref}/archive", get(order_archive))
        .route("/downloads/{token_id}", get(redeem_download))
        .route("/entitlements/{product_id}", get(product_entitlement))
}
