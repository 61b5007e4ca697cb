use serde::{Deserialize, Serialize};

use axum::extract::State;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::identity::Caller;
use crate::models::{OrderItem, OrderStatus};

#[derive(Debug, Deserialize)]
pub struct CheckoutSuccessQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadLink {
    pub token_id: String,
    pub asset_id: String,
    /// Redemption endpoint for this token.
    pub url: String,
    /// Display URL minted at issuance.
    pub signed_url: String,
    pub expires_at: i64,
    pub remaining_uses: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: String,
    pub placed_at: i64,
    pub items: Vec<OrderItem>,
    pub downloads: Vec<DownloadLink>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSuccessResponse {
    /// None while the session is unknown, not owned by the caller, or not
    /// yet fulfilled: an empty result, not an error, since the webhook
    /// may still be in flight.
    pub order: Option<OrderSummary>,
}

/// GET /checkout/success - order summary with resolved download links.
pub async fn checkout_success(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<CheckoutSuccessQuery>,
) -> Result<Json<CheckoutSuccessResponse>> {
    caller.require()?;
    let (user_id, guest_id) = caller.owner_parts();

    let conn = state.db.get()?;

    let order =
        queries::get_order_by_session_for_owner(&conn, &query.session_id, user_id, guest_id)?;

    let Some(order) = order else {
        return Ok(Json(CheckoutSuccessResponse { order: None }));
    };

    if order.status != OrderStatus::Fulfilled {
        return Ok(Json(CheckoutSuccessResponse { order: None }));
    }

    let items = queries::list_order_items(&conn, &order.id)?;
    let downloads = queries::list_order_downloads(&conn, &order.id)?
        .into_iter()
        .map(|entry| DownloadLink {
            url: format!("{}/downloads/{}", state.base_url, entry.token_id),
            token_id: entry.token_id,
            asset_id: entry.asset_id,
            signed_url: entry.signed_url,
            expires_at: entry.expires_at,
            remaining_uses: entry.remaining_uses,
        })
        .collect();

    Ok(Json(CheckoutSuccessResponse {
        order: Some(OrderSummary {
            order_id: order.id,
            status: order.status,
            total_cents: order.total_cents,
            currency: order.currency,
            placed_at: order.placed_at,
            items,
            downloads,
        }),
    }))
}
