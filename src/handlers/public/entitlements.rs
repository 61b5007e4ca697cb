use axum::extract::State;

use crate::db::queries::{self, ProductEntitlement};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::identity::Caller;

/// GET /entitlements/{product_id} - what the caller holds for a product.
///
/// Pure read over state materialized by fulfillment and top-ups; never
/// mutates entitlement rows.
pub async fn product_entitlement(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<String>,
) -> Result<Json<ProductEntitlement>> {
    caller.require()?;
    let (user_id, guest_id) = caller.owner_parts();

    let conn = state.db.get()?;
    let entitlement = queries::get_product_entitlement(&conn, user_id, guest_id, &product_id)?;

    Ok(Json(entitlement))
}
