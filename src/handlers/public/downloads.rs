use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Path;
use crate::identity::Caller;
use crate::storage::ArchiveEntry;

/// 302 redirect to a resolved asset URL.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// GET /downloads/{token_id} - redeem a download token.
///
/// The budget check and decrement are one atomic UPDATE; only after the
/// redemption is granted does the handler resolve a fresh short-lived URL
/// for the asset. Failure reasons are end-user-facing by design: expired
/// and exhausted are distinct, unlike claim failures.
pub async fn redeem_download(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> Result<Response> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();

    if !queries::redeem_download_token(&conn, &token_id, now)? {
        let token = queries::get_download_token(&conn, &token_id)?
            .ok_or_else(|| AppError::NotFound("Download not found".into()))?;
        return Err(if token.is_expired(now) {
            AppError::Gone("Download link expired")
        } else {
            AppError::Gone("Download limit reached")
        });
    }

    let token = queries::get_download_token(&conn, &token_id)?
        .ok_or_else(|| AppError::Internal("Token vanished after redemption".into()))?;
    let asset = queries::get_asset_by_id(&conn, &token.asset_id)?
        .ok_or_else(|| AppError::Internal("Asset missing for download token".into()))?;

    Ok(found(&state.storage.redemption_url(&asset.storage_key, now)))
}

/// GET /orders/{order_ref}/archive - bundle an order's still-valid assets.
///
/// Accepts an order id or a payment session id. Prefers the storage
/// backend's bulk archive URL; without one, fetches each asset and builds
/// the zip locally. Reads token state only; archives never touch
/// redemption counters.
pub async fn order_archive(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_ref): Path<String>,
) -> Result<Response> {
    caller.require()?;
    let (user_id, guest_id) = caller.owner_parts();

    let now = Utc::now().timestamp();
    let (order, downloads) = {
        let conn = state.db.get()?;
        let order = queries::get_order_for_owner(&conn, &order_ref, user_id, guest_id)?
            .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
        let downloads = queries::list_valid_order_downloads(&conn, &order.id, now)?;
        (order, downloads)
    };

    if downloads.is_empty() {
        return Err(AppError::Gone("No downloadable assets remain"));
    }

    // The same asset can back several line items; one archive entry each
    let mut seen = std::collections::HashSet::new();
    let downloads: Vec<_> = downloads
        .into_iter()
        .filter(|d| seen.insert(d.asset_id.clone()))
        .collect();

    let keys: Vec<String> = downloads.iter().map(|d| d.storage_key.clone()).collect();
    if let Some(url) = state.storage.remote_archive_url(&keys, now) {
        return Ok(found(&url));
    }

    let entries: Vec<ArchiveEntry> = downloads
        .iter()
        .map(|d| ArchiveEntry {
            file_name: d.file_name(),
            url: state.storage.redemption_url(&d.storage_key, now),
        })
        .collect();

    let bytes = state.storage.build_archive(&entries).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"order-{}.zip\"", order.id),
            ),
        ],
        bytes,
    )
        .into_response())
}
