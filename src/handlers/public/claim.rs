//! Guest-to-user order claims.
//!
//! prepare-claim hands out a single-use secret exactly once; only its
//! salted hash is stored. claim redeems it atomically and re-scopes the
//! order's download tokens. All claim failures look identical to the
//! caller so the endpoint cannot be used to enumerate orders.

use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::identity::Caller;

#[derive(Debug, Deserialize)]
pub struct PrepareClaimRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PrepareClaimResponse {
    Token {
        claim_token: String,
        expires_at: i64,
    },
    AlreadyClaimed {
        already_claimed: bool,
    },
}

/// POST /orders/prepare-claim - mint a claim token for a guest order.
///
/// Idempotent on already-claimed orders: no new token is generated once a
/// user owns the order.
pub async fn prepare_claim(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<PrepareClaimRequest>,
) -> Result<Json<PrepareClaimResponse>> {
    let identity = caller.require()?;

    if !state.claim_limiter.check(identity) {
        return Err(AppError::RateLimited);
    }

    let conn = state.db.get()?;

    let order = queries::get_order_by_session(&conn, &body.session_id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    if order.user_id.is_some() {
        return Ok(Json(PrepareClaimResponse::AlreadyClaimed {
            already_claimed: true,
        }));
    }

    // The raw secret leaves this handler exactly once; only the hash is kept
    let raw_token = crypto::generate_claim_token();
    let token_hash = crypto::hash_secret(&raw_token);
    let expires_at = Utc::now().timestamp() + state.claim_token_ttl_hours * 3600;

    queries::set_claim_token(&conn, &order.id, &token_hash, expires_at)?;

    tracing::info!("Claim token prepared for order {}", order.id);

    Ok(Json(PrepareClaimResponse::Token {
        claim_token: raw_token,
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub claim_token: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub ok: bool,
    pub order_id: String,
}

/// POST /orders/claim - redeem a claim token for the authenticated user.
pub async fn claim(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>> {
    let user_id = caller.require_user()?.to_string();

    let token_hash = crypto::hash_secret(body.claim_token.trim());
    let now = Utc::now().timestamp();

    let mut conn = state.db.get()?;

    // Wrong hash, expired token and already-claimed order are
    // indistinguishable here on purpose
    let order = queries::claim_order(&mut conn, &user_id, &token_hash, now)?
        .ok_or(AppError::InvalidOrExpiredToken)?;

    tracing::info!("Order {} claimed by user {}", order.id, user_id);

    Ok(Json(ClaimResponse {
        ok: true,
        order_id: order.id,
    }))
}
