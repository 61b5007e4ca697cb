//! Guest-to-user claim tests: single-use redemption, uniform failures,
//! token re-scoping.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::json;
use tower::ServiceExt;

async fn post_json(
    app: &axum::Router,
    uri: &str,
    identity: Option<(&str, &str)>,
    body: serde_json::Value,
) -> axum::http::Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((header, value)) = identity {
        builder = builder.header(header, value);
    }
    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn prepare(
    app: &axum::Router,
    identity: (&str, &str),
    session_id: &str,
) -> axum::http::Response<Body> {
    post_json(
        app,
        "/orders/prepare-claim",
        Some(identity),
        json!({ "session_id": session_id }),
    )
    .await
}

async fn claim(
    app: &axum::Router,
    identity: Option<(&str, &str)>,
    token: &str,
) -> axum::http::Response<Body> {
    post_json(
        app,
        "/orders/claim",
        identity,
        json!({ "claim_token": token }),
    )
    .await
}

#[tokio::test]
async fn test_prepare_claim_returns_raw_token_once() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state.clone());
    let response = prepare(&app, ("x-guest-id", "guest-1"), &fixture.order.session_id).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let raw_token = body["claim_token"].as_str().unwrap().to_string();
    assert!(body["expires_at"].as_i64().unwrap() > now_ts());

    // Only the hash is persisted
    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, &fixture.order.id)
        .unwrap()
        .unwrap();
    let stored_hash = order.claim_token_hash.unwrap();
    assert_ne!(stored_hash, raw_token);
    assert_eq!(stored_hash, teller::crypto::hash_secret(&raw_token));
}

#[tokio::test]
async fn test_prepare_claim_on_claimed_order_is_idempotent() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, Some("user-1"), None, future_ts(30), Some(5))
    };

    let app = app(state);
    let response = prepare(&app, ("x-user-id", "user-2"), &fixture.order.session_id).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body, json!({ "already_claimed": true }));
}

#[tokio::test]
async fn test_prepare_claim_unknown_session_is_404() {
    let state = test_state();
    let app = app(state);

    let response = prepare(&app, ("x-guest-id", "guest-1"), "cs-nonexistent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_claim_reassigns_order_and_rescopes_tokens() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state.clone());
    let prepared = prepare(&app, ("x-guest-id", "guest-1"), &fixture.order.session_id).await;
    let raw_token = body_json(prepared).await["claim_token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = claim(&app, Some(("x-user-id", "user-7")), &raw_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["order_id"], fixture.order.id);

    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, &fixture.order.id)
        .unwrap()
        .unwrap();
    assert_eq!(order.user_id.as_deref(), Some("user-7"));
    assert!(order.guest_id.is_none(), "guestId nulled after claim");
    assert!(order.claim_token_hash.is_none());
    assert!(order.claim_token_expires_at.is_none());

    let tokens = queries::list_download_tokens_for_order(&conn, &order.id).unwrap();
    assert_eq!(tokens[0].user_id.as_deref(), Some("user-7"));
    assert!(tokens[0].guest_id.is_none(), "tokens re-scoped to the user");
}

#[tokio::test]
async fn test_claim_token_is_single_use() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state);
    let prepared = prepare(&app, ("x-guest-id", "guest-1"), &fixture.order.session_id).await;
    let raw_token = body_json(prepared).await["claim_token"]
        .as_str()
        .unwrap()
        .to_string();

    let first = claim(&app, Some(("x-user-id", "user-7")), &raw_token).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = claim(&app, Some(("x-user-id", "user-8")), &raw_token).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    let body = body_json(second).await;
    assert_eq!(body["error"], "Invalid or expired claim token");
}

#[tokio::test]
async fn test_expired_claim_token_rejected_uniformly() {
    let state = test_state();
    let (fixture, raw_token) = {
        let conn = state.db.get().unwrap();
        let fixture = seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5));
        let raw_token = teller::crypto::generate_claim_token();
        queries::set_claim_token(
            &conn,
            &fixture.order.id,
            &teller::crypto::hash_secret(&raw_token),
            past_ts(1),
        )
        .unwrap();
        (fixture, raw_token)
    };

    let app = app(state.clone());
    let response = claim(&app, Some(("x-user-id", "user-7")), &raw_token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid or expired claim token");

    // Order unchanged
    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, &fixture.order.id)
        .unwrap()
        .unwrap();
    assert!(order.user_id.is_none());
}

#[tokio::test]
async fn test_wrong_token_rejected_uniformly() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5));
    }

    let app = app(state);
    let response = claim(&app, Some(("x-user-id", "user-7")), "not-a-real-token").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid or expired claim token");
}

#[tokio::test]
async fn test_claim_requires_user_identity() {
    let state = test_state();
    let app = app(state);

    // Guest identity is not enough to claim
    let response = claim(&app, Some(("x-guest-id", "guest-1")), "whatever").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = claim(&app, None, "whatever").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_prepare_claim_is_rate_limited() {
    let mut state = test_state();
    state.claim_limiter = std::sync::Arc::new(RateLimiter::per_minute(2));
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state);
    for _ in 0..2 {
        let response = prepare(&app, ("x-guest-id", "guest-1"), &fixture.order.session_id).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = prepare(&app, ("x-guest-id", "guest-1"), &fixture.order.session_id).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
