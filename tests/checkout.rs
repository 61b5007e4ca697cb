//! Checkout success read-path tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::json;
use tower::ServiceExt;

async fn get_success(
    app: &axum::Router,
    session_id: &str,
    identity: Option<(&str, &str)>,
) -> axum::http::Response<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(format!("/checkout/success?session_id={}", session_id));
    if let Some((header, value)) = identity {
        builder = builder.header(header, value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_success_requires_identity() {
    let state = test_state();
    let app = app(state);

    let response = get_success(&app, "cs_1", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_session_is_empty_result() {
    let state = test_state();
    let app = app(state);

    let response = get_success(&app, "cs-nonexistent", Some(("x-guest-id", "guest-1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "order": null }));
}

#[tokio::test]
async fn test_unfulfilled_order_is_empty_result() {
    let state = test_state();
    let session_id = {
        let conn = state.db.get().unwrap();
        assert!(queries::try_create_order(
            &conn,
            &CreateOrder {
                session_id: "cs-pending".to_string(),
                buyer: Buyer::Guest("guest-1".to_string()),
                total_cents: 2400,
                currency: "usd".to_string(),
            },
        )
        .unwrap());
        "cs-pending".to_string()
    };

    let app = app(state);
    let response = get_success(&app, &session_id, Some(("x-guest-id", "guest-1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["order"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_other_callers_order_is_empty_result() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state);
    let response = get_success(
        &app,
        &fixture.order.session_id,
        Some(("x-guest-id", "someone-else")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["order"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_fulfilled_order_summary_includes_download_links() {
    let state = test_state();
    let fixture = {
        let conn = state.db.get().unwrap();
        seed_token(&conn, None, Some("guest-1"), future_ts(30), Some(5))
    };

    let app = app(state);
    let response = get_success(
        &app,
        &fixture.order.session_id,
        Some(("x-guest-id", "guest-1")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let order = &body["order"];
    assert_eq!(order["order_id"], fixture.order.id);
    assert_eq!(order["status"], "fulfilled");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);

    let downloads = order["downloads"].as_array().unwrap();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0]["token_id"], fixture.token.id);
    assert_eq!(
        downloads[0]["url"],
        format!("http://localhost:3000/downloads/{}", fixture.token.id)
    );
    assert_eq!(downloads[0]["remaining_uses"], 5);
}
