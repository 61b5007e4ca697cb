//! Test utilities and fixtures for Teller integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{json, Value};
use tower::ServiceExt;

pub use teller::config::DownloadPolicy;
pub use teller::db::{init_db, queries, AppState};
pub use teller::handlers;
pub use teller::models::*;
pub use teller::payments::{CheckoutSession, PaymentClient, PaymentWebhookEvent};
pub use teller::rate_limit::RateLimiter;
pub use teller::storage::Storage;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// App state backed by a single-connection in-memory pool, so every
/// handler sees the same database.
pub fn test_state() -> AppState {
    test_state_with(None)
}

/// Variant with a remote archive endpoint configured.
pub fn test_state_with(archive_endpoint: Option<String>) -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        payments: PaymentClient::new(TEST_WEBHOOK_SECRET),
        storage: Storage::new("https://cdn.test", "test-url-secret", archive_endpoint),
        download_policy: DownloadPolicy {
            token_ttl_days: 30,
            max_uses: Some(5),
        },
        claim_token_ttl_hours: 24,
        claim_limiter: Arc::new(RateLimiter::per_minute(1000)),
        base_url: "http://localhost:3000".to_string(),
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::public::router())
        .merge(handlers::webhooks::router())
        .with_state(state)
}

pub fn test_storage() -> Storage {
    Storage::new("https://cdn.test", "test-url-secret", None)
}

pub fn test_policy() -> DownloadPolicy {
    DownloadPolicy {
        token_ttl_days: 30,
        max_uses: Some(5),
    }
}

/// Extract the embedded checkout session from an event payload.
pub fn session_from(event: &Value) -> CheckoutSession {
    serde_json::from_value(event["data"]["object"].clone()).expect("session should parse")
}

// ============ Catalog fixtures ============

pub fn seed_product(conn: &Connection, title: &str) -> Product {
    queries::create_product(
        conn,
        &CreateProduct {
            title: title.to_string(),
        },
    )
    .expect("Failed to create test product")
}

pub fn seed_variant(conn: &Connection, product_id: &str, kind: ItemKind) -> ProductVariant {
    queries::create_product_variant(
        conn,
        &CreateProductVariant {
            product_id: product_id.to_string(),
            kind,
            price_cents: 2400,
            license: Some("personal-use".to_string()),
        },
    )
    .expect("Failed to create test variant")
}

pub fn seed_asset(conn: &Connection, product_id: &str, storage_key: &str) -> ProductAsset {
    queries::create_product_asset(
        conn,
        &CreateProductAsset {
            product_id: product_id.to_string(),
            storage_key: storage_key.to_string(),
            url: format!("https://cdn.test/{}", storage_key),
            resource_type: "image".to_string(),
            ext: "png".to_string(),
            width: Some(4800),
            height: Some(3200),
            bytes: Some(1024),
            checksum: None,
        },
    )
    .expect("Failed to create test asset")
}

/// A fulfilled order with one digital item and an issued download token.
pub struct TokenFixture {
    pub order: Order,
    pub item: OrderItem,
    pub asset: ProductAsset,
    pub token: DownloadToken,
}

/// Seed the full chain behind a download token: product, variant, asset,
/// fulfilled order, item, token.
pub fn seed_token(
    conn: &Connection,
    user_id: Option<&str>,
    guest_id: Option<&str>,
    expires_at: i64,
    remaining_uses: Option<i64>,
) -> TokenFixture {
    let product = seed_product(conn, "Fixture product");
    let variant = seed_variant(conn, &product.id, ItemKind::Digital);
    let asset = seed_asset(conn, &product.id, &format!("art/{}/full", product.id));

    let buyer = Buyer::from_parts(user_id.map(String::from), guest_id.map(String::from))
        .expect("fixture needs an owner");
    let session_id = format!("cs-{}", product.id);
    assert!(queries::try_create_order(
        conn,
        &CreateOrder {
            session_id: session_id.clone(),
            buyer,
            total_cents: 2400,
            currency: "usd".to_string(),
        },
    )
    .unwrap());
    let order = queries::get_order_by_session(conn, &session_id).unwrap().unwrap();
    queries::advance_order_status(conn, &order.id, OrderStatus::Pending, OrderStatus::Paid)
        .unwrap();
    queries::advance_order_status(conn, &order.id, OrderStatus::Paid, OrderStatus::Fulfilled)
        .unwrap();

    let item = queries::create_order_item(
        conn,
        &CreateOrderItem {
            order_id: order.id.clone(),
            product_id: product.id.clone(),
            variant_id: Some(variant.id.clone()),
            kind: ItemKind::Digital,
            quantity: 1,
            price_cents: 2400,
            license: variant.license.clone(),
            needs_review: false,
        },
    )
    .unwrap();

    assert!(queries::issue_download_token(
        conn,
        &CreateDownloadToken {
            order_item_id: item.id.clone(),
            asset_id: asset.id.clone(),
            user_id: user_id.map(String::from),
            guest_id: guest_id.map(String::from),
            license: item.license.clone(),
            signed_url: format!("https://cdn.test/{}?signed", asset.storage_key),
            expires_at,
            remaining_uses,
        },
    )
    .unwrap());
    let token = queries::list_download_tokens_for_order(conn, &order.id)
        .unwrap()
        .pop()
        .unwrap();

    let order = queries::get_order_by_id(conn, &order.id).unwrap().unwrap();
    TokenFixture {
        order,
        item,
        asset,
        token,
    }
}

// ============ Webhook payload builders ============

pub fn line_item(product_id: &str, variant_id: &str, quantity: i64, amount_cents: i64) -> Value {
    json!({
        "product_id": product_id,
        "variant_id": variant_id,
        "quantity": quantity,
        "amount_cents": amount_cents,
        "metadata": {}
    })
}

pub fn checkout_event(event_id: &str, session_id: &str, metadata: Value, line_items: Value) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": 2400,
                "currency": "usd",
                "metadata": metadata,
                "line_items": line_items
            }
        }
    })
}

pub fn topup_event(
    event_id: &str,
    session_id: &str,
    owner: Value,
    product_id: &str,
    quota: &str,
    per_unit: &str,
    quantity: i64,
) -> Value {
    let mut metadata = json!({
        "kind": "quota_topup",
        "quota": quota,
        "product_id": product_id
    });
    for (k, v) in owner.as_object().unwrap() {
        metadata[k] = v.clone();
    }
    let multiplier_key = match quota {
        "export" => "exports_per_unit",
        _ => "edits_per_unit",
    };
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": 999,
                "currency": "usd",
                "metadata": metadata,
                "line_items": [{
                    "product_id": product_id,
                    "variant_id": null,
                    "quantity": quantity,
                    "amount_cents": 999,
                    "metadata": { multiplier_key: per_unit }
                }]
            }
        }
    })
}

/// Signature header over the exact body bytes, matching the verifier's
/// `t=<unix>,v1=<hex>` scheme.
pub fn sign_body(body: &[u8]) -> String {
    sign_body_with(body, TEST_WEBHOOK_SECRET, chrono::Utc::now().timestamp())
}

pub fn sign_body_with(body: &[u8], secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(body));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Deliver a signed webhook event through the router.
pub async fn deliver_webhook(app: &Router, event: &Value) -> Response<Body> {
    let body = serde_json::to_vec(event).unwrap();
    let signature = sign_body(&body);

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payment-provider")
                .header("content-type", "application/json")
                .header("x-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn assert_received(response: Response<Body>) {
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "received": true }));
}

// ============ Time helpers ============

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn future_ts(days: i64) -> i64 {
    now_ts() + days * 86400
}

pub fn past_ts(days: i64) -> i64 {
    now_ts() - days * 86400
}
