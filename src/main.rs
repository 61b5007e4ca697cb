use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teller::config::Config;
use teller::db::{create_pool, init_db, queries, AppState};
use teller::handlers;
use teller::models::{CreateProduct, CreateProductAsset, CreateProductVariant, ItemKind};
use teller::payments::PaymentClient;
use teller::rate_limit::RateLimiter;
use teller::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "teller")]
#[command(about = "Payment fulfillment and entitlement engine for digital storefronts")]
struct Cli {
    /// Seed the database with dev data (a product with variants and an asset)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for exercising the fulfillment flow.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
        .expect("Failed to count products");
    if existing > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    let product = queries::create_product(
        &conn,
        &CreateProduct {
            title: "Harbor Study No. 4".to_string(),
        },
    )
    .expect("Failed to create dev product");

    let digital = queries::create_product_variant(
        &conn,
        &CreateProductVariant {
            product_id: product.id.clone(),
            kind: ItemKind::Digital,
            price_cents: 2400,
            license: Some("personal-use".to_string()),
        },
    )
    .expect("Failed to create dev digital variant");

    let print = queries::create_product_variant(
        &conn,
        &CreateProductVariant {
            product_id: product.id.clone(),
            kind: ItemKind::Print,
            price_cents: 6500,
            license: None,
        },
    )
    .expect("Failed to create dev print variant");

    let asset = queries::create_product_asset(
        &conn,
        &CreateProductAsset {
            product_id: product.id.clone(),
            storage_key: format!("art/{}/full", product.id),
            url: format!("{}/assets/art/{}/full.png", state.base_url, product.id),
            resource_type: "image".to_string(),
            ext: "png".to_string(),
            width: Some(4800),
            height: Some(3200),
            bytes: Some(18_874_368),
            checksum: None,
        },
    )
    .expect("Failed to create dev asset");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED");
    tracing::info!("============================================");

    // Copy-paste friendly output for wiring up a dev storefront
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  product_id: {}", product.id);
    println!("  digital_variant_id: {}", digital.id);
    println!("  print_variant_id: {}", print.id);
    println!("  asset_id: {}", asset.id);
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that periodically clears expired claim tokens
/// and drops ledger rows past the provider's retry horizon.
fn spawn_cleanup_task(state: AppState) {
    // Providers retry for at most a few days; keep a wide margin
    const PROCESSED_EVENT_RETENTION_DAYS: i64 = 30;

    tokio::spawn(async move {
        let interval = Duration::from_secs(10 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => {
                    match queries::purge_expired_claim_tokens(&conn) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Cleared {} expired claim tokens", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Failed to clear expired claim tokens: {}", e);
                        }
                    }
                    match queries::purge_old_processed_events(&conn, PROCESSED_EVENT_RETENTION_DAYS)
                    {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Purged {} old processed events", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Failed to purge processed events: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }
        }
    });

    tracing::info!("Background cleanup task started (runs every 10 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    if config.webhook_secret.is_empty() {
        tracing::warn!("WEBHOOK_SECRET is not set; all webhook deliveries will be rejected");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        payments: PaymentClient::new(config.webhook_secret.clone()),
        storage: Storage::new(
            config.asset_cdn_base.clone(),
            config.download_url_secret.clone(),
            config.archive_endpoint.clone(),
        ),
        download_policy: config.download_policy,
        claim_token_ttl_hours: config.claim_token_ttl_hours,
        claim_limiter: Arc::new(RateLimiter::per_minute(config.claim_rate_limit_rpm)),
        base_url: config.base_url.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set TELLER_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_cleanup_task(state.clone());

    let app = Router::new()
        .merge(handlers::public::router())
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Teller server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
