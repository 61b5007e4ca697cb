mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::DownloadPolicy;
use crate::payments::PaymentClient;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Webhook signature verification for the payment provider.
    pub payments: PaymentClient,
    /// Signed URL + archive building against the asset storage backend.
    pub storage: Storage,
    pub download_policy: DownloadPolicy,
    /// Hours a claim token stays redeemable after prepare-claim.
    pub claim_token_ttl_hours: i64,
    pub claim_limiter: Arc<RateLimiter>,
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
