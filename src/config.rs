use std::env;

/// Issuance policy for download tokens, captured once at startup.
#[derive(Debug, Clone, Copy)]
pub struct DownloadPolicy {
    /// Days a freshly issued token stays redeemable.
    pub token_ttl_days: i64,
    /// Redemption budget per token. None = unlimited.
    pub max_uses: Option<i64>,
}

impl DownloadPolicy {
    pub fn token_expires_at(&self, base_time: i64) -> i64 {
        base_time + self.token_ttl_days * 86400
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Shared secret for verifying payment provider webhook signatures.
    pub webhook_secret: String,
    /// Secret for signing download URLs.
    pub download_url_secret: String,
    /// Base URL of the asset CDN that signed URLs point at.
    pub asset_cdn_base: String,
    /// Optional bulk archive endpoint of the storage backend. When unset,
    /// archives are built locally.
    pub archive_endpoint: Option<String>,
    pub download_policy: DownloadPolicy,
    /// Hours a claim token stays redeemable after prepare-claim.
    pub claim_token_ttl_hours: i64,
    /// Prepare-claim requests allowed per caller per minute.
    pub claim_rate_limit_rpm: u32,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TELLER_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        // 0 configures unlimited redemptions per token
        let max_uses = env::var("DOWNLOAD_TOKEN_MAX_USES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(5);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "teller.db".to_string()),
            base_url,
            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            download_url_secret: env::var("DOWNLOAD_URL_SECRET").unwrap_or_default(),
            asset_cdn_base: env::var("ASSET_CDN_BASE")
                .unwrap_or_else(|_| "http://localhost:3000/assets".to_string()),
            archive_endpoint: env::var("ARCHIVE_ENDPOINT").ok(),
            download_policy: DownloadPolicy {
                token_ttl_days: env::var("DOWNLOAD_TOKEN_TTL_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
                max_uses: if max_uses > 0 { Some(max_uses) } else { None },
            },
            claim_token_ttl_hours: env::var("CLAIM_TOKEN_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            claim_rate_limit_rpm: env::var("RATE_LIMIT_CLAIM_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
