use serde::{Deserialize, Serialize};

/// A scoped, expiring, use-limited credential granting redemption access to
/// one digital asset. Created only during fulfillment of the owning order;
/// counters are mutated only by the redemption path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    pub id: String,
    pub order_item_id: String,
    pub asset_id: String,
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    /// Licensing snapshot inherited from the order item at issuance.
    pub license: Option<String>,
    /// Long-lived signed URL minted at issuance for display surfaces.
    /// Redemption re-signs a short-lived URL instead of reusing this one.
    pub signed_url: String,
    pub expires_at: i64,
    /// Redemptions left. None = unlimited.
    pub remaining_uses: Option<i64>,
    pub download_count: i64,
    pub last_downloaded_at: Option<i64>,
    pub created_at: i64,
}

impl DownloadToken {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining_uses, Some(n) if n <= 0)
    }
}

#[derive(Debug, Clone)]
pub struct CreateDownloadToken {
    pub order_item_id: String,
    pub asset_id: String,
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    pub license: Option<String>,
    pub signed_url: String,
    pub expires_at: i64,
    pub remaining_uses: Option<i64>,
}
