use serde::{Deserialize, Serialize};

/// Which quota counter a top-up purchase credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Export,
    Edit,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Edit => "edit",
        }
    }
}

impl std::str::FromStr for QuotaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "export" => Ok(Self::Export),
            "edit" => Ok(Self::Edit),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-identity, per-product counters of purchased feature credits.
/// Created on the first top-up; every later top-up increments, never
/// overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaGrant {
    pub id: String,
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    pub product_id: String,
    pub export_quota: i64,
    pub exports_used: i64,
    pub edit_quota: i64,
    pub edits_used: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QuotaGrant {
    /// Credits remaining, floored at zero.
    pub fn exports_left(&self) -> i64 {
        (self.export_quota - self.exports_used).max(0)
    }

    pub fn edits_left(&self) -> i64 {
        (self.edit_quota - self.edits_used).max(0)
    }
}
