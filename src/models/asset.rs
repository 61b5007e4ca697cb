use serde::{Deserialize, Serialize};

/// The deliverable file behind a digital product. Immutable once created
/// and shared across every order that sold the product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAsset {
    pub id: String,
    pub product_id: String,
    /// Key within the storage backend; signed URLs are derived from it.
    pub storage_key: String,
    pub url: String,
    pub resource_type: String,
    pub ext: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub bytes: Option<i64>,
    pub checksum: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductAsset {
    pub product_id: String,
    pub storage_key: String,
    pub url: String,
    pub resource_type: String,
    pub ext: String,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub bytes: Option<i64>,
    #[serde(default)]
    pub checksum: Option<String>,
}
