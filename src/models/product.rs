use serde::{Deserialize, Serialize};

use super::ItemKind;

/// Catalog mirror used to validate line-item references at fulfillment
/// time. Catalog management itself lives outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProduct {
    pub title: String,
}

/// A purchasable rendition of a product (digital file, print, original).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub kind: ItemKind,
    pub price_cents: i64,
    /// Licensing terms sold with this variant; snapshotted onto order items
    /// at purchase time.
    pub license: Option<String>,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductVariant {
    pub product_id: String,
    pub kind: ItemKind,
    pub price_cents: i64,
    #[serde(default)]
    pub license: Option<String>,
}
