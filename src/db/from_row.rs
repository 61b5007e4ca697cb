//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PRODUCT_COLS: &str = "id, title, active, created_at";

pub const VARIANT_COLS: &str = "id, product_id, kind, price_cents, license, active, created_at";

pub const ASSET_COLS: &str =
    "id, product_id, storage_key, url, resource_type, ext, width, height, bytes, checksum, created_at";

pub const ORDER_COLS: &str = "id, session_id, user_id, guest_id, status, total_cents, currency, placed_at, claim_token_hash, claim_token_expires_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, product_id, variant_id, kind, quantity, price_cents, license, needs_review, created_at";

pub const DOWNLOAD_TOKEN_COLS: &str = "id, order_item_id, asset_id, user_id, guest_id, license, signed_url, expires_at, remaining_uses, download_count, last_downloaded_at, created_at";

pub const QUOTA_GRANT_COLS: &str = "id, user_id, guest_id, product_id, export_quota, exports_used, edit_quota, edits_used, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            title: row.get(1)?,
            active: row.get::<_, i32>(2)? != 0,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for ProductVariant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductVariant {
            id: row.get(0)?,
            product_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            price_cents: row.get(3)?,
            license: row.get(4)?,
            active: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for ProductAsset {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductAsset {
            id: row.get(0)?,
            product_id: row.get(1)?,
            storage_key: row.get(2)?,
            url: row.get(3)?,
            resource_type: row.get(4)?,
            ext: row.get(5)?,
            width: row.get(6)?,
            height: row.get(7)?,
            bytes: row.get(8)?,
            checksum: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            guest_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            total_cents: row.get(5)?,
            currency: row.get(6)?,
            placed_at: row.get(7)?,
            claim_token_hash: row.get(8)?,
            claim_token_expires_at: row.get(9)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            variant_id: row.get(3)?,
            kind: parse_enum(row, 4, "kind")?,
            quantity: row.get(5)?,
            price_cents: row.get(6)?,
            license: row.get(7)?,
            needs_review: row.get::<_, i32>(8)? != 0,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for DownloadToken {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DownloadToken {
            id: row.get(0)?,
            order_item_id: row.get(1)?,
            asset_id: row.get(2)?,
            user_id: row.get(3)?,
            guest_id: row.get(4)?,
            license: row.get(5)?,
            signed_url: row.get(6)?,
            expires_at: row.get(7)?,
            remaining_uses: row.get(8)?,
            download_count: row.get(9)?,
            last_downloaded_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl FromRow for QuotaGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(QuotaGrant {
            id: row.get(0)?,
            user_id: row.get(1)?,
            guest_id: row.get(2)?,
            product_id: row.get(3)?,
            export_quota: row.get(4)?,
            exports_used: row.get(5)?,
            edit_quota: row.get(6)?,
            edits_used: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}
