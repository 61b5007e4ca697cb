use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ASSET_COLS, DOWNLOAD_TOKEN_COLS, ORDER_COLS, ORDER_ITEM_COLS,
    PRODUCT_COLS, QUOTA_GRANT_COLS, VARIANT_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Catalog ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, title, active, created_at) VALUES (?1, ?2, 1, ?3)",
        params![&id, &input.title, now],
    )?;

    Ok(Product {
        id,
        title: input.title.clone(),
        active: true,
        created_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1 AND active = 1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn create_product_variant(
    conn: &Connection,
    input: &CreateProductVariant,
) -> Result<ProductVariant> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO product_variants (id, product_id, kind, price_cents, license, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            &id,
            &input.product_id,
            input.kind.as_str(),
            input.price_cents,
            &input.license,
            now
        ],
    )?;

    Ok(ProductVariant {
        id,
        product_id: input.product_id.clone(),
        kind: input.kind,
        price_cents: input.price_cents,
        license: input.license.clone(),
        active: true,
        created_at: now,
    })
}

pub fn get_variant_by_id(conn: &Connection, id: &str) -> Result<Option<ProductVariant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM product_variants WHERE id = ?1 AND active = 1",
            VARIANT_COLS
        ),
        &[&id],
    )
}

pub fn create_product_asset(
    conn: &Connection,
    input: &CreateProductAsset,
) -> Result<ProductAsset> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO product_assets (id, product_id, storage_key, url, resource_type, ext, width, height, bytes, checksum, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &input.product_id,
            &input.storage_key,
            &input.url,
            &input.resource_type,
            &input.ext,
            input.width,
            input.height,
            input.bytes,
            &input.checksum,
            now
        ],
    )?;

    Ok(ProductAsset {
        id,
        product_id: input.product_id.clone(),
        storage_key: input.storage_key.clone(),
        url: input.url.clone(),
        resource_type: input.resource_type.clone(),
        ext: input.ext.clone(),
        width: input.width,
        height: input.height,
        bytes: input.bytes,
        checksum: input.checksum.clone(),
        created_at: now,
    })
}

pub fn get_asset_by_id(conn: &Connection, id: &str) -> Result<Option<ProductAsset>> {
    query_one(
        conn,
        &format!("SELECT {} FROM product_assets WHERE id = ?1", ASSET_COLS),
        &[&id],
    )
}

pub fn list_assets_for_product(conn: &Connection, product_id: &str) -> Result<Vec<ProductAsset>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_assets WHERE product_id = ?1 ORDER BY created_at",
            ASSET_COLS
        ),
        &[&product_id],
    )
}

// ============ Orders ============

/// Attempt to create an order for a payment session.
///
/// The unique constraint on `session_id` serializes concurrent duplicate
/// deliveries: exactly one caller wins the insert, every other observes
/// the conflict and is told to continue with the existing order.
///
/// Returns true if this call created the order, false if one already
/// existed for the session.
pub fn try_create_order(conn: &Connection, input: &CreateOrder) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO orders (id, session_id, user_id, guest_id, status, total_cents, currency, placed_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)",
        params![
            gen_id(),
            &input.session_id,
            input.buyer.user_id(),
            input.buyer.guest_id(),
            input.total_cents,
            &input.currency,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_session(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE session_id = ?1", ORDER_COLS),
        &[&session_id],
    )
}

/// Look up an order by session id, scoped to its owner.
pub fn get_order_by_session_for_owner(
    conn: &Connection,
    session_id: &str,
    user_id: Option<&str>,
    guest_id: Option<&str>,
) -> Result<Option<Order>> {
    match (user_id, guest_id) {
        (Some(user), _) => query_one(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE session_id = ?1 AND user_id = ?2",
                ORDER_COLS
            ),
            params![session_id, user],
        ),
        (None, Some(guest)) => query_one(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE session_id = ?1 AND guest_id = ?2",
                ORDER_COLS
            ),
            params![session_id, guest],
        ),
        (None, None) => Ok(None),
    }
}

/// Look up an order by order id or session id, scoped to its owner.
/// The archive endpoint accepts either reference.
pub fn get_order_for_owner(
    conn: &Connection,
    order_ref: &str,
    user_id: Option<&str>,
    guest_id: Option<&str>,
) -> Result<Option<Order>> {
    match (user_id, guest_id) {
        (Some(user), _) => query_one(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE (id = ?1 OR session_id = ?1) AND user_id = ?2",
                ORDER_COLS
            ),
            params![order_ref, user],
        ),
        (None, Some(guest)) => query_one(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE (id = ?1 OR session_id = ?1) AND guest_id = ?2",
                ORDER_COLS
            ),
            params![order_ref, guest],
        ),
        (None, None) => Ok(None),
    }
}

/// Compare-and-swap status transition. The losing concurrent writer sees
/// zero affected rows and treats the transition as already done.
pub fn advance_order_status(
    conn: &Connection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![to.as_str(), order_id, from.as_str()],
    )?;
    Ok(affected > 0)
}

pub fn create_order_item(conn: &Connection, input: &CreateOrderItem) -> Result<OrderItem> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO order_items (id, order_id, product_id, variant_id, kind, quantity, price_cents, license, needs_review, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &input.order_id,
            &input.product_id,
            &input.variant_id,
            input.kind.as_str(),
            input.quantity,
            input.price_cents,
            &input.license,
            input.needs_review as i32,
            now
        ],
    )?;

    Ok(OrderItem {
        id,
        order_id: input.order_id.clone(),
        product_id: input.product_id.clone(),
        variant_id: input.variant_id.clone(),
        kind: input.kind,
        quantity: input.quantity,
        price_cents: input.price_cents,
        license: input.license.clone(),
        needs_review: input.needs_review,
        created_at: now,
    })
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

/// Flag a line for manual reconciliation (unresolvable reference found
/// after the item row was created).
pub fn flag_order_item_for_review(conn: &Connection, item_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE order_items SET needs_review = 1 WHERE id = ?1",
        params![item_id],
    )?;
    Ok(affected > 0)
}

// ============ Download Tokens ============

/// Issue a download token for an (order item, asset) pair.
///
/// The unique constraint on the pair makes re-issuance on webhook retry a
/// no-op. Returns true if a token was created by this call.
pub fn issue_download_token(conn: &Connection, input: &CreateDownloadToken) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO download_tokens (id, order_item_id, asset_id, user_id, guest_id, license, signed_url, expires_at, remaining_uses, download_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
        params![
            gen_id(),
            &input.order_item_id,
            &input.asset_id,
            &input.user_id,
            &input.guest_id,
            &input.license,
            &input.signed_url,
            input.expires_at,
            input.remaining_uses,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_download_token(conn: &Connection, id: &str) -> Result<Option<DownloadToken>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM download_tokens WHERE id = ?1",
            DOWNLOAD_TOKEN_COLS
        ),
        &[&id],
    )
}

/// Atomically redeem a download token.
///
/// The expiry/budget check and the decrement are a single conditional
/// UPDATE so two concurrent redemptions cannot both pass a check of
/// `remaining_uses == 1`. Returns true when the redemption was granted.
pub fn redeem_download_token(conn: &Connection, token_id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE download_tokens
         SET remaining_uses = CASE WHEN remaining_uses IS NULL THEN NULL ELSE remaining_uses - 1 END,
             download_count = download_count + 1,
             last_downloaded_at = ?1
         WHERE id = ?2
           AND expires_at > ?1
           AND (remaining_uses IS NULL OR remaining_uses > 0)",
        params![now, token_id],
    )?;
    Ok(affected > 0)
}

pub fn list_download_tokens_for_order(
    conn: &Connection,
    order_id: &str,
) -> Result<Vec<DownloadToken>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM download_tokens WHERE order_item_id IN
             (SELECT id FROM order_items WHERE order_id = ?1)
             ORDER BY created_at, id",
            DOWNLOAD_TOKEN_COLS
        ),
        &[&order_id],
    )
}

/// Named projection joining a download token with its asset, used by the
/// checkout summary and archive read paths.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadEntry {
    pub token_id: String,
    pub order_item_id: String,
    pub asset_id: String,
    pub product_id: String,
    pub storage_key: String,
    pub ext: String,
    pub signed_url: String,
    pub expires_at: i64,
    pub remaining_uses: Option<i64>,
}

impl DownloadEntry {
    /// File name used inside archives: last path segment of the storage
    /// key plus the recorded extension.
    pub fn file_name(&self) -> String {
        let stem = self
            .storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_key);
        if stem.ends_with(&format!(".{}", self.ext)) {
            stem.to_string()
        } else {
            format!("{}.{}", stem, self.ext)
        }
    }
}

const DOWNLOAD_ENTRY_SQL: &str = "SELECT t.id, t.order_item_id, t.asset_id, a.product_id, a.storage_key, a.ext, t.signed_url, t.expires_at, t.remaining_uses
     FROM download_tokens t
     JOIN product_assets a ON a.id = t.asset_id
     JOIN order_items oi ON oi.id = t.order_item_id
     WHERE oi.order_id = ?1";

fn download_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<DownloadEntry> {
    Ok(DownloadEntry {
        token_id: row.get(0)?,
        order_item_id: row.get(1)?,
        asset_id: row.get(2)?,
        product_id: row.get(3)?,
        storage_key: row.get(4)?,
        ext: row.get(5)?,
        signed_url: row.get(6)?,
        expires_at: row.get(7)?,
        remaining_uses: row.get(8)?,
    })
}

pub fn list_order_downloads(conn: &Connection, order_id: &str) -> Result<Vec<DownloadEntry>> {
    let sql = format!("{} ORDER BY t.created_at, t.id", DOWNLOAD_ENTRY_SQL);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![order_id], download_entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Still-valid downloads for an order: unexpired with budget remaining.
/// Read-only; only the redemption path touches counters.
pub fn list_valid_order_downloads(
    conn: &Connection,
    order_id: &str,
    now: i64,
) -> Result<Vec<DownloadEntry>> {
    let sql = format!(
        "{} AND t.expires_at > ?2 AND (t.remaining_uses IS NULL OR t.remaining_uses > 0)
         ORDER BY t.created_at, t.id",
        DOWNLOAD_ENTRY_SQL
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![order_id, now], download_entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ Quota Grants ============

/// Apply a quota top-up: create the grant on first purchase, otherwise
/// increment the existing counter. Never overwrites, so a duplicate race
/// that slips past the ledger nets out at one increment per event, not a
/// silent replacement of earlier top-ups.
pub fn apply_quota_topup(
    conn: &Connection,
    buyer: &Buyer,
    product_id: &str,
    kind: QuotaKind,
    credits: i64,
) -> Result<()> {
    let quota_col = match kind {
        QuotaKind::Export => "export_quota",
        QuotaKind::Edit => "edit_quota",
    };

    match buyer {
        Buyer::User(user_id) => {
            conn.execute(
                &format!(
                    "INSERT INTO quota_grants (id, user_id, guest_id, product_id, {q}, created_at, updated_at)
                     VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?5)
                     ON CONFLICT(user_id, product_id) WHERE user_id IS NOT NULL
                     DO UPDATE SET {q} = {q} + excluded.{q}, updated_at = excluded.updated_at",
                    q = quota_col
                ),
                params![gen_id(), user_id, product_id, credits, now()],
            )?;
        }
        Buyer::Guest(guest_id) => {
            conn.execute(
                &format!(
                    "INSERT INTO quota_grants (id, user_id, guest_id, product_id, {q}, created_at, updated_at)
                     VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(guest_id, product_id) WHERE guest_id IS NOT NULL
                     DO UPDATE SET {q} = {q} + excluded.{q}, updated_at = excluded.updated_at",
                    q = quota_col
                ),
                params![gen_id(), guest_id, product_id, credits, now()],
            )?;
        }
    }

    Ok(())
}

pub fn get_quota_grant(
    conn: &Connection,
    user_id: Option<&str>,
    guest_id: Option<&str>,
    product_id: &str,
) -> Result<Option<QuotaGrant>> {
    match (user_id, guest_id) {
        (Some(user), _) => query_one(
            conn,
            &format!(
                "SELECT {} FROM quota_grants WHERE user_id = ?1 AND product_id = ?2",
                QUOTA_GRANT_COLS
            ),
            params![user, product_id],
        ),
        (None, Some(guest)) => query_one(
            conn,
            &format!(
                "SELECT {} FROM quota_grants WHERE guest_id = ?1 AND product_id = ?2",
                QUOTA_GRANT_COLS
            ),
            params![guest, product_id],
        ),
        (None, None) => Ok(None),
    }
}

// ============ Entitlements (read model) ============

/// What an identity holds for one product: purchased variant kinds from
/// fulfilled orders plus remaining feature credits. Pure read path.
#[derive(Debug, Clone, Serialize)]
pub struct ProductEntitlement {
    pub purchased: bool,
    pub kinds: Vec<ItemKind>,
    pub exports_left: i64,
    pub edits_left: i64,
}

pub fn get_product_entitlement(
    conn: &Connection,
    user_id: Option<&str>,
    guest_id: Option<&str>,
    product_id: &str,
) -> Result<ProductEntitlement> {
    let (owner_col, owner_id) = match (user_id, guest_id) {
        (Some(user), _) => ("o.user_id", user),
        (None, Some(guest)) => ("o.guest_id", guest),
        (None, None) => {
            return Ok(ProductEntitlement {
                purchased: false,
                kinds: vec![],
                exports_left: 0,
                edits_left: 0,
            })
        }
    };

    let sql = format!(
        "SELECT DISTINCT oi.kind FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         WHERE oi.product_id = ?1 AND oi.needs_review = 0
           AND o.status = 'fulfilled' AND {} = ?2
         ORDER BY oi.kind",
        owner_col
    );
    let mut stmt = conn.prepare(&sql)?;
    let kinds = stmt
        .query_map(params![product_id, owner_id], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|s| s.parse::<ItemKind>().ok())
        .collect::<Vec<_>>();

    let grant = get_quota_grant(conn, user_id, guest_id, product_id)?;
    let (exports_left, edits_left) = grant
        .map(|g| (g.exports_left(), g.edits_left()))
        .unwrap_or((0, 0));

    Ok(ProductEntitlement {
        purchased: !kinds.is_empty(),
        kinds,
        exports_left,
        edits_left,
    })
}

// ============ Guest-to-User Claim ============

/// Store the salted hash and expiry of a freshly generated claim token.
pub fn set_claim_token(
    conn: &Connection,
    order_id: &str,
    token_hash: &str,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE orders SET claim_token_hash = ?1, claim_token_expires_at = ?2 WHERE id = ?3",
        params![token_hash, expires_at, order_id],
    )?;
    Ok(())
}

/// Atomically claim a guest order for a user.
///
/// One UPDATE matches hash, expiry and unclaimed state together and clears
/// the token fields, so a consumed or expired token can never authorize a
/// second reassignment; every download token on the order is re-scoped in
/// the same transaction. Returns the claimed order, or None on any
/// non-match (callers report that uniformly).
pub fn claim_order(
    conn: &mut Connection,
    user_id: &str,
    token_hash: &str,
    now: i64,
) -> Result<Option<Order>> {
    let tx = conn.transaction()?;

    let order: Option<Order> = query_one(
        &tx,
        &format!(
            "UPDATE orders
             SET user_id = ?1, guest_id = NULL, claim_token_hash = NULL, claim_token_expires_at = NULL
             WHERE claim_token_hash = ?2 AND claim_token_expires_at > ?3 AND user_id IS NULL
             RETURNING {}",
            ORDER_COLS
        ),
        params![user_id, token_hash, now],
    )?;

    let Some(order) = order else {
        return Ok(None);
    };

    tx.execute(
        "UPDATE download_tokens SET user_id = ?1, guest_id = NULL
         WHERE order_item_id IN (SELECT id FROM order_items WHERE order_id = ?2)",
        params![user_id, &order.id],
    )?;

    tx.commit()?;
    Ok(Some(order))
}

/// Clear claim tokens that expired without being redeemed.
/// Returns the number of orders cleaned.
pub fn purge_expired_claim_tokens(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE orders SET claim_token_hash = NULL, claim_token_expires_at = NULL
         WHERE claim_token_expires_at IS NOT NULL AND claim_token_expires_at <= ?1",
        params![now()],
    )?;
    Ok(affected)
}

// ============ Idempotency Ledger ============

pub fn event_already_processed(conn: &Connection, event_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM processed_events WHERE event_id = ?1",
            params![event_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Atomically record an event as processed, returning true if this call
/// recorded it. A duplicate mark (two racing workers for the same event)
/// is silently ignored and reported as false, which callers treat as
/// success.
pub fn try_mark_event_processed(conn: &Connection, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO processed_events (event_id, created_at) VALUES (?1, ?2)",
        params![event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge ledger rows older than the provider's retry horizon.
/// Returns the number of deleted records.
pub fn purge_old_processed_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86400;
    let deleted = conn.execute(
        "DELETE FROM processed_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
