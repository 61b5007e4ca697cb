use rusqlite::Connection;

/// Initialize the database schema.
///
/// Correctness under concurrent webhook delivery rests on the constraints
/// here, not on in-process locking: the unique `orders.session_id`, the
/// unique `(order_item_id, asset_id)` token pair, and the
/// `processed_events` primary key all make the losing concurrent writer
/// observe a conflict and degrade to an idempotent no-op.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        -- Catalog mirror (managed elsewhere; fulfillment only validates references)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS product_variants (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('digital', 'print', 'original')),
            price_cents INTEGER NOT NULL,
            license TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_variants_product ON product_variants(product_id);

        -- Deliverable files; immutable, shared across orders
        CREATE TABLE IF NOT EXISTS product_assets (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            storage_key TEXT NOT NULL,
            url TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            ext TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            bytes INTEGER,
            checksum TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_assets_product ON product_assets(product_id);

        -- Orders: one per payment session, enforced by the unique session_id.
        -- Exactly one of user_id/guest_id is set until the order is claimed.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE,
            user_id TEXT,
            guest_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'fulfilled', 'refunded')),
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            placed_at INTEGER NOT NULL,
            claim_token_hash TEXT,
            claim_token_expires_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_guest ON orders(guest_id);
        CREATE INDEX IF NOT EXISTS idx_orders_claim_hash ON orders(claim_token_hash);

        -- needs_review flags a line whose product/variant/asset reference
        -- could not be resolved: kept for manual reconciliation, never retried
        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL,
            variant_id TEXT,
            kind TEXT NOT NULL CHECK (kind IN ('digital', 'print', 'original')),
            quantity INTEGER NOT NULL,
            price_cents INTEGER NOT NULL,
            license TEXT,
            needs_review INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
        CREATE INDEX IF NOT EXISTS idx_order_items_product ON order_items(product_id);

        -- Download tokens: at most one per (order item, asset), so repeated
        -- fulfillment attempts cannot double-issue
        CREATE TABLE IF NOT EXISTS download_tokens (
            id TEXT PRIMARY KEY,
            order_item_id TEXT NOT NULL REFERENCES order_items(id) ON DELETE CASCADE,
            asset_id TEXT NOT NULL REFERENCES product_assets(id) ON DELETE CASCADE,
            user_id TEXT,
            guest_id TEXT,
            license TEXT,
            signed_url TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            remaining_uses INTEGER,
            download_count INTEGER NOT NULL DEFAULT 0,
            last_downloaded_at INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(order_item_id, asset_id)
        );
        CREATE INDEX IF NOT EXISTS idx_download_tokens_item ON download_tokens(order_item_id);
        CREATE INDEX IF NOT EXISTS idx_download_tokens_user ON download_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_download_tokens_guest ON download_tokens(guest_id);

        -- Quota grants: one row per (identity, product), identity being a
        -- user or a guest. Partial unique indexes give the upsert its
        -- conflict target for each identity column.
        CREATE TABLE IF NOT EXISTS quota_grants (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            guest_id TEXT,
            product_id TEXT NOT NULL,
            export_quota INTEGER NOT NULL DEFAULT 0,
            exports_used INTEGER NOT NULL DEFAULT 0,
            edit_quota INTEGER NOT NULL DEFAULT 0,
            edits_used INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_quota_grants_user_product
            ON quota_grants(user_id, product_id) WHERE user_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_quota_grants_guest_product
            ON quota_grants(guest_id, product_id) WHERE guest_id IS NOT NULL;

        -- Idempotency ledger: a row here means the event's side effects are
        -- durably committed
        CREATE TABLE IF NOT EXISTS processed_events (
            event_id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
