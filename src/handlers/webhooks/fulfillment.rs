//! Order fulfillment: materializes a completed payment session into an
//! order, its line items and download tokens, exactly once.
//!
//! Duplicate deliveries and crash-retry resumes both funnel through the
//! same constraints: the unique `orders.session_id` makes order creation
//! single-winner, token issuance is a no-op on the unique
//! `(order_item_id, asset_id)` pair, and the FULFILLED transition commits
//! atomically with the ledger mark.

use chrono::Utc;
use rusqlite::Connection;

use crate::config::DownloadPolicy;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{
    Buyer, CreateDownloadToken, CreateOrder, CreateOrderItem, ItemKind, OrderStatus,
};
use crate::payments::{CheckoutSession, SessionLineItem};
use crate::storage::Storage;

#[derive(Debug)]
pub enum FulfillmentOutcome {
    /// Order reached FULFILLED during this call (fresh or resumed).
    Fulfilled {
        order_id: String,
        tokens_issued: usize,
    },
    /// Duplicate delivery of an already fulfilled session.
    AlreadyFulfilled { order_id: String },
    /// Event acknowledged without fulfillment (unrepairable payload or
    /// refunded order); redelivery would not change the outcome.
    Skipped { reason: &'static str },
}

/// Resolution of one purchased line against the catalog.
struct ResolvedLine {
    variant_id: Option<String>,
    kind: ItemKind,
    license: Option<String>,
    needs_review: bool,
}

/// A missing product or variant is fatal for the line but not for the
/// order: the item row is still written, flagged for manual
/// reconciliation, with the checkout-time kind hint as fallback.
fn resolve_line(conn: &Connection, line: &SessionLineItem) -> Result<ResolvedLine> {
    let product = queries::get_product_by_id(conn, &line.product_id)?;
    let variant = match &line.variant_id {
        Some(id) => queries::get_variant_by_id(conn, id)?,
        None => None,
    };

    match (product, variant) {
        (Some(_), Some(variant)) if variant.product_id == line.product_id => Ok(ResolvedLine {
            variant_id: Some(variant.id),
            kind: variant.kind,
            license: variant.license,
            needs_review: false,
        }),
        (product, variant) => {
            tracing::error!(
                "Unresolvable line for product {} (variant {:?}): product_found={}, variant_found={}",
                line.product_id,
                line.variant_id,
                product.is_some(),
                variant.is_some()
            );
            let kind = line
                .metadata
                .kind
                .as_deref()
                .and_then(|k| k.parse::<ItemKind>().ok())
                .unwrap_or(ItemKind::Digital);
            Ok(ResolvedLine {
                variant_id: line.variant_id.clone(),
                kind,
                license: None,
                needs_review: true,
            })
        }
    }
}

pub fn process_order_fulfillment(
    conn: &mut Connection,
    storage: &Storage,
    policy: &DownloadPolicy,
    event_id: &str,
    session: &CheckoutSession,
) -> Result<FulfillmentOutcome> {
    let Some(buyer) = Buyer::from_parts(
        session.metadata.user_id.clone(),
        session.metadata.guest_id.clone(),
    ) else {
        tracing::error!(
            "Completed session {} carries no buyer identity; needs manual reconciliation",
            session.id
        );
        return Ok(FulfillmentOutcome::Skipped {
            reason: "Session without buyer identity",
        });
    };

    let total_cents = session
        .amount_total
        .unwrap_or_else(|| session.line_items.iter().map(|l| l.amount_cents).sum());
    let currency = session.currency.clone().unwrap_or_else(|| "usd".to_string());

    // Order + items commit together so a failed line insert rolls back the
    // session claim and the provider can retry.
    let tx = conn.transaction()?;
    let created = queries::try_create_order(
        &tx,
        &CreateOrder {
            session_id: session.id.clone(),
            buyer,
            total_cents,
            currency,
        },
    )?;
    let order = queries::get_order_by_session(&tx, &session.id)?
        .ok_or_else(|| AppError::Internal(format!("Order missing for session {}", session.id)))?;

    if created {
        for line in &session.line_items {
            let resolved = resolve_line(&tx, line)?;
            queries::create_order_item(
                &tx,
                &CreateOrderItem {
                    order_id: order.id.clone(),
                    product_id: line.product_id.clone(),
                    variant_id: resolved.variant_id,
                    kind: resolved.kind,
                    quantity: line.quantity,
                    price_cents: line.amount_cents,
                    license: resolved.license,
                    needs_review: resolved.needs_review,
                },
            )?;
        }
    }
    tx.commit()?;

    match order.status {
        OrderStatus::Refunded => {
            return Ok(FulfillmentOutcome::Skipped {
                reason: "Order refunded",
            })
        }
        OrderStatus::Fulfilled => {
            // Side effects are already durable; only the ledger write may
            // be outstanding after a crash between commit and mark.
            queries::try_mark_event_processed(conn, event_id)?;
            return Ok(FulfillmentOutcome::AlreadyFulfilled { order_id: order.id });
        }
        OrderStatus::Pending => {
            queries::advance_order_status(conn, &order.id, OrderStatus::Pending, OrderStatus::Paid)?;
        }
        OrderStatus::Paid => {}
    }

    let now = Utc::now().timestamp();
    let expires_at = policy.token_expires_at(now);
    let items = queries::list_order_items(conn, &order.id)?;
    let mut issued = 0;

    for item in items
        .iter()
        .filter(|i| i.kind == ItemKind::Digital && !i.needs_review)
    {
        let assets = queries::list_assets_for_product(conn, &item.product_id)?;
        if assets.is_empty() {
            tracing::error!(
                "Digital product {} has no assets (order {}); flagging line for review",
                item.product_id,
                order.id
            );
            queries::flag_order_item_for_review(conn, &item.id)?;
            continue;
        }

        for asset in &assets {
            let token_created = queries::issue_download_token(
                conn,
                &CreateDownloadToken {
                    order_item_id: item.id.clone(),
                    asset_id: asset.id.clone(),
                    user_id: order.user_id.clone(),
                    guest_id: order.guest_id.clone(),
                    license: item.license.clone(),
                    signed_url: storage.signed_url(&asset.storage_key, expires_at),
                    expires_at,
                    remaining_uses: policy.max_uses,
                },
            )?;
            if token_created {
                issued += 1;
            }
        }
    }

    // FULFILLED and the ledger mark commit together: a crash before this
    // point leaves the order resumable, a crash inside rolls both back.
    let tx = conn.transaction()?;
    queries::advance_order_status(&tx, &order.id, OrderStatus::Paid, OrderStatus::Fulfilled)?;
    queries::try_mark_event_processed(&tx, event_id)?;
    tx.commit()?;

    tracing::info!(
        "Order fulfilled: session={}, order_id={}, tokens_issued={}",
        session.id,
        order.id,
        issued
    );

    Ok(FulfillmentOutcome::Fulfilled {
        order_id: order.id,
        tokens_issued: issued,
    })
}
