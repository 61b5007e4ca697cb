//! Quota top-up processing: converts a credit-purchase session into an
//! increment of the buyer's per-product quota counter.
//!
//! The increment is not idempotent on its own, so the ledger mark and the
//! upsert share one transaction: either both commit or the event stays
//! unprocessed for redelivery.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::QuotaKind;

use super::classifier::QuotaTopupOrder;

#[derive(Debug)]
pub enum TopupOutcome {
    Applied { credits: i64 },
    /// Ledger already holds this event id.
    AlreadyApplied,
    /// Zero or negative computed credits: accepted and ignored.
    Noop,
}

/// Credits granted by the session's line items:
/// `Σ(credits_per_unit × quantity)` over the metadata multipliers matching
/// the top-up kind. Unparsable multipliers contribute nothing.
fn total_credits(topup: &QuotaTopupOrder) -> i64 {
    topup
        .line_items
        .iter()
        .map(|line| {
            let raw = match topup.kind {
                QuotaKind::Export => line.metadata.exports_per_unit.as_deref(),
                QuotaKind::Edit => line.metadata.edits_per_unit.as_deref(),
            };
            let per_unit = match raw {
                Some(value) => value.trim().parse::<i64>().unwrap_or_else(|_| {
                    tracing::warn!(
                        "Unparsable {} multiplier {:?} on top-up session {}",
                        topup.kind,
                        value,
                        topup.session_id
                    );
                    0
                }),
                None => 0,
            };
            per_unit * line.quantity
        })
        .sum()
}

pub fn process_quota_topup(
    conn: &mut Connection,
    event_id: &str,
    topup: &QuotaTopupOrder,
) -> Result<TopupOutcome> {
    let credits = total_credits(topup);

    let tx = conn.transaction()?;

    if !queries::try_mark_event_processed(&tx, event_id)? {
        return Ok(TopupOutcome::AlreadyApplied);
    }

    if credits <= 0 {
        // Still committed to the ledger so redeliveries stop cheaply
        tx.commit()?;
        tracing::warn!(
            "Quota top-up event {} computed {} credits; nothing to apply",
            event_id,
            credits
        );
        return Ok(TopupOutcome::Noop);
    }

    queries::apply_quota_topup(&tx, &topup.buyer, &topup.product_id, topup.kind, credits)?;
    tx.commit()?;

    tracing::info!(
        "Quota top-up applied: session={}, product={}, kind={}, credits={}",
        topup.session_id,
        topup.product_id,
        topup.kind,
        credits
    );

    Ok(TopupOutcome::Applied { credits })
}
