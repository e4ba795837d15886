//! Best-effort cost ledger writes
//!
//! Ledger writes never fail the bloc that produced the cost: errors are
//! reported through tracing and dropped.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::audits;
use crate::models::BlocCost;

/// Merge `{key: cost}` into the audit's ledger
///
/// Empty costs are skipped. Returns whether the write went through.
pub async fn record_cost(pool: &SqlitePool, audit_id: Uuid, key: &str, cost: &BlocCost) -> bool {
    if cost.is_empty() {
        tracing::debug!(audit_id = %audit_id, key, "No provider calls to record");
        return true;
    }

    match audits::merge_cost(pool, audit_id, key, cost).await {
        Ok(ledger) => {
            tracing::debug!(
                audit_id = %audit_id,
                key,
                calls = cost.provider_calls(),
                cost = cost.total_cost(),
                ledger_total = ledger.total(),
                "Cost recorded"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                audit_id = %audit_id,
                key,
                error = %e,
                "Failed to record cost, continuing"
            );
            false
        }
    }
}
