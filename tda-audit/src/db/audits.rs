//! Audit persistence
//!
//! Results and the cost ledger are JSON columns updated by read-merge-write.
//! One segment runs per audit at a time, so the merge only races with a
//! concurrent segment of the same audit, which the bloc compare-and-swap
//! already rejects.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tda_common::{Error, Result};
use uuid::Uuid;

use super::{blocs, destinations, parse_timestamp, parse_uuid};
use crate::models::{Audit, AuditSnapshot, AuditStatus, BlocCost, BlocResult, CostLedger};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SELECT_COLUMNS: &str =
    "audit_id, destination_id, status, results, costs, total_cost, created_at, updated_at";

/// Insert a new audit row
pub async fn insert_audit(pool: &SqlitePool, audit: &Audit) -> Result<()> {
    let audit_id = audit.audit_id.to_string();
    let destination_id = audit.destination_id.to_string();
    let results = serialize_results(&audit.results)?;
    let costs = serde_json::to_string(&audit.costs)?;
    let created_at = audit.created_at.to_rfc3339();
    let updated_at = audit.updated_at.to_rfc3339();

    retry_on_lock("insert audit", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO audits (
                audit_id, destination_id, status, results, costs,
                total_cost, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit_id)
        .bind(&destination_id)
        .bind(audit.status.as_str())
        .bind(&results)
        .bind(&costs)
        .bind(audit.total_cost)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Load an audit by id
pub async fn load_audit(pool: &SqlitePool, audit_id: Uuid) -> Result<Option<Audit>> {
    let row = sqlx::query(&format!("SELECT {} FROM audits WHERE audit_id = ?", SELECT_COLUMNS))
        .bind(audit_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(audit_from_row).transpose()
}

/// Most recent audit of the destination that has not reached a final status
pub async fn find_active_for_destination(
    pool: &SqlitePool,
    destination_id: Uuid,
) -> Result<Option<Audit>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM audits
        WHERE destination_id = ? AND status IN ('created', 'running', 'awaiting_segment')
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        SELECT_COLUMNS
    ))
    .bind(destination_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(audit_from_row).transpose()
}

/// Audit, destination and bloc statuses read together
pub async fn load_snapshot(pool: &SqlitePool, audit_id: Uuid) -> Result<Option<AuditSnapshot>> {
    let Some(audit) = load_audit(pool, audit_id).await? else {
        return Ok(None);
    };

    let destination = destinations::load_destination(pool, audit.destination_id)
        .await?
        .ok_or_else(|| {
            Error::Internal(format!(
                "Audit {} references missing destination {}",
                audit.audit_id, audit.destination_id
            ))
        })?;
    let blocs = blocs::load_bloc_statuses(pool, audit_id).await?;

    Ok(Some(AuditSnapshot {
        audit,
        destination,
        blocs,
    }))
}

/// Set the overall audit status unconditionally
pub async fn update_status(pool: &SqlitePool, audit_id: Uuid, status: AuditStatus) -> Result<()> {
    let audit_id = audit_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("update audit status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("UPDATE audits SET status = ?, updated_at = ? WHERE audit_id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(&audit_id)
            .execute(pool)
            .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Store a bloc result, replacing any previous result of the same bloc
pub async fn save_result(pool: &SqlitePool, audit_id: Uuid, result: &BlocResult) -> Result<()> {
    let id = audit_id.to_string();
    let key = result.bloc().as_str();
    let payload = serde_json::to_value(result)?;

    retry_on_lock("save bloc result", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        let raw: Option<String> = sqlx::query_scalar("SELECT results FROM audits WHERE audit_id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        let raw = raw.ok_or_else(|| Error::NotFound(format!("audit {}", id)))?;

        let mut results: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
        results.insert(key.to_string(), payload.clone());
        let merged = serde_json::to_string(&results)?;

        sqlx::query("UPDATE audits SET results = ?, updated_at = ? WHERE audit_id = ?")
            .bind(&merged)
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Current cost ledger of the audit
pub async fn load_costs(pool: &SqlitePool, audit_id: Uuid) -> Result<CostLedger> {
    let raw: Option<String> = sqlx::query_scalar("SELECT costs FROM audits WHERE audit_id = ?")
        .bind(audit_id.to_string())
        .fetch_optional(pool)
        .await?;
    let raw = raw.ok_or_else(|| Error::NotFound(format!("audit {}", audit_id)))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Read the ledger, shallow-merge `{key: cost}`, write it back
///
/// Not atomic: two concurrent merges on the same audit may lose one write.
pub async fn merge_cost(
    pool: &SqlitePool,
    audit_id: Uuid,
    key: &str,
    cost: &BlocCost,
) -> Result<CostLedger> {
    let mut ledger = load_costs(pool, audit_id).await?;
    ledger.merge(key, cost.clone());
    let serialized = serde_json::to_string(&ledger)?;
    let id = audit_id.to_string();

    retry_on_lock("save cost ledger", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("UPDATE audits SET costs = ?, updated_at = ? WHERE audit_id = ?")
            .bind(&serialized)
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(pool)
            .await?;
        Ok::<_, Error>(())
    })
    .await?;

    Ok(ledger)
}

/// Mark the audit complete and stamp the ledger total
pub async fn complete_audit(pool: &SqlitePool, audit_id: Uuid, total_cost: f64) -> Result<()> {
    let id = audit_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("complete audit", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            "UPDATE audits SET status = 'complete', total_cost = ?, updated_at = ? WHERE audit_id = ?",
        )
        .bind(total_cost)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Forced restart: clear results, costs and total, every bloc back to PENDING
/// and the audit running again
///
/// Log history is kept.
pub async fn reset_audit(pool: &SqlitePool, audit_id: Uuid) -> Result<()> {
    let id = audit_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("reset audit", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE audits SET
                status = 'running',
                results = '{}',
                costs = '{}',
                total_cost = NULL,
                updated_at = ?
            WHERE audit_id = ?
            "#,
        )
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await?;

    blocs::init_blocs(pool, audit_id).await
}

fn serialize_results(results: &BTreeMap<crate::models::BlocName, BlocResult>) -> Result<String> {
    let by_key: BTreeMap<&str, &BlocResult> =
        results.iter().map(|(bloc, result)| (bloc.as_str(), result)).collect();
    Ok(serde_json::to_string(&by_key)?)
}

fn audit_from_row(row: &SqliteRow) -> Result<Audit> {
    let audit_id: String = row.get("audit_id");
    let destination_id: String = row.get("destination_id");

    let status: String = row.get("status");
    let status: AuditStatus = status.parse().map_err(Error::Internal)?;

    let results: String = row.get("results");
    let results: BTreeMap<String, BlocResult> = serde_json::from_str(&results)
        .map_err(|e| Error::Internal(format!("Failed to deserialize results: {}", e)))?;
    let results = results
        .into_values()
        .map(|result| (result.bloc(), result))
        .collect();

    let costs: String = row.get("costs");
    let costs: CostLedger = serde_json::from_str(&costs)
        .map_err(|e| Error::Internal(format!("Failed to deserialize costs: {}", e)))?;

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Audit {
        audit_id: parse_uuid(&audit_id, "audit_id")?,
        destination_id: parse_uuid(&destination_id, "destination_id")?,
        status,
        results,
        costs,
        total_cost: row.get("total_cost"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::{BlocName, DestinationRequest, PositioningResult, SeoVisibilityResult};

    async fn setup() -> (SqlitePool, Audit) {
        let pool = init_memory_pool().await.unwrap();
        let destination = destinations::resolve_or_create(
            &pool,
            &DestinationRequest {
                name: "Annecy".to_string(),
                country: "France".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let audit = Audit::new(destination.destination_id);
        insert_audit(&pool, &audit).await.unwrap();
        blocs::init_blocs(&pool, audit.audit_id).await.unwrap();
        (pool, audit)
    }

    #[tokio::test]
    async fn results_are_merged_per_bloc() {
        let (pool, audit) = setup().await;

        save_result(
            &pool,
            audit.audit_id,
            &BlocResult::Positioning(PositioningResult {
                detected_domain: Some("lac-annecy.com".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        save_result(
            &pool,
            audit.audit_id,
            &BlocResult::SeoVisibility(SeoVisibilityResult::default()),
        )
        .await
        .unwrap();

        let loaded = load_audit(&pool, audit.audit_id).await.unwrap().unwrap();
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(
            loaded.positioning().unwrap().detected_domain.as_deref(),
            Some("lac-annecy.com")
        );
        assert!(loaded.result(BlocName::SeoVisibility).is_some());
    }

    #[tokio::test]
    async fn sequential_cost_merges_keep_every_key() {
        let (pool, audit) = setup().await;

        let mut llm = BlocCost::default();
        llm.charge("llm", 0.02);
        let mut seo = BlocCost::default();
        seo.charge("seo_primary", 0.01);

        merge_cost(&pool, audit.audit_id, "positioning", &llm).await.unwrap();
        merge_cost(&pool, audit.audit_id, "competitors.a", &llm).await.unwrap();
        merge_cost(&pool, audit.audit_id, "competitors.b", &seo).await.unwrap();

        let ledger = load_costs(&pool, audit.audit_id).await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!((ledger.total() - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn only_unfinished_audits_are_active() {
        let (pool, audit) = setup().await;

        let active = find_active_for_destination(&pool, audit.destination_id)
            .await
            .unwrap();
        assert_eq!(active.map(|a| a.audit_id), Some(audit.audit_id));

        complete_audit(&pool, audit.audit_id, 1.5).await.unwrap();
        assert!(find_active_for_destination(&pool, audit.destination_id)
            .await
            .unwrap()
            .is_none());

        let loaded = load_audit(&pool, audit.audit_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AuditStatus::Complete);
        assert_eq!(loaded.total_cost, Some(1.5));
    }

    #[tokio::test]
    async fn reset_clears_results_and_costs() {
        let (pool, audit) = setup().await;
        save_result(
            &pool,
            audit.audit_id,
            &BlocResult::Positioning(PositioningResult::default()),
        )
        .await
        .unwrap();
        let mut cost = BlocCost::default();
        cost.charge("llm", 0.1);
        merge_cost(&pool, audit.audit_id, "positioning", &cost).await.unwrap();
        update_status(&pool, audit.audit_id, AuditStatus::AwaitingSegment)
            .await
            .unwrap();

        reset_audit(&pool, audit.audit_id).await.unwrap();

        let snapshot = load_snapshot(&pool, audit.audit_id).await.unwrap().unwrap();
        assert_eq!(snapshot.audit.status, AuditStatus::Running);
        assert!(snapshot.audit.results.is_empty());
        assert!(snapshot.audit.costs.is_empty());
        assert_eq!(snapshot.destination.name, "Annecy");
    }
}
