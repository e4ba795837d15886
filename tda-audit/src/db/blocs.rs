//! Per-audit bloc status persistence
//!
//! Status changes are compare-and-swap updates: the row only moves when it
//! still holds the expected status, so a concurrent trigger that loses the
//! race observes `false` instead of running the bloc twice.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tda_common::{Error, Result};
use uuid::Uuid;

use crate::models::{BlocName, BlocStatus};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Put every bloc of the audit in PENDING, creating rows as needed
///
/// Used on audit creation and on forced reset.
pub async fn init_blocs(pool: &SqlitePool, audit_id: Uuid) -> Result<()> {
    let audit_id = audit_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("init blocs", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for bloc in BlocName::ALL {
            sqlx::query(
                r#"
                INSERT INTO audit_blocs (audit_id, bloc, status, updated_at)
                VALUES (?, ?, 'pending', ?)
                ON CONFLICT(audit_id, bloc) DO UPDATE SET
                    status = 'pending',
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&audit_id)
            .bind(bloc.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Current status of every bloc of the audit
///
/// Blocs without a row are reported as PENDING.
pub async fn load_bloc_statuses(
    pool: &SqlitePool,
    audit_id: Uuid,
) -> Result<BTreeMap<BlocName, BlocStatus>> {
    let rows = sqlx::query("SELECT bloc, status FROM audit_blocs WHERE audit_id = ?")
        .bind(audit_id.to_string())
        .fetch_all(pool)
        .await?;

    let mut statuses: BTreeMap<BlocName, BlocStatus> = BlocName::ALL
        .into_iter()
        .map(|bloc| (bloc, BlocStatus::Pending))
        .collect();

    for row in rows {
        let bloc: String = row.get("bloc");
        let status: String = row.get("status");
        let bloc: BlocName = bloc
            .parse()
            .map_err(|e| Error::Internal(format!("Corrupted audit_blocs row: {}", e)))?;
        let status: BlocStatus = status
            .parse()
            .map_err(|e| Error::Internal(format!("Corrupted audit_blocs row: {}", e)))?;
        statuses.insert(bloc, status);
    }

    Ok(statuses)
}

/// Move `bloc` from `from` to `to` if and only if it is still in `from`
///
/// Returns `false` when the row was not in the expected status (lost race
/// or stale read). Illegal transitions are rejected before touching the row.
pub async fn transition(
    pool: &SqlitePool,
    audit_id: Uuid,
    bloc: BlocName,
    from: BlocStatus,
    to: BlocStatus,
) -> Result<bool> {
    from.check_transition(bloc, to)?;

    let audit_id = audit_id.to_string();
    let now = Utc::now().to_rfc3339();

    let result = retry_on_lock("bloc transition", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE audit_blocs SET status = ?, updated_at = ? WHERE audit_id = ? AND bloc = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(&now)
        .bind(&audit_id)
        .bind(bloc.as_str())
        .bind(from.as_str())
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    Ok(result == 1)
}
