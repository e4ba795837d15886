//! Append-only audit log

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tda_common::{Error, Result};
use uuid::Uuid;

use super::parse_timestamp;
use crate::models::{LogEntry, LogLevel};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Append one entry, returning its id
pub async fn append_log(
    pool: &SqlitePool,
    audit_id: Uuid,
    bloc: Option<&str>,
    level: LogLevel,
    message: &str,
    detail: &serde_json::Value,
    timestamp: DateTime<Utc>,
) -> Result<i64> {
    let audit_id = audit_id.to_string();
    let detail = serde_json::to_string(detail)?;
    let created_at = timestamp.to_rfc3339();

    retry_on_lock("append audit log", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_id, bloc, level, message, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit_id)
        .bind(bloc)
        .bind(level.as_str())
        .bind(message)
        .bind(&detail)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.last_insert_rowid())
    })
    .await
}

/// The `limit` most recent entries of the audit, oldest first
pub async fn recent_logs(pool: &SqlitePool, audit_id: Uuid, limit: u32) -> Result<Vec<LogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT log_id, bloc, level, message, detail, created_at
        FROM audit_logs
        WHERE audit_id = ?
        ORDER BY log_id DESC
        LIMIT ?
        "#,
    )
    .bind(audit_id.to_string())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut entries = rows
        .iter()
        .map(|row| {
            let level: String = row.get("level");
            let detail: String = row.get("detail");
            let created_at: String = row.get("created_at");
            Ok(LogEntry {
                log_id: row.get("log_id"),
                audit_id,
                timestamp: parse_timestamp(&created_at, "created_at")?,
                bloc: row.get("bloc"),
                level: LogLevel::parse(&level),
                message: row.get("message"),
                detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    entries.reverse();
    Ok(entries)
}
