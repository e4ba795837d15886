//! Database access for tda-audit
//!
//! SQLite through sqlx. Tables:
//! - `destinations`: one row per normalized (name, country)
//! - `audits`: status, results map, cost ledger, stamped total
//! - `audit_blocs`: per-audit bloc status, updated by compare-and-swap
//! - `audit_logs`: append-only audit log

pub mod audits;
pub mod blocs;
pub mod destinations;
pub mod logs;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tda_common::Result;
use uuid::Uuid;

/// Initialize database connection pool on a file, creating it if missing
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Pinned to a single long-lived connection: every new connection to
/// `sqlite::memory:` would otherwise open an empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the audit tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS destinations (
            destination_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            country TEXT NOT NULL,
            country_key TEXT NOT NULL,
            region TEXT,
            website TEXT,
            social_handle TEXT,
            bbox TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (name_key, country_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audits (
            audit_id TEXT PRIMARY KEY,
            destination_id TEXT NOT NULL REFERENCES destinations(destination_id),
            status TEXT NOT NULL,
            results TEXT NOT NULL DEFAULT '{}',
            costs TEXT NOT NULL DEFAULT '{}',
            total_cost REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audits_destination ON audits(destination_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_blocs (
            audit_id TEXT NOT NULL REFERENCES audits(audit_id),
            bloc TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            updated_at TEXT NOT NULL,
            PRIMARY KEY (audit_id, bloc)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            audit_id TEXT NOT NULL,
            bloc TEXT,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_logs_audit ON audit_logs(audit_id, log_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (destinations, audits, audit_blocs, audit_logs)");

    Ok(())
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| tda_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| tda_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
