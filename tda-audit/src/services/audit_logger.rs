//! Persistent audit log
//!
//! Each entry is written to `audit_logs`, mirrored to tracing, and pushed on
//! the event bus. Writing a log entry never fails the caller.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tda_common::events::{AuditEvent, EventBus};
use uuid::Uuid;

use crate::db::logs;
use crate::models::LogLevel;

#[derive(Clone)]
pub struct AuditLogger {
    db: SqlitePool,
    event_bus: EventBus,
}

impl AuditLogger {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    pub async fn info(&self, audit_id: Uuid, bloc: Option<&str>, message: &str, detail: Value) {
        self.append(audit_id, bloc, LogLevel::Info, message, detail).await;
    }

    pub async fn error(&self, audit_id: Uuid, bloc: Option<&str>, message: &str, detail: Value) {
        self.append(audit_id, bloc, LogLevel::Error, message, detail).await;
    }

    async fn append(
        &self,
        audit_id: Uuid,
        bloc: Option<&str>,
        level: LogLevel,
        message: &str,
        detail: Value,
    ) {
        let timestamp = Utc::now();
        let bloc_field = bloc.unwrap_or("-");

        match level {
            LogLevel::Info => {
                tracing::info!(audit_id = %audit_id, bloc = bloc_field, %detail, "{}", message)
            }
            LogLevel::Error => {
                tracing::error!(audit_id = %audit_id, bloc = bloc_field, %detail, "{}", message)
            }
        }

        if let Err(e) =
            logs::append_log(&self.db, audit_id, bloc, level, message, &detail, timestamp).await
        {
            tracing::warn!(audit_id = %audit_id, error = %e, "Failed to persist audit log entry");
        }

        self.event_bus.emit_lossy(AuditEvent::AuditLogAppended {
            audit_id,
            bloc: bloc.map(str::to_string),
            level: level.as_str().to_string(),
            message: message.to_string(),
            timestamp,
        });
    }
}
