//! Append-only audit log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "error" {
            LogLevel::Error
        } else {
            LogLevel::Info
        }
    }
}

/// One persisted log line, scoped to an audit and optionally a bloc
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: i64,
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Bloc key, `None` for audit-level entries
    pub bloc: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub detail: serde_json::Value,
}
