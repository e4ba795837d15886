//! Audit record and its overall lifecycle
//!
//! CREATED → RUNNING → AWAITING_SEGMENT → RUNNING → … → COMPLETE
//! Any fatal orchestrator error moves the audit to FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::bloc::{BlocName, BlocStatus};
use super::cost::CostLedger;
use super::destination::Destination;
use super::results::{
    BlocResult, CompetitorsResult, DigitalPresenceResult, KeywordOpportunitiesResult,
    PositioningResult,
};

/// Overall audit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Accepted from storage; new and reset audits start running
    Created,
    Running,
    AwaitingSegment,
    Complete,
    Failed,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Created => "created",
            AuditStatus::Running => "running",
            AuditStatus::AwaitingSegment => "awaiting_segment",
            AuditStatus::Complete => "complete",
            AuditStatus::Failed => "failed",
        }
    }

    /// Active audits block an un-forced start for the same destination
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AuditStatus::Created | AuditStatus::Running | AuditStatus::AwaitingSegment
        )
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditStatus::Created),
            "running" => Ok(AuditStatus::Running),
            "awaiting_segment" => Ok(AuditStatus::AwaitingSegment),
            "complete" => Ok(AuditStatus::Complete),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(format!("unknown audit status: {}", other)),
        }
    }
}

/// Persisted audit
#[derive(Debug, Clone, Serialize)]
pub struct Audit {
    pub audit_id: Uuid,
    pub destination_id: Uuid,
    pub status: AuditStatus,
    pub results: BTreeMap<BlocName, BlocResult>,
    pub costs: CostLedger,
    /// Stamped when the audit completes
    pub total_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Audit {
    pub fn new(destination_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            audit_id: Uuid::new_v4(),
            destination_id,
            status: AuditStatus::Running,
            results: BTreeMap::new(),
            costs: CostLedger::default(),
            total_cost: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self, bloc: BlocName) -> Option<&BlocResult> {
        self.results.get(&bloc)
    }

    pub fn positioning(&self) -> Option<&PositioningResult> {
        match self.results.get(&BlocName::Positioning) {
            Some(BlocResult::Positioning(r)) => Some(r),
            _ => None,
        }
    }

    pub fn digital_presence(&self) -> Option<&DigitalPresenceResult> {
        match self.results.get(&BlocName::DigitalPresence) {
            Some(BlocResult::DigitalPresence(r)) => Some(r),
            _ => None,
        }
    }

    pub fn keyword_opportunities(&self) -> Option<&KeywordOpportunitiesResult> {
        match self.results.get(&BlocName::KeywordOpportunities) {
            Some(BlocResult::KeywordOpportunities(r)) => Some(r),
            _ => None,
        }
    }

    pub fn competitors(&self) -> Option<&CompetitorsResult> {
        match self.results.get(&BlocName::Competitors) {
            Some(BlocResult::Competitors(r)) => Some(r),
            _ => None,
        }
    }
}

/// Audit plus everything a bloc or a status query needs, read in one pass
#[derive(Debug, Clone)]
pub struct AuditSnapshot {
    pub audit: Audit,
    pub destination: Destination,
    pub blocs: BTreeMap<BlocName, BlocStatus>,
}

impl AuditSnapshot {
    pub fn bloc_status(&self, bloc: BlocName) -> BlocStatus {
        self.blocs.get(&bloc).copied().unwrap_or(BlocStatus::Pending)
    }

    /// Domain resolved by bloc 1, falling back to the declared website
    pub fn resolved_domain(&self) -> Option<String> {
        self.audit
            .positioning()
            .and_then(|p| p.detected_domain.clone())
            .or_else(|| {
                self.destination
                    .website
                    .as_deref()
                    .and_then(crate::services::domain::normalize_domain)
            })
    }
}
