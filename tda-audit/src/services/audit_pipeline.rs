//! Audit pipeline entry points
//!
//! One `AuditPipeline` is built in `main` and shared by the HTTP handlers.
//! It owns the segment runner, applies the per-segment wall-clock ceilings
//! and answers the read-side queries (status report, open gate).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tda_common::events::{AuditEvent, EventBus};
use uuid::Uuid;

use super::audit_logger::AuditLogger;
use super::audit_orchestrator::{
    BlocExecutor, BlocLimits, GateSelection, ProviderBlocExecutor, SegmentOutcome, SegmentRunner,
};
use super::geo_partition::GeoPartitionCounter;
use super::providers::Providers;
use crate::config::{AuditConfig, PipelineConfig};
use crate::db::{audits, blocs, destinations, logs};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Audit, AuditStatus, BlocName, BlocResult, BlocStatus, CompetitorCandidate, CostLedger,
    Destination, DestinationRequest, KeywordCandidate, LogEntry, Segment,
};

/// Start request: destination identity plus the force flag
#[derive(Debug, Clone, Deserialize)]
pub struct StartAuditRequest {
    #[serde(flatten)]
    pub destination: DestinationRequest,
    /// Reset an active audit of the same destination instead of rejecting
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedAudit {
    pub audit_id: Uuid,
    pub destination_id: Uuid,
    pub status: AuditStatus,
    /// True when an existing audit was reset
    pub reset: bool,
}

/// Full audit state for the status query
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub status: AuditStatus,
    pub destination: Destination,
    pub blocs: BTreeMap<BlocName, BlocStatus>,
    pub costs: CostLedger,
    /// Live sum of the ledger
    pub total_cost: f64,
    pub results: BTreeMap<BlocName, BlocResult>,
    /// Most recent entries, oldest first
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GateCandidates {
    Keywords(Vec<KeywordCandidate>),
    Competitors(Vec<CompetitorCandidate>),
}

/// Candidate list of the gate an audit is waiting on
#[derive(Debug, Clone, Serialize)]
pub struct OpenGate {
    pub audit_id: Uuid,
    pub bloc: BlocName,
    pub candidates: GateCandidates,
}

pub struct AuditPipeline {
    db: SqlitePool,
    event_bus: EventBus,
    logger: AuditLogger,
    runner: SegmentRunner,
    config: PipelineConfig,
}

impl AuditPipeline {
    /// Pipeline backed by real providers
    pub fn new(db: SqlitePool, event_bus: EventBus, providers: Providers, config: &AuditConfig) -> Self {
        let counter = GeoPartitionCounter::new(config.geo.partition_config());
        let limits = BlocLimits {
            ranked_keywords: config.pipeline.ranked_keyword_limit,
            keyword_candidates: config.pipeline.keyword_candidate_limit,
            ..BlocLimits::default()
        };
        let executor = ProviderBlocExecutor::new(providers, counter, limits);
        Self::with_executor(db, event_bus, Arc::new(executor), config.pipeline.clone())
    }

    pub fn with_executor(
        db: SqlitePool,
        event_bus: EventBus,
        executor: Arc<dyn BlocExecutor>,
        config: PipelineConfig,
    ) -> Self {
        let logger = AuditLogger::new(db.clone(), event_bus.clone());
        let runner = SegmentRunner::new(db.clone(), event_bus.clone(), executor);
        Self {
            db,
            event_bus,
            logger,
            runner,
            config,
        }
    }

    /// Create an audit, or reset the active one when `force` is set
    pub async fn start_audit(&self, request: StartAuditRequest) -> ApiResult<StartedAudit> {
        request
            .destination
            .validate()
            .map_err(ApiError::BadRequest)?;

        let destination = destinations::resolve_or_create(&self.db, &request.destination).await?;
        let active = audits::find_active_for_destination(&self.db, destination.destination_id).await?;

        let (audit_id, reset) = match active {
            Some(existing) if !request.force => {
                tracing::info!(
                    audit_id = %existing.audit_id,
                    destination = %destination.name,
                    "Active audit exists, rejecting start"
                );
                return Err(ApiError::Duplicate {
                    audit_id: existing.audit_id,
                });
            }
            Some(existing) => {
                audits::reset_audit(&self.db, existing.audit_id).await?;
                (existing.audit_id, true)
            }
            None => {
                let audit = Audit::new(destination.destination_id);
                audits::insert_audit(&self.db, &audit).await?;
                blocs::init_blocs(&self.db, audit.audit_id).await?;
                (audit.audit_id, false)
            }
        };

        self.event_bus.emit_lossy(AuditEvent::AuditStarted {
            audit_id,
            destination_id: destination.destination_id,
            destination_name: destination.name.clone(),
            reset,
            timestamp: Utc::now(),
        });
        self.logger
            .info(
                audit_id,
                None,
                if reset { "Audit reset" } else { "Audit created" },
                json!({
                    "destination": destination.name,
                    "country": destination.country,
                    "force": request.force,
                }),
            )
            .await;

        Ok(StartedAudit {
            audit_id,
            destination_id: destination.destination_id,
            status: AuditStatus::Running,
            reset,
        })
    }

    pub async fn run_segment_a(&self, audit_id: Uuid) -> ApiResult<SegmentOutcome> {
        self.run_with_ceiling(audit_id, Segment::A, None).await
    }

    /// Pass gate 1 with the reviewed keywords and run segment B
    pub async fn resume_segment_b(
        &self,
        audit_id: Uuid,
        keywords: Vec<KeywordCandidate>,
    ) -> ApiResult<SegmentOutcome> {
        self.run_with_ceiling(audit_id, Segment::B, Some(GateSelection::Keywords(keywords)))
            .await
    }

    /// Pass gate 2 with the reviewed competitors and run segment C
    pub async fn resume_segment_c(
        &self,
        audit_id: Uuid,
        competitors: Vec<CompetitorCandidate>,
    ) -> ApiResult<SegmentOutcome> {
        self.run_with_ceiling(
            audit_id,
            Segment::C,
            Some(GateSelection::Competitors(competitors)),
        )
        .await
    }

    /// Committed statuses survive the ceiling; the idempotency guard keeps a
    /// later re-trigger from running the same blocs twice.
    async fn run_with_ceiling(
        &self,
        audit_id: Uuid,
        segment: Segment,
        selection: Option<GateSelection>,
    ) -> ApiResult<SegmentOutcome> {
        let ceiling = self.config.segment_timeout(segment);
        match tokio::time::timeout(ceiling, self.runner.run(audit_id, segment, selection)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    audit_id = %audit_id,
                    segment = %segment,
                    ceiling_secs = ceiling.as_secs(),
                    "Segment exceeded its ceiling"
                );
                self.logger
                    .error(
                        audit_id,
                        None,
                        &format!("Segment {} timed out", segment),
                        json!({ "segment": segment.to_string(), "ceiling_secs": ceiling.as_secs() }),
                    )
                    .await;
                Err(ApiError::Timeout {
                    segment: segment.to_string(),
                    ceiling,
                })
            }
        }
    }

    /// Status report with the `logs` most recent log entries
    pub async fn status(&self, audit_id: Uuid, logs: Option<u32>) -> ApiResult<AuditReport> {
        let snapshot = audits::load_snapshot(&self.db, audit_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("audit {}", audit_id)))?;

        let limit = logs.unwrap_or(self.config.default_log_limit);
        let entries = logs::recent_logs(&self.db, audit_id, limit).await?;

        let mut bloc_statuses = snapshot.blocs;
        for bloc in BlocName::ALL {
            bloc_statuses.entry(bloc).or_insert(BlocStatus::Pending);
        }

        let audit = snapshot.audit;
        Ok(AuditReport {
            audit_id,
            status: audit.status,
            destination: snapshot.destination,
            blocs: bloc_statuses,
            total_cost: audit.total_cost.unwrap_or_else(|| audit.costs.total()),
            costs: audit.costs,
            results: audit.results,
            logs: entries,
            created_at: audit.created_at,
            updated_at: audit.updated_at,
        })
    }

    /// Candidates of the gate the audit is currently waiting on
    pub async fn candidates(&self, audit_id: Uuid) -> ApiResult<OpenGate> {
        let snapshot = audits::load_snapshot(&self.db, audit_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("audit {}", audit_id)))?;

        let audit = &snapshot.audit;
        let candidates = if snapshot.bloc_status(BlocName::Competitors) == BlocStatus::AwaitingValidation {
            OpenGate {
                audit_id,
                bloc: BlocName::Competitors,
                candidates: GateCandidates::Competitors(
                    audit.competitors().map(|r| r.candidates.clone()).unwrap_or_default(),
                ),
            }
        } else if snapshot.bloc_status(BlocName::KeywordOpportunities)
            == BlocStatus::AwaitingValidation
        {
            OpenGate {
                audit_id,
                bloc: BlocName::KeywordOpportunities,
                candidates: GateCandidates::Keywords(
                    audit
                        .keyword_opportunities()
                        .map(|r| r.candidates.clone())
                        .unwrap_or_default(),
                ),
            }
        } else {
            return Err(ApiError::Conflict(format!(
                "audit {} is not awaiting validation",
                audit_id
            )));
        };

        Ok(candidates)
    }
}
