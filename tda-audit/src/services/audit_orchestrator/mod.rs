//! Audit segment runner
//!
//! Drives one segment of an audit through its bloc steps:
//!
//! - **A**: positioning → digital presence → SEO visibility → keyword candidates (gate 1)
//! - **B**: keyword verification → accommodation stock → activity offer → competitor candidates (gate 2)
//! - **C**: competitor benchmark → audit complete
//!
//! The runner is the only writer of audit and bloc status. Each bloc step is
//! implemented in its own `bloc_*` module on [`ProviderBlocExecutor`]; the
//! runner only sees the [`BlocExecutor`] seam, so tests can substitute it.
//!
//! A bloc failure never stops the segment. Only database failures are fatal:
//! the audit is then marked failed (best effort) and the caller gets a 500.
//! Sub-steps a bloc degraded on are logged as errors even when the bloc
//! finishes done.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tda_common::events::{AuditEvent, EventBus};
use tda_common::Error;
use uuid::Uuid;

use crate::db::{audits, blocs};
use crate::error::{ApiError, ApiResult};
use crate::models::destination::normalize_key;
use crate::models::{
    AuditSnapshot, AuditStatus, BlocName, BlocResult, BlocStatus, BlocStep, CompetitorCandidate,
    CompetitorsResult, CostTracker, KeywordCandidate, KeywordOpportunitiesResult, Segment,
};
use crate::services::audit_logger::AuditLogger;
use crate::services::cost_ledger::record_cost;

mod bloc_accommodation;
mod bloc_activities;
mod bloc_competitors;
mod bloc_digital_presence;
mod bloc_keywords;
mod bloc_positioning;
mod bloc_seo_visibility;
mod executor;
mod llm_json;

pub use executor::{
    BlocContext, BlocExecutor, BlocFailure, BlocLimits, BlocOutput, ProviderBlocExecutor,
    SubStepFailure,
};
pub use llm_json::{parse_llm_json, LlmOutputError};

/// Reviewed candidate list submitted to reopen a validation gate
#[derive(Debug, Clone)]
pub enum GateSelection {
    Keywords(Vec<KeywordCandidate>),
    Competitors(Vec<CompetitorCandidate>),
}

impl GateSelection {
    fn gate(&self) -> BlocName {
        match self {
            GateSelection::Keywords(_) => BlocName::KeywordOpportunities,
            GateSelection::Competitors(_) => BlocName::Competitors,
        }
    }

    /// Reviewed result stored before the resumed phase runs
    ///
    /// The reviewer's list is authoritative for order and `kept`. Items it
    /// does not know are manual additions; proposed candidates it omits are
    /// kept on record as rejected.
    fn reviewed(self, snapshot: &AuditSnapshot) -> BlocResult {
        match self {
            GateSelection::Keywords(items) => {
                let mut result = snapshot
                    .audit
                    .keyword_opportunities()
                    .cloned()
                    .unwrap_or_default();
                result.candidates = merge_reviewed(
                    std::mem::take(&mut result.candidates),
                    items,
                    |k| normalize_key(&k.keyword),
                    |k| k.kept = false,
                    |k| {
                        k.keyword = k.keyword.trim().to_string();
                        if k.source.is_empty() {
                            k.source = "manual".to_string();
                        }
                    },
                );
                result.verified.clear();
                BlocResult::KeywordOpportunities(result)
            }
            GateSelection::Competitors(items) => {
                let mut result = snapshot.audit.competitors().cloned().unwrap_or_default();
                result.candidates = merge_reviewed(
                    std::mem::take(&mut result.candidates),
                    items,
                    |c| normalize_key(&c.name),
                    |c| c.kept = false,
                    |c| c.name = c.name.trim().to_string(),
                );
                result.benchmarks.clear();
                result.comparison = None;
                BlocResult::Competitors(result)
            }
        }
    }
}

/// Kept candidates of a reviewed gate result
fn kept_count(result: &BlocResult) -> usize {
    match result {
        BlocResult::KeywordOpportunities(r) => r.candidates.iter().filter(|k| k.kept).count(),
        BlocResult::Competitors(r) => r.candidates.iter().filter(|c| c.kept).count(),
        _ => 0,
    }
}

fn merge_reviewed<T>(
    proposed: Vec<T>,
    reviewed: Vec<T>,
    key: impl Fn(&T) -> String,
    reject: impl Fn(&mut T),
    tidy: impl Fn(&mut T),
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(proposed.len().max(reviewed.len()));

    for mut item in reviewed {
        tidy(&mut item);
        let k = key(&item);
        if !k.is_empty() && seen.insert(k) {
            merged.push(item);
        }
    }
    for mut item in proposed {
        if seen.insert(key(&item)) {
            reject(&mut item);
            merged.push(item);
        }
    }
    merged
}

/// State returned to the caller after a segment invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentOutcome {
    pub audit_id: Uuid,
    pub segment: Segment,
    #[serde(rename = "status")]
    pub audit_status: AuditStatus,
    /// True when the segment had already been triggered and nothing ran
    pub already_started: bool,
    /// Gate opened by this segment, or its last bloc
    pub bloc: BlocName,
    pub bloc_status: BlocStatus,
    #[serde(default)]
    pub failed_blocs: Vec<BlocName>,
    /// Ledger total, set once the audit is complete
    pub total_cost: Option<f64>,
}

enum StepOutcome {
    Done,
    Failed,
    Gated,
    Skipped,
}

pub struct SegmentRunner {
    db: SqlitePool,
    event_bus: EventBus,
    logger: AuditLogger,
    executor: Arc<dyn BlocExecutor>,
}

impl SegmentRunner {
    pub fn new(db: SqlitePool, event_bus: EventBus, executor: Arc<dyn BlocExecutor>) -> Self {
        let logger = AuditLogger::new(db.clone(), event_bus.clone());
        Self {
            db,
            event_bus,
            logger,
            executor,
        }
    }

    /// Run `segment` for `audit_id`
    ///
    /// Segments B and C require the `selection` for their entry gate.
    pub async fn run(
        &self,
        audit_id: Uuid,
        segment: Segment,
        selection: Option<GateSelection>,
    ) -> ApiResult<SegmentOutcome> {
        let snapshot = audits::load_snapshot(&self.db, audit_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("audit {}", audit_id)))?;

        match segment.entry_gate() {
            None => {
                if !self.claim_first_bloc(audit_id, segment).await? {
                    tracing::info!(
                        audit_id = %audit_id,
                        segment = %segment,
                        "Segment already started, returning current state"
                    );
                    let snapshot = audits::load_snapshot(&self.db, audit_id)
                        .await?
                        .ok_or_else(|| ApiError::NotFound(format!("audit {}", audit_id)))?;
                    return Ok(self.current_state(&snapshot, segment));
                }
            }
            Some(gate) => self.open_gate(&snapshot, segment, gate, selection).await?,
        }

        match self.run_steps(audit_id, segment).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail_audit(audit_id, segment, &e).await;
                Err(ApiError::Internal(format!(
                    "segment {} of audit {} aborted: {}",
                    segment, audit_id, e
                )))
            }
        }
    }

    /// Validate and pass the entry gate of a resumed segment
    ///
    /// Nothing is written unless the gate is open and the selection is usable.
    async fn open_gate(
        &self,
        snapshot: &AuditSnapshot,
        segment: Segment,
        gate: BlocName,
        selection: Option<GateSelection>,
    ) -> ApiResult<()> {
        let audit_id = snapshot.audit.audit_id;

        let gate_status = snapshot.bloc_status(gate);
        if gate_status != BlocStatus::AwaitingValidation {
            return Err(ApiError::Conflict(format!(
                "bloc {} is {}, segment {} needs it awaiting validation",
                gate, gate_status, segment
            )));
        }

        let selection = match selection {
            Some(selection) if selection.gate() == gate => selection,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "segment {} needs the reviewed {} candidates",
                    segment, gate
                )))
            }
        };
        // Blank and duplicate entries are dropped before counting
        let reviewed = selection.reviewed(snapshot);
        let kept = kept_count(&reviewed);
        if kept == 0 {
            return Err(ApiError::BadRequest(
                "at least one candidate must be kept".to_string(),
            ));
        }

        let passed = blocs::transition(
            &self.db,
            audit_id,
            gate,
            BlocStatus::AwaitingValidation,
            BlocStatus::Running,
        )
        .await?;
        if !passed {
            return Err(ApiError::Conflict(format!(
                "bloc {} left awaiting validation concurrently",
                gate
            )));
        }
        self.emit_bloc_status(audit_id, gate, BlocStatus::AwaitingValidation, BlocStatus::Running);

        audits::save_result(&self.db, audit_id, &reviewed).await?;
        audits::update_status(&self.db, audit_id, AuditStatus::Running).await?;

        self.logger
            .info(
                audit_id,
                Some(gate.as_str()),
                "Validation gate passed",
                json!({
                    "segment": segment.to_string(),
                    "candidates": reviewed.candidate_count(),
                    "kept": kept,
                }),
            )
            .await;
        Ok(())
    }

    /// Claim the first bloc of an unguarded segment
    ///
    /// The bloc compare-and-swap is the segment's start guard: a second
    /// trigger finds the bloc past pending and runs nothing.
    async fn claim_first_bloc(&self, audit_id: Uuid, segment: Segment) -> Result<bool, Error> {
        let first = segment.steps()[0].bloc;
        let claimed =
            blocs::transition(&self.db, audit_id, first, BlocStatus::Pending, BlocStatus::Running)
                .await?;
        if claimed {
            self.emit_bloc_status(audit_id, first, BlocStatus::Pending, BlocStatus::Running);
        }
        Ok(claimed)
    }

    async fn run_steps(&self, audit_id: Uuid, segment: Segment) -> Result<SegmentOutcome, Error> {
        let started = Instant::now();
        let mut failed_blocs = Vec::new();
        let mut last = segment.steps()[0].bloc;
        let mut last_status = BlocStatus::Pending;

        self.event_bus.emit_lossy(AuditEvent::SegmentStarted {
            audit_id,
            segment: segment.to_string(),
            timestamp: Utc::now(),
        });
        self.logger
            .info(
                audit_id,
                None,
                &format!("Segment {} started", segment),
                json!({ "segment": segment.to_string() }),
            )
            .await;

        for (index, step) in segment.steps().iter().enumerate() {
            // The first bloc was claimed by the start guard or the gate
            let claimed = index == 0;
            last = step.bloc;

            match self.run_step(audit_id, *step, claimed).await? {
                StepOutcome::Done => last_status = BlocStatus::Done,
                StepOutcome::Failed => {
                    last_status = BlocStatus::Error;
                    failed_blocs.push(step.bloc);
                }
                StepOutcome::Skipped => {}
                StepOutcome::Gated => {
                    last_status = BlocStatus::AwaitingValidation;
                    break;
                }
            }
        }

        let (audit_status, total_cost) = if segment.completes_audit() {
            let ledger = audits::load_costs(&self.db, audit_id).await?;
            let total = ledger.total();
            audits::complete_audit(&self.db, audit_id, total).await?;
            self.event_bus.emit_lossy(AuditEvent::AuditCompleted {
                audit_id,
                total_cost: total,
                timestamp: Utc::now(),
            });
            (AuditStatus::Complete, Some(total))
        } else {
            audits::update_status(&self.db, audit_id, AuditStatus::AwaitingSegment).await?;
            (AuditStatus::AwaitingSegment, None)
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.event_bus.emit_lossy(AuditEvent::SegmentCompleted {
            audit_id,
            segment: segment.to_string(),
            audit_status: audit_status.to_string(),
            failed_blocs: failed_blocs.iter().map(|b: &BlocName| b.to_string()).collect(),
            duration_ms,
            timestamp: Utc::now(),
        });
        self.logger
            .info(
                audit_id,
                None,
                &format!("Segment {} finished", segment),
                json!({
                    "segment": segment.to_string(),
                    "audit_status": audit_status,
                    "failed_blocs": failed_blocs,
                    "duration_ms": duration_ms,
                    "total_cost": total_cost,
                }),
            )
            .await;

        Ok(SegmentOutcome {
            audit_id,
            segment,
            audit_status,
            already_started: false,
            bloc: segment.exit_gate().unwrap_or(last),
            bloc_status: last_status,
            failed_blocs,
            total_cost,
        })
    }

    async fn run_step(&self, audit_id: Uuid, step: BlocStep, claimed: bool) -> Result<StepOutcome, Error> {
        let bloc = step.bloc;
        let snapshot = audits::load_snapshot(&self.db, audit_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("audit {}", audit_id)))?;

        if !claimed {
            let moved =
                blocs::transition(&self.db, audit_id, bloc, BlocStatus::Pending, BlocStatus::Running)
                    .await?;
            if !moved {
                tracing::warn!(
                    audit_id = %audit_id,
                    bloc = %bloc,
                    status = %snapshot.bloc_status(bloc),
                    "Bloc already claimed, skipping"
                );
                return Ok(StepOutcome::Skipped);
            }
            self.emit_bloc_status(audit_id, bloc, BlocStatus::Pending, BlocStatus::Running);
        }

        let ctx = BlocContext { snapshot };
        let inputs = ctx.inputs(&step);
        self.logger
            .info(
                audit_id,
                Some(bloc.as_str()),
                &format!("Bloc {} ({}) started", bloc.number(), step.phase),
                json!({ "phase": step.phase, "inputs": inputs }),
            )
            .await;

        let costs = CostTracker::new();
        let result = self.executor.execute(step, &ctx, &costs).await;
        let cost = costs.snapshot();
        record_cost(&self.db, audit_id, &step.ledger_key(), &cost).await;

        match result {
            Ok(BlocOutput { result, degraded }) => {
                for sub in &degraded {
                    self.log_degraded(audit_id, step, sub).await;
                }
                audits::save_result(&self.db, audit_id, &result).await?;
                if step.opens_gate {
                    self.await_validation(audit_id, bloc, result.candidate_count())
                        .await?;
                    return Ok(StepOutcome::Gated);
                }
                self.set_bloc(audit_id, bloc, BlocStatus::Running, BlocStatus::Done)
                    .await?;
                self.logger
                    .info(
                        audit_id,
                        Some(bloc.as_str()),
                        &format!("Bloc {} ({}) done", bloc.number(), step.phase),
                        json!({
                            "phase": step.phase,
                            "calls": cost.provider_calls(),
                            "cost": cost.total_cost(),
                            "degraded": degraded.len(),
                        }),
                    )
                    .await;
                Ok(StepOutcome::Done)
            }
            Err(failure) => {
                self.logger
                    .error(
                        audit_id,
                        Some(bloc.as_str()),
                        &format!("Bloc {} ({}) failed", bloc.number(), step.phase),
                        json!({
                            "bloc": bloc,
                            "phase": step.phase,
                            "inputs": inputs,
                            "error": failure.to_string(),
                            "cause_chain": failure.cause_chain(),
                            "cost": cost,
                        }),
                    )
                    .await;

                if step.opens_gate {
                    // Reviewer can still add manual candidates
                    if let Some(empty) = empty_gate_result(bloc) {
                        audits::save_result(&self.db, audit_id, &empty).await?;
                    }
                    self.await_validation(audit_id, bloc, 0).await?;
                    return Ok(StepOutcome::Gated);
                }
                self.set_bloc(audit_id, bloc, BlocStatus::Running, BlocStatus::Error)
                    .await?;
                Ok(StepOutcome::Failed)
            }
        }
    }

    async fn log_degraded(&self, audit_id: Uuid, step: BlocStep, sub: &SubStepFailure) {
        let bloc = step.bloc;
        self.logger
            .error(
                audit_id,
                Some(bloc.as_str()),
                &format!("Bloc {} ({}) sub-step {} failed", bloc.number(), step.phase, sub.step),
                json!({
                    "bloc": bloc,
                    "phase": step.phase,
                    "step": sub.step,
                    "input": sub.input,
                    "error": sub.failure.to_string(),
                    "cause_chain": sub.failure.cause_chain(),
                }),
            )
            .await;
    }

    async fn await_validation(
        &self,
        audit_id: Uuid,
        bloc: BlocName,
        candidate_count: usize,
    ) -> Result<(), Error> {
        self.set_bloc(audit_id, bloc, BlocStatus::Running, BlocStatus::AwaitingValidation)
            .await?;
        self.event_bus.emit_lossy(AuditEvent::AwaitingValidation {
            audit_id,
            bloc: bloc.to_string(),
            candidate_count,
            timestamp: Utc::now(),
        });
        self.logger
            .info(
                audit_id,
                Some(bloc.as_str()),
                "Awaiting validation",
                json!({ "candidates": candidate_count }),
            )
            .await;
        Ok(())
    }

    async fn set_bloc(
        &self,
        audit_id: Uuid,
        bloc: BlocName,
        from: BlocStatus,
        to: BlocStatus,
    ) -> Result<(), Error> {
        if !blocs::transition(&self.db, audit_id, bloc, from, to).await? {
            return Err(Error::Internal(format!(
                "bloc {} was no longer {} when moving to {}",
                bloc, from, to
            )));
        }
        self.emit_bloc_status(audit_id, bloc, from, to);
        Ok(())
    }

    fn emit_bloc_status(&self, audit_id: Uuid, bloc: BlocName, from: BlocStatus, to: BlocStatus) {
        self.event_bus.emit_lossy(AuditEvent::BlocStatusChanged {
            audit_id,
            bloc: bloc.to_string(),
            old_status: from.to_string(),
            new_status: to.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn fail_audit(&self, audit_id: Uuid, segment: Segment, error: &Error) {
        tracing::error!(
            audit_id = %audit_id,
            segment = %segment,
            error = %error,
            "Segment aborted, marking audit failed"
        );
        if let Err(e) = audits::update_status(&self.db, audit_id, AuditStatus::Failed).await {
            tracing::warn!(audit_id = %audit_id, error = %e, "Could not mark audit failed");
        }
        self.event_bus.emit_lossy(AuditEvent::AuditFailed {
            audit_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn current_state(&self, snapshot: &AuditSnapshot, segment: Segment) -> SegmentOutcome {
        let bloc = segment
            .exit_gate()
            .or_else(|| segment.steps().last().map(|s| s.bloc))
            .unwrap_or(BlocName::Positioning);
        let failed_blocs = segment
            .steps()
            .iter()
            .map(|s| s.bloc)
            .filter(|b| snapshot.bloc_status(*b) == BlocStatus::Error)
            .collect();

        SegmentOutcome {
            audit_id: snapshot.audit.audit_id,
            segment,
            audit_status: snapshot.audit.status,
            already_started: true,
            bloc,
            bloc_status: snapshot.bloc_status(bloc),
            failed_blocs,
            total_cost: snapshot.audit.total_cost,
        }
    }
}

fn empty_gate_result(bloc: BlocName) -> Option<BlocResult> {
    match bloc {
        BlocName::KeywordOpportunities => Some(BlocResult::KeywordOpportunities(
            KeywordOpportunitiesResult::default(),
        )),
        BlocName::Competitors => Some(BlocResult::Competitors(CompetitorsResult::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{destinations, init_memory_pool};
    use crate::models::{Audit, BlocPhase, DestinationRequest, PositioningResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor that records every step and fails the listed blocs
    struct StubExecutor {
        fail: Vec<BlocName>,
        calls: Mutex<Vec<(BlocName, BlocPhase)>>,
    }

    impl StubExecutor {
        fn new(fail: Vec<BlocName>) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(BlocName, BlocPhase)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlocExecutor for StubExecutor {
        async fn execute(
            &self,
            step: BlocStep,
            ctx: &BlocContext,
            costs: &CostTracker,
        ) -> Result<BlocOutput, BlocFailure> {
            self.calls.lock().unwrap().push((step.bloc, step.phase));
            costs.charge("stub", 0.01);
            if self.fail.contains(&step.bloc) {
                return Err(BlocFailure::MissingInput("stubbed failure".to_string()));
            }
            let audit = &ctx.snapshot.audit;
            Ok(match (step.bloc, step.phase) {
                (BlocName::KeywordOpportunities, BlocPhase::A) => {
                    BlocResult::KeywordOpportunities(KeywordOpportunitiesResult {
                        candidates: vec![KeywordCandidate {
                            keyword: "lac annecy".to_string(),
                            search_volume: Some(100),
                            source: "seo".to_string(),
                            kept: true,
                        }],
                        verified: Vec::new(),
                    })
                }
                (BlocName::KeywordOpportunities, _) => BlocResult::KeywordOpportunities(
                    audit.keyword_opportunities().cloned().unwrap_or_default(),
                ),
                (BlocName::Competitors, _) => BlocResult::Competitors(
                    audit.competitors().cloned().unwrap_or_default(),
                ),
                (BlocName::DigitalPresence, _) => {
                    BlocResult::DigitalPresence(Default::default())
                }
                (BlocName::SeoVisibility, _) => BlocResult::SeoVisibility(Default::default()),
                (BlocName::AccommodationStock, _) => {
                    BlocResult::AccommodationStock(Default::default())
                }
                (BlocName::ActivityOffer, _) => BlocResult::ActivityOffer(Default::default()),
                (BlocName::Positioning, _) => BlocResult::Positioning(PositioningResult::default()),
            }
            .into())
        }
    }

    async fn setup(executor: Arc<StubExecutor>) -> (SegmentRunner, Uuid) {
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
        audits::insert_audit(&pool, &audit).await.unwrap();
        blocs::init_blocs(&pool, audit.audit_id).await.unwrap();

        let runner = SegmentRunner::new(pool, EventBus::new(64), executor);
        (runner, audit.audit_id)
    }

    #[tokio::test]
    async fn segment_a_reaches_gate_despite_failures() {
        let executor = StubExecutor::new(vec![BlocName::DigitalPresence]);
        let (runner, audit_id) = setup(executor.clone()).await;

        let outcome = runner.run(audit_id, Segment::A, None).await.unwrap();
        assert_eq!(outcome.audit_status, AuditStatus::AwaitingSegment);
        assert_eq!(outcome.bloc, BlocName::KeywordOpportunities);
        assert_eq!(outcome.bloc_status, BlocStatus::AwaitingValidation);
        assert_eq!(outcome.failed_blocs, vec![BlocName::DigitalPresence]);
        assert_eq!(executor.calls().len(), 4);

        let statuses = blocs::load_bloc_statuses(&runner.db, audit_id).await.unwrap();
        assert_eq!(statuses[&BlocName::Positioning], BlocStatus::Done);
        assert_eq!(statuses[&BlocName::DigitalPresence], BlocStatus::Error);

        let ledger = audits::load_costs(&runner.db, audit_id).await.unwrap();
        assert!(ledger.get("digital_presence").is_some());
        assert!(ledger.get("keyword_opportunities.a").is_some());
    }

    #[tokio::test]
    async fn failed_gate_step_still_opens_gate_with_empty_list() {
        let executor = StubExecutor::new(vec![BlocName::KeywordOpportunities]);
        let (runner, audit_id) = setup(executor).await;

        let outcome = runner.run(audit_id, Segment::A, None).await.unwrap();
        assert_eq!(outcome.bloc_status, BlocStatus::AwaitingValidation);

        let audit = audits::load_audit(&runner.db, audit_id).await.unwrap().unwrap();
        assert!(audit.keyword_opportunities().unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn retriggering_segment_a_does_not_execute_again() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;

        runner.run(audit_id, Segment::A, None).await.unwrap();
        let again = runner.run(audit_id, Segment::A, None).await.unwrap();

        assert!(again.already_started);
        assert_eq!(again.bloc_status, BlocStatus::AwaitingValidation);
        assert_eq!(executor.calls().len(), 4);
    }

    #[tokio::test]
    async fn resume_before_gate_conflicts_without_side_effects() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;

        let selection = GateSelection::Keywords(vec![KeywordCandidate {
            keyword: "ski".to_string(),
            search_volume: None,
            source: "manual".to_string(),
            kept: true,
        }]);
        let err = runner
            .run(audit_id, Segment::B, Some(selection))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(executor.calls().is_empty());

        let audit = audits::load_audit(&runner.db, audit_id).await.unwrap().unwrap();
        assert_eq!(audit.status, AuditStatus::Running);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;
        runner.run(audit_id, Segment::A, None).await.unwrap();

        let selection = GateSelection::Keywords(vec![KeywordCandidate {
            keyword: "lac annecy".to_string(),
            search_volume: None,
            source: "seo".to_string(),
            kept: false,
        }]);
        let err = runner
            .run(audit_id, Segment::B, Some(selection))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let statuses = blocs::load_bloc_statuses(&runner.db, audit_id).await.unwrap();
        assert_eq!(
            statuses[&BlocName::KeywordOpportunities],
            BlocStatus::AwaitingValidation
        );
    }

    fn keyword(keyword: &str, kept: bool) -> KeywordCandidate {
        KeywordCandidate {
            keyword: keyword.to_string(),
            search_volume: None,
            source: "manual".to_string(),
            kept,
        }
    }

    #[tokio::test]
    async fn blank_kept_keywords_do_not_pass_gate_one() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;
        runner.run(audit_id, Segment::A, None).await.unwrap();

        let selection = GateSelection::Keywords(vec![
            keyword("   ", true),
            keyword("", true),
            keyword("lac annecy", false),
        ]);
        let err = runner
            .run(audit_id, Segment::B, Some(selection))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(executor.calls().len(), 4);

        let statuses = blocs::load_bloc_statuses(&runner.db, audit_id).await.unwrap();
        assert_eq!(
            statuses[&BlocName::KeywordOpportunities],
            BlocStatus::AwaitingValidation
        );
        let audit = audits::load_audit(&runner.db, audit_id).await.unwrap().unwrap();
        assert_eq!(audit.status, AuditStatus::AwaitingSegment);
        let candidates = &audit.keyword_opportunities().unwrap().candidates;
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].kept);
    }

    #[tokio::test]
    async fn blank_kept_competitors_do_not_pass_gate_two() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;
        runner.run(audit_id, Segment::A, None).await.unwrap();
        runner
            .run(
                audit_id,
                Segment::B,
                Some(GateSelection::Keywords(vec![keyword("lac annecy", true)])),
            )
            .await
            .unwrap();
        let calls_before = executor.calls().len();

        let blank = |name: &str| CompetitorCandidate {
            name: name.to_string(),
            country: None,
            website: Some("chamonix.com".to_string()),
            rationale: None,
            kept: true,
        };
        let selection = GateSelection::Competitors(vec![blank("  "), blank("\t")]);
        let err = runner
            .run(audit_id, Segment::C, Some(selection))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(executor.calls().len(), calls_before);

        let statuses = blocs::load_bloc_statuses(&runner.db, audit_id).await.unwrap();
        assert_eq!(statuses[&BlocName::Competitors], BlocStatus::AwaitingValidation);
    }

    #[tokio::test]
    async fn concurrent_segment_a_triggers_run_once() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;

        let (first, second) = tokio::join!(
            runner.run(audit_id, Segment::A, None),
            runner.run(audit_id, Segment::A, None)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.already_started != second.already_started);
        assert_eq!(executor.calls().len(), 4);
    }

    #[tokio::test]
    async fn reviewed_list_keeps_manual_additions_and_rejections() {
        let executor = StubExecutor::new(Vec::new());
        let (runner, audit_id) = setup(executor.clone()).await;
        runner.run(audit_id, Segment::A, None).await.unwrap();

        let selection = GateSelection::Keywords(vec![KeywordCandidate {
            keyword: " paddle annecy ".to_string(),
            search_volume: None,
            source: String::new(),
            kept: true,
        }]);
        let outcome = runner
            .run(audit_id, Segment::B, Some(selection))
            .await
            .unwrap();
        assert_eq!(outcome.bloc, BlocName::Competitors);

        let audit = audits::load_audit(&runner.db, audit_id).await.unwrap().unwrap();
        let candidates = &audit.keyword_opportunities().unwrap().candidates;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].keyword, "paddle annecy");
        assert_eq!(candidates[0].source, "manual");
        assert!(candidates[0].kept);
        assert_eq!(candidates[1].keyword, "lac annecy");
        assert!(!candidates[1].kept);
    }
}
