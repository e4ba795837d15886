//! Pipeline integration tests
//!
//! Full audits against scripted providers and an in-memory database.

mod helpers;

use async_trait::async_trait;
use helpers::{annecy_request, test_config, test_pipeline, Fakes};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tda_audit::config::PipelineConfig;
use tda_audit::db::blocs;
use tda_audit::models::{
    AuditStatus, BlocName, BlocResult, BlocStatus, BlocStep, CompetitorCandidate, CostTracker,
    KeywordCandidate, LogLevel,
};
use tda_audit::services::audit_pipeline::StartAuditRequest;
use tda_audit::services::providers::Providers;
use tda_audit::services::{AuditPipeline, BlocContext, BlocExecutor, BlocFailure, BlocOutput};
use tda_audit::ApiError;
use tda_common::events::EventBus;
use uuid::Uuid;

fn start_request(force: bool) -> StartAuditRequest {
    let mut body = annecy_request();
    body["force"] = json!(force);
    serde_json::from_value(body).unwrap()
}

fn keep_keyword(keyword: &str) -> KeywordCandidate {
    KeywordCandidate {
        keyword: keyword.to_string(),
        search_volume: None,
        source: "seo".to_string(),
        kept: true,
    }
}

fn keep_competitor(name: &str, website: &str) -> CompetitorCandidate {
    CompetitorCandidate {
        name: name.to_string(),
        country: Some("France".to_string()),
        website: Some(website.to_string()),
        rationale: None,
        kept: true,
    }
}

#[tokio::test]
async fn test_full_audit_reaches_completion() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;

    let started = pipeline.start_audit(start_request(false)).await.unwrap();
    assert!(!started.reset);
    let audit_id = started.audit_id;

    // Segment A: social provider fails, bloc 2 still completes on domain metrics
    let a = pipeline.run_segment_a(audit_id).await.unwrap();
    assert_eq!(a.audit_status, AuditStatus::AwaitingSegment);
    assert_eq!(a.bloc, BlocName::KeywordOpportunities);
    assert_eq!(a.bloc_status, BlocStatus::AwaitingValidation);
    assert!(a.failed_blocs.is_empty());
    assert_eq!(fakes.social.calls.load(Ordering::SeqCst), 1);

    let report = pipeline.status(audit_id, Some(500)).await.unwrap();
    assert_eq!(report.blocs[&BlocName::DigitalPresence], BlocStatus::Done);
    // The failed social lookup is logged as an error with its input and cause
    let degraded = report
        .logs
        .iter()
        .find(|l| l.bloc.as_deref() == Some("digital_presence") && l.level == LogLevel::Error)
        .expect("error log entry for the social lookup");
    assert_eq!(degraded.detail["step"], "social_insights");
    assert_eq!(degraded.detail["input"]["handle"], "annecy_tourisme");
    assert!(degraded.detail["cause_chain"].as_array().unwrap().len() >= 2);
    assert!(degraded.detail["cause_chain"][1]
        .as_str()
        .unwrap()
        .contains("login wall"));
    match &report.results[&BlocName::Positioning] {
        BlocResult::Positioning(p) => {
            assert_eq!(p.detected_domain.as_deref(), Some("annecy-tourisme.com"));
            assert_eq!(p.domain_source.as_deref(), Some("llm"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    match &report.results[&BlocName::KeywordOpportunities] {
        BlocResult::KeywordOpportunities(k) => {
            // "Lac d'Annecy" from the model duplicates the SEO idea
            assert_eq!(k.candidates.len(), 3);
            assert_eq!(k.candidates[0].keyword, "lac d'annecy");
        }
        other => panic!("unexpected result {:?}", other),
    }

    // Segment B with a single kept keyword
    let b = pipeline
        .resume_segment_b(audit_id, vec![keep_keyword("lac d'annecy")])
        .await
        .unwrap();
    assert_eq!(b.bloc, BlocName::Competitors);
    assert_eq!(b.bloc_status, BlocStatus::AwaitingValidation);
    assert_eq!(fakes.browser.launches.load(Ordering::SeqCst), 2);
    assert_eq!(fakes.browser.closes.load(Ordering::SeqCst), 2);

    let report = pipeline.status(audit_id, None).await.unwrap();
    match &report.results[&BlocName::KeywordOpportunities] {
        BlocResult::KeywordOpportunities(k) => {
            assert_eq!(k.verified.len(), 1);
            assert_eq!(k.verified[0].keyword, "lac d'annecy");
            assert_eq!(k.verified[0].position, Some(3));
            assert_eq!(k.kept().count(), 1);
        }
        other => panic!("unexpected result {:?}", other),
    }
    match &report.results[&BlocName::AccommodationStock] {
        BlocResult::AccommodationStock(s) => {
            assert_eq!(s.rentals.as_ref().unwrap().total, 42);
            assert!(s.hotels.as_ref().unwrap().is_exact());
        }
        other => panic!("unexpected result {:?}", other),
    }

    // Segment C with one competitor known only by the secondary SEO provider
    let c = pipeline
        .resume_segment_c(audit_id, vec![keep_competitor("Chamonix", "https://chamonix.com")])
        .await
        .unwrap();
    assert_eq!(c.audit_status, AuditStatus::Complete);
    let total = c.total_cost.unwrap();
    assert!(total > 0.0);

    let report = pipeline.status(audit_id, None).await.unwrap();
    assert_eq!(report.status, AuditStatus::Complete);
    assert!((report.total_cost - report.costs.total()).abs() < 1e-9);
    for key in ["positioning", "seo_visibility", "competitors.a", "competitors.b"] {
        let entry = report.costs.get(key).unwrap_or_else(|| panic!("missing {}", key));
        assert!(entry.total_cost() > 0.0, "{} has no cost", key);
    }

    // primary(chamonix.com) + primary(www.chamonix.com) + secondary(chamonix.com)
    let benchmark_seo = report.costs.get("competitors.b").unwrap();
    assert_eq!(benchmark_seo.providers["seo_primary"].provider_calls, 2);
    assert_eq!(benchmark_seo.providers["seo_secondary"].provider_calls, 1);

    match &report.results[&BlocName::Competitors] {
        BlocResult::Competitors(r) => {
            assert_eq!(r.benchmarks.len(), 1);
            assert!(r.benchmarks[0].metrics.is_some());
            assert!(r.comparison.is_some());
            // Rejected proposal stays on record
            assert_eq!(r.candidates.len(), 2);
            assert_eq!(r.kept().count(), 1);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_start_is_rejected_unless_forced() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;

    let first = pipeline.start_audit(start_request(false)).await.unwrap();
    pipeline.run_segment_a(first.audit_id).await.unwrap();

    match pipeline.start_audit(start_request(false)).await {
        Err(ApiError::Duplicate { audit_id }) => assert_eq!(audit_id, first.audit_id),
        other => panic!("expected duplicate, got {:?}", other.map(|s| s.audit_id)),
    }

    let forced = pipeline.start_audit(start_request(true)).await.unwrap();
    assert!(forced.reset);
    assert_eq!(forced.audit_id, first.audit_id);

    let report = pipeline.status(forced.audit_id, None).await.unwrap();
    assert_eq!(report.status, AuditStatus::Running);
    assert!(report.results.is_empty());
    assert!(report.costs.is_empty());
    assert!(report.blocs.values().all(|s| *s == BlocStatus::Pending));
    // Log history survives the reset
    assert!(report.logs.iter().any(|l| l.message == "Audit reset"));
}

#[tokio::test]
async fn test_retriggering_segment_a_never_calls_providers() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;

    pipeline.run_segment_a(audit_id).await.unwrap();
    let calls = fakes.total_calls();
    let costs = pipeline.status(audit_id, None).await.unwrap().costs;

    let again = pipeline.run_segment_a(audit_id).await.unwrap();
    assert!(again.already_started);
    assert_eq!(again.bloc_status, BlocStatus::AwaitingValidation);
    assert_eq!(fakes.total_calls(), calls);
    assert_eq!(pipeline.status(audit_id, None).await.unwrap().costs, costs);
}

#[tokio::test]
async fn test_resume_without_open_gate_conflicts_and_mutates_nothing() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;

    let before = pipeline.status(audit_id, None).await.unwrap();
    let err = pipeline
        .resume_segment_b(audit_id, vec![keep_keyword("ski")])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let err = pipeline
        .resume_segment_c(audit_id, vec![keep_competitor("Chamonix", "chamonix.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let after = pipeline.status(audit_id, None).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.blocs, before.blocs);
    assert_eq!(after.logs.len(), before.logs.len());
    assert_eq!(fakes.total_calls(), 0);
}

#[tokio::test]
async fn test_segment_c_before_gate_two_conflicts() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;
    pipeline.run_segment_a(audit_id).await.unwrap();

    let err = pipeline
        .resume_segment_c(audit_id, vec![keep_competitor("Chamonix", "chamonix.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    // Gate 1 is still open
    let gate = pipeline.candidates(audit_id).await.unwrap();
    assert_eq!(gate.bloc, BlocName::KeywordOpportunities);
}

#[tokio::test]
async fn test_empty_selection_is_a_validation_error() {
    let fakes = Fakes::new();
    let (pipeline, pool, _bus) = test_pipeline(fakes.providers()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;
    pipeline.run_segment_a(audit_id).await.unwrap();

    let err = pipeline.resume_segment_b(audit_id, Vec::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let statuses = blocs::load_bloc_statuses(&pool, audit_id).await.unwrap();
    assert_eq!(
        statuses[&BlocName::KeywordOpportunities],
        BlocStatus::AwaitingValidation
    );
}

#[tokio::test]
async fn test_unreachable_providers_still_reach_every_gate() {
    let (pipeline, _pool, _bus) = test_pipeline(Providers::unconfigured()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;

    let a = pipeline.run_segment_a(audit_id).await.unwrap();
    assert_eq!(a.bloc_status, BlocStatus::AwaitingValidation);
    assert_eq!(
        a.failed_blocs,
        vec![
            BlocName::Positioning,
            BlocName::DigitalPresence,
            BlocName::SeoVisibility
        ]
    );

    // Gate opened on an empty list; the reviewer adds a keyword by hand
    let gate = pipeline.candidates(audit_id).await.unwrap();
    assert_eq!(serde_json::to_value(&gate.candidates).unwrap(), json!([]));

    let b = pipeline
        .resume_segment_b(audit_id, vec![keep_keyword("annecy hiking")])
        .await
        .unwrap();
    assert_eq!(b.bloc_status, BlocStatus::AwaitingValidation);
    // No domain: keyword verification completes unchecked; listings and synthesis fail
    assert_eq!(
        b.failed_blocs,
        vec![BlocName::AccommodationStock, BlocName::ActivityOffer]
    );

    let c = pipeline
        .resume_segment_c(audit_id, vec![keep_competitor("Chamonix", "chamonix.com")])
        .await
        .unwrap();
    assert_eq!(c.audit_status, AuditStatus::Complete);
    assert_eq!(c.failed_blocs, vec![BlocName::Competitors]);

    // Failures were logged with their inputs and cause chain
    let report = pipeline.status(audit_id, Some(500)).await.unwrap();
    let failure = report
        .logs
        .iter()
        .find(|l| l.bloc.as_deref() == Some("seo_visibility") && l.message.contains("failed"))
        .unwrap();
    assert!(failure.detail["cause_chain"].as_array().unwrap().len() >= 1);
    assert!(failure.detail.get("inputs").is_some());

    // Nothing was dispatched, so nothing was counted or priced
    assert!(report.costs.entries.values().all(|c| c.provider_calls() == 0));
    assert_eq!(report.costs.total(), 0.0);
}

#[tokio::test]
async fn test_status_returns_most_recent_logs_in_order() {
    let fakes = Fakes::new();
    let (pipeline, _pool, _bus) = test_pipeline(fakes.providers()).await;
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;
    pipeline.run_segment_a(audit_id).await.unwrap();

    let all = pipeline.status(audit_id, Some(1000)).await.unwrap().logs;
    let last_three = pipeline.status(audit_id, Some(3)).await.unwrap().logs;

    assert_eq!(last_three.len(), 3);
    let tail: Vec<i64> = all[all.len() - 3..].iter().map(|l| l.log_id).collect();
    let ids: Vec<i64> = last_three.iter().map(|l| l.log_id).collect();
    assert_eq!(ids, tail);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_unknown_audit_is_not_found() {
    let (pipeline, _pool, _bus) = test_pipeline(Providers::unconfigured()).await;
    let missing = Uuid::new_v4();

    assert!(matches!(
        pipeline.run_segment_a(missing).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(matches!(
        pipeline.status(missing, None).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_events_are_broadcast_for_segment_progress() {
    let fakes = Fakes::new();
    let (pipeline, _pool, bus) = test_pipeline(fakes.providers()).await;
    let mut rx = bus.subscribe();

    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;
    pipeline.run_segment_a(audit_id).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.audit_id(), audit_id);
        kinds.push(event.event_type());
    }
    assert_eq!(kinds.first(), Some(&"AuditStarted"));
    assert!(kinds.contains(&"SegmentStarted"));
    assert!(kinds.contains(&"BlocStatusChanged"));
    assert!(kinds.contains(&"AwaitingValidation"));
    assert_eq!(kinds.last(), Some(&"AuditLogAppended"));
    assert!(kinds.contains(&"SegmentCompleted"));
}

/// Executor that never finishes a bloc in time
struct SlowExecutor;

#[async_trait]
impl BlocExecutor for SlowExecutor {
    async fn execute(
        &self,
        _step: BlocStep,
        _ctx: &BlocContext,
        _costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(BlocFailure::MissingInput("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_segment_ceiling_reports_timeout() {
    let pool = helpers::memory_pool().await;
    let config = PipelineConfig {
        segment_a_timeout_secs: 1,
        ..test_config().pipeline
    };
    let pipeline = AuditPipeline::with_executor(
        pool.clone(),
        EventBus::new(16),
        Arc::new(SlowExecutor),
        config,
    );
    let audit_id = pipeline.start_audit(start_request(false)).await.unwrap().audit_id;

    let err = pipeline.run_segment_a(audit_id).await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }));

    // Committed claim on bloc 1 survives; a re-trigger returns the current state
    let again = pipeline.run_segment_a(audit_id).await.unwrap();
    assert!(again.already_started);
    let statuses = blocs::load_bloc_statuses(&pool, audit_id).await.unwrap();
    assert_eq!(statuses[&BlocName::Positioning], BlocStatus::Running);
}
