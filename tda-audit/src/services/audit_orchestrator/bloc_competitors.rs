//! Bloc 7: competitor destinations
//!
//! Phase A asks the model for comparable destinations (gate 2). Phase B
//! benchmarks the validated ones on SEO figures and writes the comparative
//! synthesis.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;

use super::executor::{BlocFailure, BlocOutput, Degraded, ProviderBlocExecutor};
use super::llm_json::parse_llm_json;
use crate::models::{
    AuditSnapshot, BlocResult, CompetitorBenchmark, CompetitorCandidate, CompetitorsResult,
    CostTracker, DomainMetrics,
};
use crate::services::domain::normalize_domain;
use crate::services::fallback::ProviderFallbackPolicy;
use crate::services::providers::{charge_failure, LlmPrompt};

const COMPETITOR_SYSTEM: &str = "You are a destination marketing analyst. \
Answer with a single JSON value and nothing else.";

#[derive(Debug, Deserialize)]
struct ProposedCompetitor {
    name: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

impl ProviderBlocExecutor {
    pub(super) async fn bloc_competitor_candidates(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let destination = &snapshot.destination;
        let llm = &self.providers.llm;
        let limit = self.limits.competitor_candidates;

        let positioning = snapshot
            .audit
            .positioning()
            .and_then(|p| p.summary.clone())
            .unwrap_or_default();

        let prompt = LlmPrompt::new(
            COMPETITOR_SYSTEM,
            format!(
                "Destination: {} ({}). Positioning: {}. List up to {} destinations that \
                 compete with it for the same travellers. Return a JSON array of \
                 {{\"name\": string, \"country\": string, \"website\": string or null, \
                 \"rationale\": string}}.",
                destination.name, destination.country, positioning, limit
            ),
        )
        .with_max_tokens(1000);

        let answer = match llm.complete(&prompt).await {
            Ok(metered) => {
                costs.charge(llm.name(), metered.cost);
                metered.data
            }
            Err(e) => {
                charge_failure(costs, llm.name(), llm.unit_cost(), &e);
                return Err(BlocFailure::provider(llm.name(), e));
            }
        };

        let proposed: Vec<ProposedCompetitor> = parse_llm_json(&answer)?;
        let candidates: Vec<CompetitorCandidate> = proposed
            .into_iter()
            .filter(|p| !p.name.trim().is_empty())
            .take(limit)
            .map(|p| CompetitorCandidate {
                name: p.name.trim().to_string(),
                country: p.country,
                website: p.website,
                rationale: p.rationale,
                kept: true,
            })
            .collect();

        tracing::info!(
            destination = %destination.name,
            candidates = candidates.len(),
            "Competitor candidates ready for review"
        );

        Ok(BlocResult::Competitors(CompetitorsResult {
            candidates,
            benchmarks: Vec::new(),
            comparison: None,
        })
        .into())
    }

    pub(super) async fn bloc_competitor_benchmark(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let reviewed = snapshot.audit.competitors().cloned().unwrap_or_default();
        let kept: Vec<CompetitorCandidate> = reviewed.kept().cloned().collect();
        if kept.is_empty() {
            return Err(BlocFailure::MissingInput(
                "no validated competitors".to_string(),
            ));
        }

        let seo = ProviderFallbackPolicy::seo(&self.providers);

        let lookups = kept.iter().map(|competitor| {
            let seo = &seo;
            async move {
                let domain = competitor.website.as_deref().and_then(normalize_domain);
                let metrics = match &domain {
                    Some(domain) => seo
                        .fetch(
                            domain,
                            costs,
                            |m: &Option<DomainMetrics>| m.is_some(),
                            |provider, key| async move { provider.domain_metrics(&key).await },
                        )
                        .await
                        .into_data()
                        .flatten(),
                    None => None,
                };
                CompetitorBenchmark {
                    name: competitor.name.clone(),
                    domain,
                    metrics,
                }
            }
        });
        let benchmarks = join_all(lookups).await;

        let own_metrics = snapshot
            .audit
            .digital_presence()
            .and_then(|d| d.domain_metrics.clone());

        let mut degraded = Degraded::new();
        let comparison = match self
            .compare(snapshot, own_metrics.as_ref(), &benchmarks, costs)
            .await
        {
            Ok(text) => Some(text),
            Err(e) if benchmarks.iter().any(|b| b.metrics.is_some()) => {
                let names: Vec<&str> = benchmarks.iter().map(|b| b.name.as_str()).collect();
                degraded.record("comparative_synthesis", json!({ "competitors": names }), e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(degraded.finish(BlocResult::Competitors(CompetitorsResult {
            candidates: reviewed.candidates,
            benchmarks,
            comparison,
        })))
    }

    async fn compare(
        &self,
        snapshot: &AuditSnapshot,
        own_metrics: Option<&DomainMetrics>,
        benchmarks: &[CompetitorBenchmark],
        costs: &CostTracker,
    ) -> Result<String, BlocFailure> {
        let llm = &self.providers.llm;
        let figures = json!({
            "destination": {
                "name": snapshot.destination.name,
                "metrics": own_metrics,
            },
            "competitors": benchmarks,
        });
        let prompt = LlmPrompt::new(
            "You are a destination marketing analyst. Answer in plain prose.",
            format!(
                "Compare the online visibility of {} with its competitors using these \
                 figures, then give three priorities: {}",
                snapshot.destination.name, figures
            ),
        )
        .with_max_tokens(1200);

        match llm.complete(&prompt).await {
            Ok(metered) => {
                costs.charge(llm.name(), metered.cost);
                Ok(metered.data.trim().to_string())
            }
            Err(e) => {
                charge_failure(costs, llm.name(), llm.unit_cost(), &e);
                Err(BlocFailure::provider(llm.name(), e))
            }
        }
    }
}
