//! Bloc executor seam
//!
//! The runner hands each step a fresh snapshot and a cost tracker and gets
//! back a typed result or a failure. Executors never touch bloc or audit
//! status.
//!
//! A bloc that finishes with partial data reports the sub-steps it had to
//! skip in [`BlocOutput::degraded`]; the runner writes each one to the
//! audit log.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error as _;
use thiserror::Error;

use super::llm_json::LlmOutputError;
use crate::models::{AuditSnapshot, BlocName, BlocPhase, BlocResult, BlocStep, CostTracker};
use crate::services::geo_partition::GeoPartitionCounter;
use crate::services::providers::{ProviderError, Providers};

/// Bloc-level failure
#[derive(Debug, Error)]
pub enum BlocFailure {
    /// Required upstream data is absent (no domain, no bounding box, ...)
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("Unusable model output: {0}")]
    InvalidOutput(#[from] LlmOutputError),
}

impl BlocFailure {
    pub fn provider(provider: &str, source: ProviderError) -> Self {
        BlocFailure::Provider {
            provider: provider.to_string(),
            source,
        }
    }

    /// Error message followed by every source in the chain
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        chain
    }
}

/// Sub-step that failed inside a bloc which still produced a result
#[derive(Debug)]
pub struct SubStepFailure {
    pub step: &'static str,
    pub input: Value,
    pub failure: BlocFailure,
}

/// Result of a bloc plus the sub-steps it degraded on
#[derive(Debug)]
pub struct BlocOutput {
    pub result: BlocResult,
    pub degraded: Vec<SubStepFailure>,
}

impl BlocOutput {
    pub fn new(result: BlocResult, degraded: Vec<SubStepFailure>) -> Self {
        Self { result, degraded }
    }
}

impl From<BlocResult> for BlocOutput {
    fn from(result: BlocResult) -> Self {
        Self::new(result, Vec::new())
    }
}

/// Sub-step failures collected while a bloc runs
#[derive(Debug, Default)]
pub struct Degraded(Vec<SubStepFailure>);

impl Degraded {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: &'static str, input: Value, failure: BlocFailure) {
        tracing::warn!(step, error = %failure, "Sub-step failed, continuing with partial data");
        self.0.push(SubStepFailure {
            step,
            input,
            failure,
        });
    }

    pub fn finish(self, result: BlocResult) -> BlocOutput {
        BlocOutput::new(result, self.0)
    }
}

/// Everything a bloc reads: a snapshot taken right before it starts
pub struct BlocContext {
    pub snapshot: AuditSnapshot,
}

impl BlocContext {
    /// Inputs recorded in the log entries of this step
    pub fn inputs(&self, step: &BlocStep) -> Value {
        let destination = &self.snapshot.destination;
        let audit = &self.snapshot.audit;

        let mut inputs = json!({
            "destination": destination.name,
            "country": destination.country,
        });

        match (step.bloc, step.phase) {
            (BlocName::DigitalPresence, _) | (BlocName::SeoVisibility, _) => {
                inputs["domain"] = json!(self.snapshot.resolved_domain());
                inputs["social_handle"] = json!(destination.social_handle);
            }
            (BlocName::KeywordOpportunities, BlocPhase::B) => {
                let kept: Vec<&str> = audit
                    .keyword_opportunities()
                    .map(|r| r.kept().map(|c| c.keyword.as_str()).collect())
                    .unwrap_or_default();
                inputs["domain"] = json!(self.snapshot.resolved_domain());
                inputs["keywords"] = json!(kept);
            }
            (BlocName::AccommodationStock, _) | (BlocName::ActivityOffer, _) => {
                inputs["bbox"] = json!(destination.bbox);
            }
            (BlocName::Competitors, BlocPhase::B) => {
                let kept: Vec<&str> = audit
                    .competitors()
                    .map(|r| r.kept().map(|c| c.name.as_str()).collect())
                    .unwrap_or_default();
                inputs["competitors"] = json!(kept);
            }
            _ => {}
        }

        inputs
    }
}

#[async_trait]
pub trait BlocExecutor: Send + Sync {
    async fn execute(
        &self,
        step: BlocStep,
        ctx: &BlocContext,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure>;
}

/// Limits applied by the blocs
#[derive(Debug, Clone)]
pub struct BlocLimits {
    pub ranked_keywords: u32,
    pub keyword_candidates: u32,
    pub competitor_candidates: usize,
}

impl Default for BlocLimits {
    fn default() -> Self {
        Self {
            ranked_keywords: 100,
            keyword_candidates: 30,
            competitor_candidates: 8,
        }
    }
}

/// Executor backed by the configured providers
pub struct ProviderBlocExecutor {
    pub(super) providers: Providers,
    pub(super) counter: GeoPartitionCounter,
    pub(super) limits: BlocLimits,
}

impl ProviderBlocExecutor {
    pub fn new(providers: Providers, counter: GeoPartitionCounter, limits: BlocLimits) -> Self {
        Self {
            providers,
            counter,
            limits,
        }
    }
}

#[async_trait]
impl BlocExecutor for ProviderBlocExecutor {
    async fn execute(
        &self,
        step: BlocStep,
        ctx: &BlocContext,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let snapshot = &ctx.snapshot;
        match (step.bloc, step.phase) {
            (BlocName::Positioning, _) => self.bloc_positioning(snapshot, costs).await,
            (BlocName::DigitalPresence, _) => self.bloc_digital_presence(snapshot, costs).await,
            (BlocName::SeoVisibility, _) => self.bloc_seo_visibility(snapshot, costs).await,
            (BlocName::KeywordOpportunities, BlocPhase::B) => {
                self.bloc_keyword_verification(snapshot, costs).await
            }
            (BlocName::KeywordOpportunities, _) => {
                self.bloc_keyword_candidates(snapshot, costs).await
            }
            (BlocName::AccommodationStock, _) => {
                self.bloc_accommodation_stock(snapshot, costs).await
            }
            (BlocName::ActivityOffer, _) => self.bloc_activity_offer(snapshot, costs).await,
            (BlocName::Competitors, BlocPhase::B) => {
                self.bloc_competitor_benchmark(snapshot, costs).await
            }
            (BlocName::Competitors, _) => self.bloc_competitor_candidates(snapshot, costs).await,
        }
    }
}
