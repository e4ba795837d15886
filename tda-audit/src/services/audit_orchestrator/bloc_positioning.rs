//! Bloc 1: positioning synthesis and official domain detection
//!
//! Both sub-steps run concurrently. A declared website skips detection.
//! The bloc fails only when neither sub-step produced anything.

use serde::Deserialize;
use serde_json::json;

use super::executor::{BlocFailure, BlocOutput, Degraded, ProviderBlocExecutor};
use super::llm_json::parse_llm_json;
use crate::models::{AuditSnapshot, BlocResult, CostTracker, Destination, PositioningResult};
use crate::services::domain::normalize_domain;
use crate::services::providers::{charge_failure, LlmPrompt};

const POSITIONING_SYSTEM: &str = "You are a destination marketing analyst. \
Answer with a single JSON object and nothing else.";

#[derive(Debug, Default, Deserialize)]
struct PositioningAnswer {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    target_audiences: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DomainAnswer {
    #[serde(default)]
    domain: Option<String>,
}

fn describe(destination: &Destination) -> String {
    match &destination.region {
        Some(region) => format!("{} ({}, {})", destination.name, region, destination.country),
        None => format!("{} ({})", destination.name, destination.country),
    }
}

impl ProviderBlocExecutor {
    pub(super) async fn bloc_positioning(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let destination = &snapshot.destination;
        let declared = destination.website.as_deref().and_then(normalize_domain);

        let (synthesis, detected) = tokio::join!(
            self.positioning_synthesis(destination, costs),
            async {
                match &declared {
                    Some(_) => Ok(None),
                    None => self.detect_domain(destination, costs).await,
                }
            }
        );

        let input = json!({ "destination": describe(destination) });
        let mut degraded = Degraded::new();

        let (detected_domain, domain_source) = match (&declared, detected) {
            (Some(domain), _) => (Some(domain.clone()), Some("declared".to_string())),
            (None, Ok(Some(domain))) => (Some(domain), Some("llm".to_string())),
            (None, Ok(None)) => (None, None),
            (None, Err(e)) => {
                if synthesis.is_err() {
                    // Both sub-steps failed; the synthesis error fails the bloc
                    tracing::warn!(error = %e, "Domain detection failed");
                } else {
                    degraded.record("domain_detection", input.clone(), e);
                }
                (None, None)
            }
        };

        let answer = match synthesis {
            Ok(answer) => answer,
            Err(e) if detected_domain.is_some() => {
                degraded.record("positioning_synthesis", input, e);
                PositioningAnswer::default()
            }
            Err(e) => return Err(e),
        };

        Ok(degraded.finish(BlocResult::Positioning(PositioningResult {
            summary: answer.summary,
            strengths: answer.strengths,
            target_audiences: answer.target_audiences,
            detected_domain,
            domain_source,
        })))
    }

    async fn positioning_synthesis(
        &self,
        destination: &Destination,
        costs: &CostTracker,
    ) -> Result<PositioningAnswer, BlocFailure> {
        let llm = &self.providers.llm;
        let prompt = LlmPrompt::new(
            POSITIONING_SYSTEM,
            format!(
                "Describe the tourism positioning of {}. Return \
                 {{\"summary\": string, \"strengths\": [string], \"target_audiences\": [string]}}.",
                describe(destination)
            ),
        )
        .with_max_tokens(800);

        match llm.complete(&prompt).await {
            Ok(metered) => {
                costs.charge(llm.name(), metered.cost);
                Ok(parse_llm_json(&metered.data)?)
            }
            Err(e) => {
                charge_failure(costs, llm.name(), llm.unit_cost(), &e);
                Err(BlocFailure::provider(llm.name(), e))
            }
        }
    }

    async fn detect_domain(
        &self,
        destination: &Destination,
        costs: &CostTracker,
    ) -> Result<Option<String>, BlocFailure> {
        let llm = &self.providers.llm;
        let prompt = LlmPrompt::new(
            POSITIONING_SYSTEM,
            format!(
                "What is the domain of the official tourism office website of {}? \
                 Return {{\"domain\": string or null}}.",
                describe(destination)
            ),
        )
        .with_max_tokens(100);

        match llm.complete(&prompt).await {
            Ok(metered) => {
                costs.charge(llm.name(), metered.cost);
                let answer: DomainAnswer = parse_llm_json(&metered.data)?;
                Ok(answer.domain.as_deref().and_then(normalize_domain))
            }
            Err(e) => {
                charge_failure(costs, llm.name(), llm.unit_cost(), &e);
                Err(BlocFailure::provider(llm.name(), e))
            }
        }
    }
}
