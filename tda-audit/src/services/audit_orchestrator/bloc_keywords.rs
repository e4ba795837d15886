//! Bloc 4: keyword opportunities
//!
//! Phase A proposes candidates (SEO keyword ideas plus model suggestions)
//! for the first validation gate. Phase B checks the live results page for
//! the keywords the reviewer kept, and only those.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

use super::executor::{BlocFailure, BlocOutput, Degraded, ProviderBlocExecutor};
use super::llm_json::parse_llm_json;
use crate::models::destination::normalize_key;
use crate::models::{
    AuditSnapshot, BlocName, BlocResult, CostTracker, KeywordCandidate, KeywordIdea,
    KeywordOpportunitiesResult, VerifiedKeyword,
};
use crate::services::providers::{charge_failure, LlmPrompt};

#[derive(Debug, Deserialize)]
struct KeywordSuggestions {
    #[serde(default)]
    keywords: Vec<String>,
}

impl ProviderBlocExecutor {
    pub(super) async fn bloc_keyword_candidates(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let destination = &snapshot.destination;
        let seo = &self.providers.seo_primary;
        let llm = &self.providers.llm;
        let limit = self.limits.keyword_candidates;

        let ranked: Vec<String> = match snapshot.audit.result(BlocName::SeoVisibility) {
            Some(BlocResult::SeoVisibility(r)) => {
                r.keywords.iter().take(20).map(|k| k.keyword.clone()).collect()
            }
            _ => Vec::new(),
        };
        let summary = snapshot
            .audit
            .positioning()
            .and_then(|p| p.summary.clone())
            .unwrap_or_default();

        let prompt = LlmPrompt::new(
            "You are an SEO strategist for tourism destinations. \
             Answer with a single JSON object and nothing else.",
            format!(
                "Destination: {} ({}). Positioning: {}. Keywords it already ranks for: {}. \
                 Suggest up to {} search keywords travellers use that the destination should target. \
                 Return {{\"keywords\": [string]}}.",
                destination.name,
                destination.country,
                summary,
                ranked.join(", "),
                limit
            ),
        )
        .with_max_tokens(600);

        let (ideas, suggestions) = tokio::join!(
            async {
                match seo.keyword_ideas(&destination.name, &destination.country, limit).await {
                    Ok(metered) => {
                        costs.charge(seo.name(), metered.cost);
                        Ok(metered.data)
                    }
                    Err(e) => {
                        charge_failure(costs, seo.name(), seo.unit_cost(), &e);
                        Err(BlocFailure::provider(seo.name(), e))
                    }
                }
            },
            async {
                match llm.complete(&prompt).await {
                    Ok(metered) => {
                        costs.charge(llm.name(), metered.cost);
                        parse_llm_json::<KeywordSuggestions>(&metered.data)
                            .map(|s| s.keywords)
                            .map_err(BlocFailure::from)
                    }
                    Err(e) => {
                        charge_failure(costs, llm.name(), llm.unit_cost(), &e);
                        Err(BlocFailure::provider(llm.name(), e))
                    }
                }
            }
        );

        let mut degraded = Degraded::new();
        let (ideas, suggestions) = match (ideas, suggestions) {
            (Err(e), Err(_)) => return Err(e),
            (ideas, suggestions) => {
                let ideas = ideas.unwrap_or_else(|e| {
                    degraded.record(
                        "keyword_ideas",
                        json!({ "seed": destination.name, "country": destination.country }),
                        e,
                    );
                    Vec::new()
                });
                let suggestions = suggestions.unwrap_or_else(|e| {
                    degraded.record(
                        "keyword_suggestions",
                        json!({ "destination": destination.name, "ranked": ranked.len() }),
                        e,
                    );
                    Vec::new()
                });
                (ideas, suggestions)
            }
        };

        let candidates = merge_candidates(ideas, suggestions, limit as usize);
        tracing::info!(
            destination = %destination.name,
            candidates = candidates.len(),
            "Keyword candidates ready for review"
        );

        Ok(degraded.finish(BlocResult::KeywordOpportunities(
            KeywordOpportunitiesResult {
                candidates,
                verified: Vec::new(),
            },
        )))
    }

    pub(super) async fn bloc_keyword_verification(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let reviewed = snapshot
            .audit
            .keyword_opportunities()
            .cloned()
            .unwrap_or_default();
        let kept: Vec<KeywordCandidate> = reviewed.kept().cloned().collect();
        if kept.is_empty() {
            return Err(BlocFailure::MissingInput("no validated keywords".to_string()));
        }

        let Some(domain) = snapshot.resolved_domain() else {
            tracing::warn!("No domain resolved, keywords left unchecked");
            let verified = kept
                .into_iter()
                .map(|c| VerifiedKeyword {
                    keyword: c.keyword,
                    search_volume: c.search_volume,
                    position: None,
                    checked: false,
                })
                .collect();
            return Ok(BlocResult::KeywordOpportunities(KeywordOpportunitiesResult {
                candidates: reviewed.candidates,
                verified,
            })
            .into());
        };

        let seo = &self.providers.seo_primary;
        let lookups = kept.iter().map(|candidate| {
            let domain = domain.as_str();
            async move {
                match seo.serp_position(&candidate.keyword, domain).await {
                    Ok(metered) => {
                        costs.charge(seo.name(), metered.cost);
                        Ok(metered.data)
                    }
                    Err(e) => {
                        charge_failure(costs, seo.name(), seo.unit_cost(), &e);
                        Err(e)
                    }
                }
            }
        });
        let positions = join_all(lookups).await;

        if positions.iter().all(|p| p.is_err()) {
            if let Some(Err(e)) = positions.into_iter().next() {
                return Err(BlocFailure::provider(seo.name(), e));
            }
            return Err(BlocFailure::MissingInput("no keyword was checked".to_string()));
        }

        let mut degraded = Degraded::new();
        let verified = kept
            .into_iter()
            .zip(positions)
            .map(|(candidate, position)| {
                let (checked, position) = match position {
                    Ok(position) => (true, position),
                    Err(e) => {
                        degraded.record(
                            "serp_position",
                            json!({ "keyword": candidate.keyword, "domain": domain }),
                            BlocFailure::provider(seo.name(), e),
                        );
                        (false, None)
                    }
                };
                VerifiedKeyword {
                    keyword: candidate.keyword,
                    search_volume: candidate.search_volume,
                    position,
                    checked,
                }
            })
            .collect();

        Ok(degraded.finish(BlocResult::KeywordOpportunities(
            KeywordOpportunitiesResult {
                candidates: reviewed.candidates,
                verified,
            },
        )))
    }
}

/// SEO ideas first (by volume), then model suggestions, deduplicated
pub(super) fn merge_candidates(
    mut ideas: Vec<KeywordIdea>,
    suggestions: Vec<String>,
    limit: usize,
) -> Vec<KeywordCandidate> {
    ideas.sort_by(|a, b| b.search_volume.cmp(&a.search_volume));

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for idea in ideas {
        if seen.insert(normalize_key(&idea.keyword)) {
            candidates.push(KeywordCandidate {
                keyword: idea.keyword,
                search_volume: idea.search_volume,
                source: "seo".to_string(),
                kept: true,
            });
        }
    }
    for keyword in suggestions {
        let key = normalize_key(&keyword);
        if !key.is_empty() && seen.insert(key) {
            candidates.push(KeywordCandidate {
                keyword: keyword.trim().to_string(),
                search_volume: None,
                source: "llm".to_string(),
                kept: true,
            });
        }
    }

    candidates.truncate(limit);
    candidates
}
