//! Bloc 3: ranked keywords of the destination domain
//!
//! Goes through the fallback policy: primary on the bare domain, primary on
//! the `www.` form, then the secondary provider. No data is an empty result,
//! not a failure.

use super::executor::{BlocFailure, BlocOutput, ProviderBlocExecutor};
use crate::models::{AuditSnapshot, BlocResult, CostTracker, RankedKeyword, SeoVisibilityResult};
use crate::services::fallback::{FallbackOutcome, ProviderFallbackPolicy};

impl ProviderBlocExecutor {
    pub(super) async fn bloc_seo_visibility(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let domain = snapshot.resolved_domain().ok_or_else(|| {
            BlocFailure::MissingInput("no website domain resolved for the destination".to_string())
        })?;
        let limit = self.limits.ranked_keywords;

        let policy = ProviderFallbackPolicy::seo(&self.providers);

        let outcome = policy
            .fetch(
                &domain,
                costs,
                |keywords: &Vec<RankedKeyword>| !keywords.is_empty(),
                |provider, key| async move { provider.ranked_keywords(&key, limit).await },
            )
            .await;

        let (mut keywords, provider) = match outcome {
            FallbackOutcome::Found {
                data,
                provider,
                role,
                calls,
            } => {
                tracing::info!(
                    domain = %domain,
                    provider = %provider,
                    ?role,
                    calls,
                    keywords = data.len(),
                    "Ranked keywords retrieved"
                );
                (data, Some(provider))
            }
            FallbackOutcome::NoData { calls } => {
                tracing::info!(domain = %domain, calls, "No ranked keywords from any provider");
                (Vec::new(), None)
            }
        };

        keywords.sort_by_key(|k| k.position);
        let total_search_volume = keywords.iter().filter_map(|k| k.search_volume).sum();

        Ok(BlocResult::SeoVisibility(SeoVisibilityResult {
            domain: Some(domain),
            keywords,
            provider,
            total_search_volume,
        })
        .into())
    }
}
