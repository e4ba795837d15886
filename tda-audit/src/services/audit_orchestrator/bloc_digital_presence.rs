//! Bloc 2: domain metrics and social insights
//!
//! The domain is re-read from the persisted bloc 1 result, never passed in
//! memory from the previous step.

use serde_json::json;

use super::executor::{BlocFailure, BlocOutput, Degraded, ProviderBlocExecutor};
use crate::models::{
    AuditSnapshot, BlocResult, CostTracker, DigitalPresenceResult, DomainMetrics,
};
use crate::services::fallback::ProviderFallbackPolicy;
use crate::services::providers::charge_failure;

impl ProviderBlocExecutor {
    pub(super) async fn bloc_digital_presence(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let domain = snapshot.resolved_domain();
        let handle = snapshot.destination.social_handle.clone();

        if domain.is_none() && handle.is_none() {
            return Err(BlocFailure::MissingInput(
                "neither a website domain nor a social handle is known".to_string(),
            ));
        }

        let seo = ProviderFallbackPolicy::seo(&self.providers);

        let (metrics, social) = tokio::join!(
            async {
                match &domain {
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
                }
            },
            async {
                let social = &self.providers.social;
                match &handle {
                    Some(handle) => match social.insights(handle).await {
                        Ok(metered) => {
                            costs.charge(social.name(), metered.cost);
                            Ok(metered.data)
                        }
                        Err(e) => {
                            charge_failure(costs, social.name(), social.unit_cost(), &e);
                            Err(BlocFailure::provider(social.name(), e))
                        }
                    },
                    None => Ok(None),
                }
            }
        );

        let mut degraded = Degraded::new();
        let social = match social {
            Ok(social) => social,
            Err(e) if metrics.is_some() => {
                degraded.record("social_insights", json!({ "handle": handle }), e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(degraded.finish(BlocResult::DigitalPresence(DigitalPresenceResult {
            domain,
            domain_metrics: metrics,
            social,
        })))
    }
}
