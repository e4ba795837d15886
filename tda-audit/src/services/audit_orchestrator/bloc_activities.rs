//! Bloc 6: activity offer
//!
//! Listing count and offer synthesis run concurrently; either one alone is
//! enough for a usable result.

use serde_json::json;

use super::executor::{BlocFailure, BlocOutput, Degraded, ProviderBlocExecutor};
use crate::models::{
    ActivityOfferResult, AuditSnapshot, BlocResult, BoundingBox, CostTracker, GeoCount,
    ListingKind,
};
use crate::services::providers::{charge_failure, LlmPrompt};

impl ProviderBlocExecutor {
    pub(super) async fn bloc_activity_offer(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let destination = &snapshot.destination;
        let llm = &self.providers.llm;

        let prompt = LlmPrompt::new(
            "You are a destination marketing analyst. Answer in plain prose.",
            format!(
                "Summarize the activity offer of {} ({}): main activity types, \
                 seasonality and gaps compared with similar destinations.",
                destination.name, destination.country
            ),
        )
        .with_max_tokens(600);

        let (activities, synthesis) = tokio::join!(
            async {
                match &destination.bbox {
                    Some(bbox) => self.count_activities(bbox, costs).await.map(Some),
                    None => {
                        tracing::info!("No bounding box, skipping activity count");
                        Ok(None)
                    }
                }
            },
            async {
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
        );

        let mut degraded = Degraded::new();
        let (activities, synthesis) = match (activities, synthesis) {
            (Err(e), Err(_)) => return Err(e),
            (Ok(None), Err(e)) => return Err(e),
            (activities, synthesis) => {
                let activities = activities.unwrap_or_else(|e| {
                    degraded.record(
                        "activity_count",
                        json!({ "bbox": destination.bbox }),
                        e,
                    );
                    None
                });
                let synthesis = match synthesis {
                    Ok(text) => Some(text),
                    Err(e) => {
                        degraded.record(
                            "activity_synthesis",
                            json!({ "destination": destination.name }),
                            e,
                        );
                        None
                    }
                };
                (activities, synthesis)
            }
        };

        Ok(degraded.finish(BlocResult::ActivityOffer(ActivityOfferResult {
            activities,
            synthesis,
        })))
    }

    async fn count_activities(
        &self,
        bbox: &BoundingBox,
        costs: &CostTracker,
    ) -> Result<GeoCount, BlocFailure> {
        let launcher = &self.providers.browser;
        let session = match launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                charge_failure(costs, launcher.name(), launcher.unit_cost(), &e);
                return Err(BlocFailure::provider(launcher.name(), e));
            }
        };
        let provider = session.name().to_string();

        let count = self
            .counter
            .count(
                session.as_ref(),
                &self.counter.pacer(),
                &provider,
                ListingKind::Activities,
                bbox,
                costs,
            )
            .await;

        if let Err(e) = session.close().await {
            tracing::warn!(provider = %provider, error = %e, "Failed to close browser session");
        }
        Ok(count)
    }
}
