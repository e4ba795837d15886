//! Bloc 5: accommodation stock
//!
//! Rentals and hotels are counted concurrently on one browser session, taking
//! turns on the session's pacer. The session is always closed, whatever the
//! counts did.

use super::executor::{BlocFailure, BlocOutput, ProviderBlocExecutor};
use crate::models::{
    AccommodationStockResult, AuditSnapshot, BlocResult, CostTracker, ListingKind,
};
use crate::services::providers::charge_failure;

impl ProviderBlocExecutor {
    pub(super) async fn bloc_accommodation_stock(
        &self,
        snapshot: &AuditSnapshot,
        costs: &CostTracker,
    ) -> Result<BlocOutput, BlocFailure> {
        let Some(bbox) = snapshot.destination.bbox else {
            return Err(BlocFailure::MissingInput(
                "destination has no bounding box".to_string(),
            ));
        };

        let launcher = &self.providers.browser;
        let session = match launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                charge_failure(costs, launcher.name(), launcher.unit_cost(), &e);
                return Err(BlocFailure::provider(launcher.name(), e));
            }
        };
        let provider = session.name().to_string();
        let pacer = self.counter.pacer();

        let (rentals, hotels) = tokio::join!(
            self.counter.count(
                session.as_ref(),
                &pacer,
                &provider,
                ListingKind::Rentals,
                &bbox,
                costs
            ),
            self.counter.count(
                session.as_ref(),
                &pacer,
                &provider,
                ListingKind::Hotels,
                &bbox,
                costs
            )
        );

        if let Err(e) = session.close().await {
            tracing::warn!(provider = %provider, error = %e, "Failed to close browser session");
        }

        tracing::info!(
            destination = %snapshot.destination.name,
            rentals = rentals.total,
            hotels = hotels.total,
            "Accommodation stock counted"
        );

        Ok(BlocResult::AccommodationStock(AccommodationStockResult {
            rentals: Some(rentals),
            hotels: Some(hotels),
        })
        .into())
    }
}
