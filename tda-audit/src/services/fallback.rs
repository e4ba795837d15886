//! Provider fallback policy
//!
//! `primary(K)` → `primary(variant(K))` (only when the variant differs) →
//! `secondary(K)`. The first attempt whose payload passes the validity
//! predicate wins. Every dispatched attempt is charged to the cost tracker,
//! including empty and invalid ones; a failed attempt is charged its
//! provider's unit cost. Running out of attempts is `NoData`, not an error.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use super::domain::www_variant;
use super::providers::{charge_failure, Metered, ProviderResult, Providers, SeoProvider};
use crate::models::CostTracker;

/// Which attempt produced the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackRole {
    Primary,
    PrimaryVariant,
    Secondary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome<T> {
    Found {
        data: T,
        provider: String,
        role: FallbackRole,
        calls: u32,
    },
    NoData {
        calls: u32,
    },
}

impl<T> FallbackOutcome<T> {
    pub fn calls(&self) -> u32 {
        match self {
            FallbackOutcome::Found { calls, .. } | FallbackOutcome::NoData { calls } => *calls,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            FallbackOutcome::Found { data, .. } => Some(data),
            FallbackOutcome::NoData { .. } => None,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            FallbackOutcome::Found { provider, .. } => Some(provider),
            FallbackOutcome::NoData { .. } => None,
        }
    }
}

struct Candidate<P> {
    name: String,
    unit_cost: f64,
    provider: P,
}

/// Fallback chain over providers of one kind
///
/// `P` is usually an `Arc<dyn Trait>`; it is cloned into each attempt so the
/// call closure can own it across the await.
pub struct ProviderFallbackPolicy<P> {
    primary: Candidate<P>,
    secondary: Option<Candidate<P>>,
    variant: Option<fn(&str) -> String>,
}

impl<P: Clone> ProviderFallbackPolicy<P> {
    pub fn new(primary_name: impl Into<String>, unit_cost: f64, primary: P) -> Self {
        Self {
            primary: Candidate {
                name: primary_name.into(),
                unit_cost,
                provider: primary,
            },
            secondary: None,
            variant: None,
        }
    }

    pub fn with_secondary(mut self, name: impl Into<String>, unit_cost: f64, provider: P) -> Self {
        self.secondary = Some(Candidate {
            name: name.into(),
            unit_cost,
            provider,
        });
        self
    }

    /// Key rewrite tried on the primary before falling back
    pub fn with_variant(mut self, variant: fn(&str) -> String) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Attempt plan for `key`: (on primary, role, key)
    fn plan(&self, key: &str) -> Vec<(bool, FallbackRole, String)> {
        let mut plan = vec![(true, FallbackRole::Primary, key.to_string())];
        if let Some(variant) = self.variant {
            let varied = variant(key);
            if varied != key {
                plan.push((true, FallbackRole::PrimaryVariant, varied));
            }
        }
        if self.secondary.is_some() {
            plan.push((false, FallbackRole::Secondary, key.to_string()));
        }
        plan
    }

    /// Run the chain for `key`
    ///
    /// `call` receives a provider clone and the key for that attempt.
    pub async fn fetch<T, F, Fut, V>(
        &self,
        key: &str,
        tracker: &CostTracker,
        is_valid: V,
        mut call: F,
    ) -> FallbackOutcome<T>
    where
        F: FnMut(P, String) -> Fut,
        Fut: Future<Output = ProviderResult<Metered<T>>>,
        V: Fn(&T) -> bool,
    {
        let mut calls = 0u32;

        for (use_primary, role, attempt_key) in self.plan(key) {
            let candidate = if use_primary {
                &self.primary
            } else {
                match &self.secondary {
                    Some(secondary) => secondary,
                    None => continue,
                }
            };

            calls += 1;
            match call(candidate.provider.clone(), attempt_key.clone()).await {
                Ok(Metered { data, cost }) => {
                    tracker.charge(&candidate.name, cost);
                    if is_valid(&data) {
                        tracing::debug!(
                            provider = %candidate.name,
                            key = %attempt_key,
                            ?role,
                            calls,
                            "Fallback attempt returned data"
                        );
                        return FallbackOutcome::Found {
                            data,
                            provider: candidate.name.clone(),
                            role,
                            calls,
                        };
                    }
                    tracing::debug!(
                        provider = %candidate.name,
                        key = %attempt_key,
                        ?role,
                        "Fallback attempt returned no usable data"
                    );
                }
                Err(e) => {
                    charge_failure(tracker, &candidate.name, candidate.unit_cost, &e);
                    tracing::warn!(
                        provider = %candidate.name,
                        key = %attempt_key,
                        ?role,
                        error = %e,
                        "Fallback attempt failed"
                    );
                }
            }
        }

        FallbackOutcome::NoData { calls }
    }
}

impl ProviderFallbackPolicy<Arc<dyn SeoProvider>> {
    /// Primary SEO provider, its `www.` variant, then the secondary provider
    pub fn seo(providers: &Providers) -> Self {
        let primary = &providers.seo_primary;
        let secondary = &providers.seo_secondary;
        Self::new(primary.name(), primary.unit_cost(), primary.clone())
            .with_variant(www_variant)
            .with_secondary(secondary.name(), secondary.unit_cost(), secondary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::ProviderError;
    use std::sync::Mutex;

    /// Returns a scripted payload per (provider, key); missing entries are empty
    fn scripted<'a>(
        answers: &'static [(&'static str, &'static str, &'static [u32])],
        log: &'a Mutex<Vec<String>>,
    ) -> impl FnMut(&'static str, String) -> std::future::Ready<ProviderResult<Metered<Vec<u32>>>> + 'a {
        move |provider, key| {
            log.lock().unwrap().push(format!("{}:{}", provider, key));
            if provider == "broken" {
                return std::future::ready(Err(ProviderError::Timeout));
            }
            if provider == "missing" {
                return std::future::ready(Err(ProviderError::NotConfigured(
                    "no credentials".to_string(),
                )));
            }
            let data = answers
                .iter()
                .find(|(p, k, _)| *p == provider && *k == key)
                .map(|(_, _, d)| d.to_vec())
                .unwrap_or_default();
            std::future::ready(Ok(Metered::new(data, 0.01)))
        }
    }

    #[tokio::test]
    async fn secondary_answers_after_primary_and_variant_are_empty() {
        let log = Mutex::new(Vec::new());
        let tracker = CostTracker::new();
        let policy = ProviderFallbackPolicy::new("seo_primary", 0.0, "primary")
            .with_variant(www_variant)
            .with_secondary("seo_secondary", 0.0, "secondary");

        let outcome = policy
            .fetch(
                "annecy.fr",
                &tracker,
                |d: &Vec<u32>| !d.is_empty(),
                scripted(&[("secondary", "annecy.fr", &[7, 8])], &log),
            )
            .await;

        match outcome {
            FallbackOutcome::Found {
                data,
                provider,
                role,
                calls,
            } => {
                assert_eq!(data, vec![7, 8]);
                assert_eq!(provider, "seo_secondary");
                assert_eq!(role, FallbackRole::Secondary);
                assert_eq!(calls, 3);
            }
            other => panic!("expected Found, got {:?}", other),
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec!["primary:annecy.fr", "primary:www.annecy.fr", "secondary:annecy.fr"]
        );
        assert_eq!(tracker.calls_for("seo_primary"), 2);
        assert_eq!(tracker.calls_for("seo_secondary"), 1);
        assert_eq!(tracker.snapshot().provider_calls(), 3);
    }

    #[tokio::test]
    async fn primary_hit_stops_the_chain() {
        let log = Mutex::new(Vec::new());
        let tracker = CostTracker::new();
        let policy = ProviderFallbackPolicy::new("seo_primary", 0.0, "primary")
            .with_variant(www_variant)
            .with_secondary("seo_secondary", 0.0, "secondary");

        let outcome = policy
            .fetch(
                "annecy.fr",
                &tracker,
                |d: &Vec<u32>| !d.is_empty(),
                scripted(&[("primary", "annecy.fr", &[1])], &log),
            )
            .await;

        assert_eq!(outcome.calls(), 1);
        assert_eq!(outcome.provider(), Some("seo_primary"));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_variant_is_not_retried() {
        let log = Mutex::new(Vec::new());
        let tracker = CostTracker::new();
        let policy = ProviderFallbackPolicy::new("seo_primary", 0.0, "primary").with_variant(www_variant);

        let outcome = policy
            .fetch(
                "www.annecy.fr",
                &tracker,
                |d: &Vec<u32>| !d.is_empty(),
                scripted(&[], &log),
            )
            .await;

        assert_eq!(outcome, FallbackOutcome::NoData { calls: 1 });
    }

    #[tokio::test]
    async fn failed_attempts_are_charged_and_never_raise() {
        let log = Mutex::new(Vec::new());
        let tracker = CostTracker::new();
        let policy = ProviderFallbackPolicy::new("seo_primary", 0.02, "broken")
            .with_secondary("seo_secondary", 0.0, "secondary");

        let outcome = policy
            .fetch(
                "annecy.fr",
                &tracker,
                |d: &Vec<u32>| !d.is_empty(),
                scripted(&[], &log),
            )
            .await;

        assert_eq!(outcome, FallbackOutcome::NoData { calls: 2 });
        assert_eq!(tracker.calls_for("seo_primary"), 1);
        assert_eq!(tracker.calls_for("seo_secondary"), 1);
        // Failed primary at its unit cost, empty secondary at its metered cost
        assert!((tracker.snapshot().total_cost() - 0.03).abs() < 1e-9);
        assert!(outcome.into_data().is_none());
    }

    #[tokio::test]
    async fn unconfigured_attempts_are_not_charged() {
        let log = Mutex::new(Vec::new());
        let tracker = CostTracker::new();
        let policy = ProviderFallbackPolicy::new("seo_primary", 0.02, "missing")
            .with_secondary("seo_secondary", 0.0, "secondary");

        let outcome = policy
            .fetch(
                "annecy.fr",
                &tracker,
                |d: &Vec<u32>| !d.is_empty(),
                scripted(&[("secondary", "annecy.fr", &[3])], &log),
            )
            .await;

        assert_eq!(outcome.provider(), Some("seo_secondary"));
        assert_eq!(tracker.calls_for("seo_primary"), 0);
        assert_eq!(tracker.snapshot().provider_calls(), 1);
    }
}
