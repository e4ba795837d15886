//! External provider seams
//!
//! Every collaborator is "a call that takes typed parameters and returns a
//! result plus its cost, or fails". Adapters live in `services::clients`;
//! tests substitute scripted fakes.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    BoundingBox, CostTracker, DomainMetrics, KeywordIdea, ListingKind, RankedKeyword, SearchPage,
    SocialInsights,
};

/// Provider call failure
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Anti-bot wall or captcha on a scraped page
    #[error("Blocked by provider: {0}")]
    Blocked(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl ProviderError {
    /// False when the call was refused before any request left the process
    pub fn was_dispatched(&self) -> bool {
        !matches!(self, ProviderError::NotConfigured(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Charge a failed call at the provider's configured price
///
/// Calls that were never dispatched are neither priced nor counted.
pub fn charge_failure(costs: &CostTracker, provider: &str, unit_cost: f64, error: &ProviderError) {
    if error.was_dispatched() {
        costs.charge(provider, unit_cost);
    }
}

/// Provider payload with the price of the call that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Metered<T> {
    pub data: T,
    pub cost: f64,
}

impl<T> Metered<T> {
    pub fn new(data: T, cost: f64) -> Self {
        Self { data, cost }
    }
}

/// Prompt sent to the language model
#[derive(Debug, Clone)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl LlmPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 1024,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Configured price of one call, charged when a dispatched call fails
    fn unit_cost(&self) -> f64 {
        0.0
    }

    async fn complete(&self, prompt: &LlmPrompt) -> ProviderResult<Metered<String>>;
}

#[async_trait]
pub trait SeoProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Configured price of one call, charged when a dispatched call fails
    fn unit_cost(&self) -> f64 {
        0.0
    }

    /// Authority and traffic figures, `None` when the domain is unknown
    async fn domain_metrics(&self, domain: &str) -> ProviderResult<Metered<Option<DomainMetrics>>>;

    /// Keywords the domain ranks for, best positions first
    async fn ranked_keywords(
        &self,
        domain: &str,
        limit: u32,
    ) -> ProviderResult<Metered<Vec<RankedKeyword>>>;

    /// Related keyword ideas for a seed term in a market
    async fn keyword_ideas(
        &self,
        seed: &str,
        country: &str,
        limit: u32,
    ) -> ProviderResult<Metered<Vec<KeywordIdea>>>;

    /// Live organic position of `domain` for `keyword`, `None` when absent
    async fn serp_position(&self, keyword: &str, domain: &str)
        -> ProviderResult<Metered<Option<u32>>>;
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Configured price of one call, charged when a dispatched call fails
    fn unit_cost(&self) -> f64 {
        0.0
    }

    async fn insights(&self, handle: &str) -> ProviderResult<Metered<Option<SocialInsights>>>;
}

/// Anything that can return a listings search page for a box
#[async_trait]
pub trait ListingSearch: Send + Sync {
    fn unit_cost(&self) -> f64 {
        0.0
    }

    async fn search_listings(
        &self,
        kind: ListingKind,
        bbox: &BoundingBox,
    ) -> ProviderResult<Metered<SearchPage>>;
}

/// Open headless browser session
#[async_trait]
pub trait BrowserSession: ListingSearch {
    fn name(&self) -> &str;

    async fn close(&self) -> ProviderResult<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn name(&self) -> &str;

    /// Configured price of one call, charged when a dispatched call fails
    fn unit_cost(&self) -> f64 {
        0.0
    }

    async fn launch(&self) -> ProviderResult<Box<dyn BrowserSession>>;
}

/// Provider set handed to the blocs
#[derive(Clone)]
pub struct Providers {
    pub llm: Arc<dyn LlmProvider>,
    pub seo_primary: Arc<dyn SeoProvider>,
    pub seo_secondary: Arc<dyn SeoProvider>,
    pub social: Arc<dyn SocialProvider>,
    pub browser: Arc<dyn BrowserLauncher>,
}

impl Providers {
    /// Every provider fails with `NotConfigured`
    pub fn unconfigured() -> Self {
        let unconfigured = Arc::new(Unconfigured);
        Self {
            llm: unconfigured.clone(),
            seo_primary: unconfigured.clone(),
            seo_secondary: unconfigured.clone(),
            social: unconfigured.clone(),
            browser: unconfigured,
        }
    }
}

/// Placeholder for a provider without credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl Unconfigured {
    fn fail<T>() -> ProviderResult<T> {
        Err(ProviderError::NotConfigured("no credentials".to_string()))
    }
}

#[async_trait]
impl LlmProvider for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _prompt: &LlmPrompt) -> ProviderResult<Metered<String>> {
        Self::fail()
    }
}

#[async_trait]
impl SeoProvider for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn domain_metrics(&self, _domain: &str) -> ProviderResult<Metered<Option<DomainMetrics>>> {
        Self::fail()
    }

    async fn ranked_keywords(
        &self,
        _domain: &str,
        _limit: u32,
    ) -> ProviderResult<Metered<Vec<RankedKeyword>>> {
        Self::fail()
    }

    async fn keyword_ideas(
        &self,
        _seed: &str,
        _country: &str,
        _limit: u32,
    ) -> ProviderResult<Metered<Vec<KeywordIdea>>> {
        Self::fail()
    }

    async fn serp_position(
        &self,
        _keyword: &str,
        _domain: &str,
    ) -> ProviderResult<Metered<Option<u32>>> {
        Self::fail()
    }
}

#[async_trait]
impl SocialProvider for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn insights(&self, _handle: &str) -> ProviderResult<Metered<Option<SocialInsights>>> {
        Self::fail()
    }
}

#[async_trait]
impl BrowserLauncher for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn launch(&self) -> ProviderResult<Box<dyn BrowserSession>> {
        Self::fail()
    }
}
