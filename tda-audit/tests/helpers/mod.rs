//! Test helpers: scripted providers and in-memory pipelines
//!
//! Each fake counts its calls so tests can assert that a re-triggered
//! segment never reaches a provider.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tda_audit::config::AuditConfig;
use tda_audit::models::{
    BoundingBox, DomainMetrics, KeywordIdea, ListingKind, RankedKeyword, SearchPage,
    SocialInsights,
};
use tda_audit::services::providers::{
    BrowserLauncher, BrowserSession, ListingSearch, LlmPrompt, LlmProvider, Metered,
    ProviderError, ProviderResult, Providers, SeoProvider, SocialProvider,
};
use tda_audit::services::AuditPipeline;
use tda_audit::AppState;
use tda_common::events::EventBus;

pub const LLM_COST: f64 = 0.01;
pub const SEO_COST: f64 = 0.02;
pub const BROWSER_COST: f64 = 0.001;

/// Language model answering by prompt shape
#[derive(Default)]
pub struct ScriptedLlm {
    pub calls: AtomicU32,
    /// Prompts containing this text fail
    pub fail_on: Option<&'static str>,
}

impl ScriptedLlm {
    fn answer(user: &str) -> String {
        if user.contains("tourism positioning") {
            json!({
                "summary": "Alpine lake town with a preserved old town",
                "strengths": ["lake", "old town"],
                "target_audiences": ["families", "hikers"],
            })
            .to_string()
        } else if user.contains("official tourism office website") {
            r#"The official site is: {"domain": "https://www.annecy-tourisme.com/"}"#.to_string()
        } else if user.contains("search keywords") {
            "```json\n{\"keywords\": [\"paddle annecy\", \"Lac d'Annecy\"]}\n```".to_string()
        } else if user.contains("activity offer") {
            "Water sports in summer, hiking and cycling in shoulder seasons.".to_string()
        } else if user.contains("compete with it") {
            json!([
                {"name": "Chamonix", "country": "France", "website": "chamonix.com", "rationale": "alpine"},
                {"name": "Lake Como", "country": "Italy", "website": null, "rationale": "lake"},
            ])
            .to_string()
        } else if user.contains("Compare the online visibility") {
            "Annecy trails Chamonix on organic traffic.".to_string()
        } else {
            "{}".to_string()
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "llm"
    }

    async fn complete(&self, prompt: &LlmPrompt) -> ProviderResult<Metered<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_on {
            if prompt.user.contains(marker) {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "model overloaded".to_string(),
                });
            }
        }
        Ok(Metered::new(Self::answer(&prompt.user), LLM_COST))
    }
}

/// SEO provider knowing a fixed set of domains
pub struct ScriptedSeo {
    pub name: &'static str,
    pub known_domains: HashSet<&'static str>,
    pub failing: bool,
    pub calls: AtomicU32,
}

impl ScriptedSeo {
    pub fn new(name: &'static str, known_domains: &[&'static str]) -> Self {
        Self {
            name,
            known_domains: known_domains.iter().copied().collect(),
            failing: false,
            calls: AtomicU32::new(0),
        }
    }

    fn call(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            Err(ProviderError::Network("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SeoProvider for ScriptedSeo {
    fn name(&self) -> &str {
        self.name
    }

    async fn domain_metrics(&self, domain: &str) -> ProviderResult<Metered<Option<DomainMetrics>>> {
        self.call()?;
        let metrics = self.known_domains.contains(domain).then(|| DomainMetrics {
            domain: domain.to_string(),
            organic_keywords: Some(1200),
            organic_traffic: Some(45_000),
            backlinks: Some(8_000),
            referring_domains: Some(640),
            domain_rank: Some(52.0),
        });
        Ok(Metered::new(metrics, SEO_COST))
    }

    async fn ranked_keywords(
        &self,
        domain: &str,
        limit: u32,
    ) -> ProviderResult<Metered<Vec<RankedKeyword>>> {
        self.call()?;
        let keywords = if self.known_domains.contains(domain) {
            vec![
                RankedKeyword {
                    keyword: "annecy tourisme".to_string(),
                    position: 4,
                    search_volume: Some(2400),
                    url: None,
                },
                RankedKeyword {
                    keyword: "lac annecy".to_string(),
                    position: 1,
                    search_volume: Some(9900),
                    url: None,
                },
            ]
        } else {
            Vec::new()
        };
        Ok(Metered::new(
            keywords.into_iter().take(limit as usize).collect(),
            SEO_COST,
        ))
    }

    async fn keyword_ideas(
        &self,
        _seed: &str,
        _country: &str,
        _limit: u32,
    ) -> ProviderResult<Metered<Vec<KeywordIdea>>> {
        self.call()?;
        Ok(Metered::new(
            vec![
                KeywordIdea {
                    keyword: "lac d'annecy".to_string(),
                    search_volume: Some(14_800),
                },
                KeywordIdea {
                    keyword: "annecy plage".to_string(),
                    search_volume: Some(3_600),
                },
            ],
            SEO_COST,
        ))
    }

    async fn serp_position(&self, _keyword: &str, domain: &str) -> ProviderResult<Metered<Option<u32>>> {
        self.call()?;
        let position = self.known_domains.contains(domain).then_some(3);
        Ok(Metered::new(position, SEO_COST))
    }
}

/// Social provider that always fails
#[derive(Default)]
pub struct FailingSocial {
    pub calls: AtomicU32,
}

#[async_trait]
impl SocialProvider for FailingSocial {
    fn name(&self) -> &str {
        "social"
    }

    async fn insights(&self, _handle: &str) -> ProviderResult<Metered<Option<SocialInsights>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Blocked("login wall".to_string()))
    }
}

/// Browser whose every search page shows `count` results
pub struct ScriptedBrowser {
    pub count: u64,
    pub launches: Arc<AtomicU32>,
    pub closes: Arc<AtomicU32>,
    pub searches: Arc<AtomicU32>,
}

impl ScriptedBrowser {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            launches: Arc::new(AtomicU32::new(0)),
            closes: Arc::new(AtomicU32::new(0)),
            searches: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct ScriptedSession {
    count: u64,
    closes: Arc<AtomicU32>,
    searches: Arc<AtomicU32>,
}

#[async_trait]
impl ListingSearch for ScriptedSession {
    async fn search_listings(
        &self,
        _kind: ListingKind,
        _bbox: &BoundingBox,
    ) -> ProviderResult<Metered<SearchPage>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(Metered::new(
            SearchPage {
                structured: Some(json!({ "total_count": self.count })),
                content: String::new(),
                card_count: None,
            },
            BROWSER_COST,
        ))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    fn name(&self) -> &str {
        "browser"
    }

    async fn close(&self) -> ProviderResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    fn name(&self) -> &str {
        "browser"
    }

    async fn launch(&self) -> ProviderResult<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            count: self.count,
            closes: self.closes.clone(),
            searches: self.searches.clone(),
        }))
    }
}

/// Handles on the fakes behind a pipeline
pub struct Fakes {
    pub llm: Arc<ScriptedLlm>,
    pub seo_primary: Arc<ScriptedSeo>,
    pub seo_secondary: Arc<ScriptedSeo>,
    pub social: Arc<FailingSocial>,
    pub browser: Arc<ScriptedBrowser>,
}

impl Fakes {
    /// Primary knows the destination only under its www host, secondary
    /// knows the competitor; social always fails.
    pub fn new() -> Self {
        Self {
            llm: Arc::new(ScriptedLlm::default()),
            seo_primary: Arc::new(ScriptedSeo::new(
                "seo_primary",
                &["annecy-tourisme.com", "www.annecy-tourisme.com"],
            )),
            seo_secondary: Arc::new(ScriptedSeo::new("seo_secondary", &["chamonix.com"])),
            social: Arc::new(FailingSocial::default()),
            browser: Arc::new(ScriptedBrowser::new(42)),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            llm: self.llm.clone(),
            seo_primary: self.seo_primary.clone(),
            seo_secondary: self.seo_secondary.clone(),
            social: self.social.clone(),
            browser: self.browser.clone(),
        }
    }

    /// Provider calls across every fake
    pub fn total_calls(&self) -> u32 {
        self.llm.calls.load(Ordering::SeqCst)
            + self.seo_primary.calls.load(Ordering::SeqCst)
            + self.seo_secondary.calls.load(Ordering::SeqCst)
            + self.social.calls.load(Ordering::SeqCst)
            + self.browser.searches.load(Ordering::SeqCst)
    }
}

/// Config with no inter-request delay
pub fn test_config() -> AuditConfig {
    let mut config = AuditConfig::default();
    config.geo.request_delay_ms = 0;
    config
}

pub async fn memory_pool() -> SqlitePool {
    tda_audit::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

pub async fn test_pipeline(providers: Providers) -> (AuditPipeline, SqlitePool, EventBus) {
    let pool = memory_pool().await;
    let event_bus = EventBus::new(256);
    let pipeline = AuditPipeline::new(pool.clone(), event_bus.clone(), providers, &test_config());
    (pipeline, pool, event_bus)
}

pub async fn test_app(providers: Providers) -> (axum::Router, SqlitePool) {
    let (pipeline, pool, event_bus) = test_pipeline(providers).await;
    let state = AppState::new(pool.clone(), event_bus, pipeline);
    (tda_audit::build_router(state), pool)
}

/// Start request body for Annecy with a bounding box
pub fn annecy_request() -> serde_json::Value {
    json!({
        "name": "Annecy",
        "country": "France",
        "region": "Haute-Savoie",
        "social_handle": "annecy_tourisme",
        "bbox": {"south": 45.85, "west": 6.08, "north": 45.95, "east": 6.20},
    })
}
