//! SEO data gateway client

use async_trait::async_trait;
use serde_json::json;

use super::JsonGateway;
use crate::config::ProviderConfig;
use crate::models::{DomainMetrics, KeywordIdea, RankedKeyword};
use crate::services::providers::{Metered, ProviderResult, SeoProvider};

pub struct HttpSeoClient {
    name: String,
    gateway: JsonGateway,
}

impl HttpSeoClient {
    pub fn new(name: &str, config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            name: name.to_string(),
            gateway: JsonGateway::new(config)?,
        })
    }
}

#[async_trait]
impl SeoProvider for HttpSeoClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit_cost(&self) -> f64 {
        self.gateway.unit_cost()
    }

    async fn domain_metrics(&self, domain: &str) -> ProviderResult<Metered<Option<DomainMetrics>>> {
        self.gateway
            .post("/domain/metrics", &json!({ "domain": domain }))
            .await
    }

    async fn ranked_keywords(
        &self,
        domain: &str,
        limit: u32,
    ) -> ProviderResult<Metered<Vec<RankedKeyword>>> {
        self.gateway
            .post(
                "/domain/ranked-keywords",
                &json!({ "domain": domain, "limit": limit }),
            )
            .await
    }

    async fn keyword_ideas(
        &self,
        seed: &str,
        country: &str,
        limit: u32,
    ) -> ProviderResult<Metered<Vec<KeywordIdea>>> {
        self.gateway
            .post(
                "/keywords/ideas",
                &json!({ "seed": seed, "country": country, "limit": limit }),
            )
            .await
    }

    async fn serp_position(
        &self,
        keyword: &str,
        domain: &str,
    ) -> ProviderResult<Metered<Option<u32>>> {
        self.gateway
            .post("/serp/position", &json!({ "keyword": keyword, "domain": domain }))
            .await
    }
}
