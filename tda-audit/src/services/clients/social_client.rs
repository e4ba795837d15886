//! Social insights gateway client

use async_trait::async_trait;
use serde_json::json;

use super::JsonGateway;
use crate::config::ProviderConfig;
use crate::models::SocialInsights;
use crate::services::providers::{Metered, ProviderResult, SocialProvider};

pub struct HttpSocialClient {
    name: String,
    gateway: JsonGateway,
}

impl HttpSocialClient {
    pub fn new(name: &str, config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            name: name.to_string(),
            gateway: JsonGateway::new(config)?,
        })
    }
}

#[async_trait]
impl SocialProvider for HttpSocialClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit_cost(&self) -> f64 {
        self.gateway.unit_cost()
    }

    async fn insights(&self, handle: &str) -> ProviderResult<Metered<Option<SocialInsights>>> {
        let handle = handle.trim_start_matches('@');
        self.gateway
            .post("/insights", &json!({ "handle": handle }))
            .await
    }
}
