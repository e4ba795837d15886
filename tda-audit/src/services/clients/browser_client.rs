//! Remote headless browser client
//!
//! Sessions are opened on the browser gateway and reused for every listings
//! search of a bloc, then closed explicitly.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::JsonGateway;
use crate::config::ProviderConfig;
use crate::models::{BoundingBox, ListingKind, SearchPage};
use crate::services::providers::{
    BrowserLauncher, BrowserSession, ListingSearch, Metered, ProviderResult,
};

#[derive(Debug, Deserialize)]
struct SessionHandle {
    session_id: String,
}

pub struct HttpBrowserLauncher {
    name: String,
    gateway: Arc<JsonGateway>,
}

impl HttpBrowserLauncher {
    pub fn new(name: &str, config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            name: name.to_string(),
            gateway: Arc::new(JsonGateway::new(config)?),
        })
    }
}

#[async_trait]
impl BrowserLauncher for HttpBrowserLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit_cost(&self) -> f64 {
        self.gateway.unit_cost()
    }

    async fn launch(&self) -> ProviderResult<Box<dyn BrowserSession>> {
        let handle: Metered<SessionHandle> = self
            .gateway
            .post("/sessions", &json!({ "headless": true }))
            .await?;
        tracing::debug!(session_id = %handle.data.session_id, "Browser session opened");

        Ok(Box::new(HttpBrowserSession {
            name: self.name.clone(),
            session_id: handle.data.session_id,
            gateway: self.gateway.clone(),
        }))
    }
}

struct HttpBrowserSession {
    name: String,
    session_id: String,
    gateway: Arc<JsonGateway>,
}

#[async_trait]
impl ListingSearch for HttpBrowserSession {
    fn unit_cost(&self) -> f64 {
        self.gateway.unit_cost()
    }

    async fn search_listings(
        &self,
        kind: ListingKind,
        bbox: &BoundingBox,
    ) -> ProviderResult<Metered<SearchPage>> {
        self.gateway
            .post(
                &format!("/sessions/{}/listings", self.session_id),
                &json!({ "kind": kind, "bbox": bbox }),
            )
            .await
    }
}

#[async_trait]
impl BrowserSession for HttpBrowserSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> ProviderResult<()> {
        self.gateway
            .delete(&format!("/sessions/{}", self.session_id))
            .await?;
        tracing::debug!(session_id = %self.session_id, "Browser session closed");
        Ok(())
    }
}
