//! HTTP adapters for the provider seams
//!
//! SEO, social and browser providers are reached through JSON gateways that
//! answer `{"cost": <f64>?, "result": <payload>}`. The LLM speaks the
//! OpenAI-compatible chat completions protocol.

mod browser_client;
mod llm_client;
mod seo_client;
mod social_client;

pub use browser_client::HttpBrowserLauncher;
pub use llm_client::HttpLlmClient;
pub use seo_client::HttpSeoClient;
pub use social_client::HttpSocialClient;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::providers::{Metered, ProviderError, ProviderResult, Providers};
use crate::config::{ProviderConfig, ProvidersConfig};

const USER_AGENT: &str = concat!("tda-audit/", env!("CARGO_PKG_VERSION"));

/// Enforces a minimum interval between requests
pub(crate) struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    pub(crate) async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    #[serde(default)]
    cost: Option<f64>,
    result: T,
}

/// JSON gateway shared by the SEO, social and browser adapters
pub(crate) struct JsonGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    unit_cost: f64,
    rate_limiter: RateLimiter,
}

impl JsonGateway {
    pub(crate) fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("base_url".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("api_key".to_string()))?;

        Ok(Self {
            http: http_client(config.timeout())?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            unit_cost: config.unit_cost,
            rate_limiter: RateLimiter::new(config.min_interval_ms),
        })
    }

    pub(crate) fn unit_cost(&self) -> f64 {
        self.unit_cost
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B) -> ProviderResult<Metered<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.rate_limiter.wait().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Calling provider gateway");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let envelope: GatewayEnvelope<T> = check_status(response).await?.json().await?;

        Ok(Metered::new(
            envelope.result,
            envelope.cost.unwrap_or(self.unit_cost),
        ))
    }

    pub(crate) async fn delete(&self, path: &str) -> ProviderResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.delete(&url).bearer_auth(&self.api_key).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

pub(crate) fn http_client(timeout: Duration) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Map non-success statuses onto provider errors
pub(crate) async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::FORBIDDEN && message.to_lowercase().contains("captcha") {
        return Err(ProviderError::Blocked(message));
    }
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Build the provider set from configuration
///
/// Providers without an endpoint or key stay `Unconfigured` and every call
/// to them fails.
pub fn build_providers(config: &ProvidersConfig) -> Providers {
    let mut providers = Providers::unconfigured();

    match configured(&config.llm, "llm").map(|c| HttpLlmClient::new("llm", c)) {
        Some(Ok(client)) => providers.llm = Arc::new(client),
        Some(Err(e)) => tracing::error!(provider = "llm", error = %e, "Failed to initialize provider"),
        None => {}
    }
    match configured(&config.seo_primary, "seo_primary")
        .map(|c| HttpSeoClient::new("seo_primary", c))
    {
        Some(Ok(client)) => providers.seo_primary = Arc::new(client),
        Some(Err(e)) => {
            tracing::error!(provider = "seo_primary", error = %e, "Failed to initialize provider")
        }
        None => {}
    }
    match configured(&config.seo_secondary, "seo_secondary")
        .map(|c| HttpSeoClient::new("seo_secondary", c))
    {
        Some(Ok(client)) => providers.seo_secondary = Arc::new(client),
        Some(Err(e)) => {
            tracing::error!(provider = "seo_secondary", error = %e, "Failed to initialize provider")
        }
        None => {}
    }
    match configured(&config.social, "social").map(|c| HttpSocialClient::new("social", c)) {
        Some(Ok(client)) => providers.social = Arc::new(client),
        Some(Err(e)) => tracing::error!(provider = "social", error = %e, "Failed to initialize provider"),
        None => {}
    }
    match configured(&config.browser, "browser").map(|c| HttpBrowserLauncher::new("browser", c)) {
        Some(Ok(launcher)) => providers.browser = Arc::new(launcher),
        Some(Err(e)) => {
            tracing::error!(provider = "browser", error = %e, "Failed to initialize provider")
        }
        None => {}
    }

    providers
}

fn configured<'a>(config: &'a ProviderConfig, name: &str) -> Option<&'a ProviderConfig> {
    if config.is_configured() {
        tracing::info!(provider = name, "Provider configured");
        Some(config)
    } else {
        tracing::warn!(provider = name, "Provider not configured, its calls will fail");
        None
    }
}
