//! Configuration for tda-audit
//!
//! Loaded from `tda-audit.toml` (missing file means defaults), then secrets
//! and the bind address are overridden from the environment:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `TDA_BIND` | `server.bind` |
//! | `TDA_LLM_API_KEY` | `providers.llm.api_key` |
//! | `TDA_SEO_API_KEY` | `providers.seo_primary.api_key` |
//! | `TDA_SEO_SECONDARY_API_KEY` | `providers.seo_secondary.api_key` |
//! | `TDA_SOCIAL_API_KEY` | `providers.social.api_key` |
//! | `TDA_BROWSER_API_KEY` | `providers.browser.api_key` |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tda_common::config::{env_override, load_toml_or_default, LoggingConfig};
use tda_common::{Error, Result};
use tracing::info;

use crate::models::Segment;
use crate::services::geo_partition::GeoPartitionConfig;

/// Environment variable for the root folder
pub const ROOT_FOLDER_ENV: &str = "TDA_ROOT_FOLDER";

/// Module name used for the default config path
pub const MODULE_NAME: &str = "tda-audit";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "tda.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub root_folder: Option<String>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub geo: GeoConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Event bus capacity for SSE broadcasting
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5740".to_string(),
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub segment_a_timeout_secs: u64,
    pub segment_b_timeout_secs: u64,
    pub segment_c_timeout_secs: u64,
    /// Log entries returned by the status query when `?logs` is absent
    pub default_log_limit: u32,
    /// Ranked keywords requested from the SEO provider (bloc 3)
    pub ranked_keyword_limit: u32,
    /// Keyword candidates proposed at the first gate (bloc 4A)
    pub keyword_candidate_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_a_timeout_secs: 780,
            segment_b_timeout_secs: 780,
            segment_c_timeout_secs: 120,
            default_log_limit: 50,
            ranked_keyword_limit: 100,
            keyword_candidate_limit: 30,
        }
    }
}

impl PipelineConfig {
    /// Wall-clock ceiling of one segment invocation
    pub fn segment_timeout(&self, segment: Segment) -> Duration {
        let secs = match segment {
            Segment::A => self.segment_a_timeout_secs,
            Segment::B => self.segment_b_timeout_secs,
            Segment::C => self.segment_c_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub threshold: u64,
    pub max_depth: u32,
    pub request_delay_ms: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        let defaults = GeoPartitionConfig::default();
        Self {
            threshold: defaults.threshold,
            max_depth: defaults.max_depth,
            request_delay_ms: defaults.request_delay.as_millis() as u64,
        }
    }
}

impl GeoConfig {
    pub fn partition_config(&self) -> GeoPartitionConfig {
        GeoPartitionConfig {
            threshold: self.threshold,
            max_depth: self.max_depth,
            request_delay: Duration::from_millis(self.request_delay_ms),
        }
    }
}

/// Connection settings for one external provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Model name, LLM only
    pub model: Option<String>,
    pub timeout_secs: u64,
    /// Minimum spacing between two requests
    pub min_interval_ms: u64,
    /// Flat price of one call
    pub unit_cost: f64,
    /// Price per 1000 tokens, LLM only
    pub cost_per_1k_tokens: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: None,
            timeout_secs: 30,
            min_interval_ms: 0,
            unit_cost: 0.0,
            cost_per_1k_tokens: 0.0,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Both an endpoint and a usable key are present
    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(is_valid_key)
            && self.api_key.as_deref().is_some_and(is_valid_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub llm: ProviderConfig,
    pub seo_primary: ProviderConfig,
    pub seo_secondary: ProviderConfig,
    pub social: ProviderConfig,
    pub browser: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            // Local gateway: short timeout
            llm: ProviderConfig {
                model: Some("gpt-4o-mini".to_string()),
                timeout_secs: 60,
                cost_per_1k_tokens: 0.0006,
                ..Default::default()
            },
            seo_primary: ProviderConfig {
                unit_cost: 0.01,
                ..Default::default()
            },
            seo_secondary: ProviderConfig {
                unit_cost: 0.02,
                ..Default::default()
            },
            social: ProviderConfig {
                unit_cost: 0.005,
                ..Default::default()
            },
            // Scraping through a remote browser: long timeout, spaced requests
            browser: ProviderConfig {
                timeout_secs: 120,
                min_interval_ms: 500,
                unit_cost: 0.002,
                ..Default::default()
            },
        }
    }
}

impl AuditConfig {
    /// Load the TOML file then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: AuditConfig = load_toml_or_default(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override("TDA_BIND") {
            info!("Bind address loaded from environment variable");
            self.server.bind = bind;
        }

        let secrets = [
            ("TDA_LLM_API_KEY", &mut self.providers.llm),
            ("TDA_SEO_API_KEY", &mut self.providers.seo_primary),
            ("TDA_SEO_SECONDARY_API_KEY", &mut self.providers.seo_secondary),
            ("TDA_SOCIAL_API_KEY", &mut self.providers.social),
            ("TDA_BROWSER_API_KEY", &mut self.providers.browser),
        ];
        for (var, provider) in secrets {
            if let Some(key) = env_override(var) {
                info!(variable = var, "API key loaded from environment variable");
                provider.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.geo.threshold == 0 {
            return Err(Error::Config("geo.threshold must be greater than 0".to_string()));
        }
        let p = &self.pipeline;
        if p.segment_a_timeout_secs == 0
            || p.segment_b_timeout_secs == 0
            || p.segment_c_timeout_secs == 0
        {
            return Err(Error::Config(
                "pipeline segment timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
