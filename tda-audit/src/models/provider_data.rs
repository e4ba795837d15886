//! Data shapes returned by external providers

use serde::{Deserialize, Serialize};

/// SEO authority and traffic figures for one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainMetrics {
    pub domain: String,
    pub organic_keywords: Option<u64>,
    pub organic_traffic: Option<u64>,
    pub backlinks: Option<u64>,
    pub referring_domains: Option<u64>,
    pub domain_rank: Option<f64>,
}

/// Keyword the domain currently ranks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedKeyword {
    pub keyword: String,
    pub position: u32,
    pub search_volume: Option<u64>,
    pub url: Option<String>,
}

/// Keyword idea returned for a seed term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordIdea {
    pub keyword: String,
    pub search_volume: Option<u64>,
}

/// Audience figures for a social account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialInsights {
    pub handle: String,
    pub followers: Option<u64>,
    pub posts_last_30_days: Option<u32>,
    pub engagement_rate: Option<f64>,
}

/// Kind of listing searched on the listings site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Rentals,
    Hotels,
    Activities,
}

impl ListingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ListingKind::Rentals => "rentals",
            ListingKind::Hotels => "hotels",
            ListingKind::Activities => "activities",
        }
    }
}

/// Raw search results page captured by the browser
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    /// Structured payload embedded in the page (JSON state blob), if any
    pub structured: Option<serde_json::Value>,
    /// Visible text content of the page
    pub content: String,
    /// Number of result cards rendered on the page
    pub card_count: Option<u64>,
}
