//! Typed bloc results
//!
//! Each bloc produces its own result shape. `BlocResult` is the tagged union
//! stored in the audit's result map; the orchestrator only moves it around,
//! while downstream blocs re-specialize the variant they consume.

use serde::{Deserialize, Serialize};

use super::bloc::BlocName;
use super::provider_data::{DomainMetrics, RankedKeyword, SocialInsights};

/// Outcome of a geographic partition count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoCount {
    /// Sum of the trusted leaf counts
    pub total: u64,
    /// Provider queries issued
    pub queries: u32,
    /// Boxes whose count was below the threshold
    pub exact_leaves: u32,
    /// Saturated boxes at the depth limit, contributing 0
    pub truncated_leaves: u32,
    /// Boxes whose query failed or yielded no count, contributing 0
    pub failed_queries: u32,
}

impl GeoCount {
    /// True when every box resolved below the threshold
    pub fn is_exact(&self) -> bool {
        self.truncated_leaves == 0 && self.failed_queries == 0
    }
}

/// Bloc 1
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositioningResult {
    pub summary: Option<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub target_audiences: Vec<String>,
    /// Official website domain used by the SEO blocs
    pub detected_domain: Option<String>,
    /// "declared" when taken from the request, "llm" when detected
    pub domain_source: Option<String>,
}

/// Bloc 2
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalPresenceResult {
    pub domain: Option<String>,
    pub domain_metrics: Option<DomainMetrics>,
    pub social: Option<SocialInsights>,
}

/// Bloc 3
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoVisibilityResult {
    pub domain: Option<String>,
    #[serde(default)]
    pub keywords: Vec<RankedKeyword>,
    /// Provider that answered, `None` when no provider had data
    pub provider: Option<String>,
    pub total_search_volume: u64,
}

/// Keyword proposed at gate 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCandidate {
    pub keyword: String,
    #[serde(default)]
    pub search_volume: Option<u64>,
    /// "seo", "llm" or "manual"
    #[serde(default = "manual_source")]
    pub source: String,
    pub kept: bool,
}

/// Keyword checked against the live results page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedKeyword {
    pub keyword: String,
    pub search_volume: Option<u64>,
    /// Position of the destination domain, `None` when absent or unchecked
    pub position: Option<u32>,
    pub checked: bool,
}

/// Bloc 4
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordOpportunitiesResult {
    #[serde(default)]
    pub candidates: Vec<KeywordCandidate>,
    #[serde(default)]
    pub verified: Vec<VerifiedKeyword>,
}

impl KeywordOpportunitiesResult {
    pub fn kept(&self) -> impl Iterator<Item = &KeywordCandidate> {
        self.candidates.iter().filter(|c| c.kept)
    }
}

/// Bloc 5
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccommodationStockResult {
    pub rentals: Option<GeoCount>,
    pub hotels: Option<GeoCount>,
}

/// Bloc 6
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityOfferResult {
    pub activities: Option<GeoCount>,
    pub synthesis: Option<String>,
}

/// Competitor destination proposed at gate 2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorCandidate {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    pub kept: bool,
}

/// SEO figures gathered for one validated competitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorBenchmark {
    pub name: String,
    pub domain: Option<String>,
    pub metrics: Option<DomainMetrics>,
}

/// Bloc 7
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitorsResult {
    #[serde(default)]
    pub candidates: Vec<CompetitorCandidate>,
    #[serde(default)]
    pub benchmarks: Vec<CompetitorBenchmark>,
    pub comparison: Option<String>,
}

impl CompetitorsResult {
    pub fn kept(&self) -> impl Iterator<Item = &CompetitorCandidate> {
        self.candidates.iter().filter(|c| c.kept)
    }
}

fn manual_source() -> String {
    "manual".to_string()
}

/// Result payload of any bloc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "bloc", content = "data", rename_all = "snake_case")]
pub enum BlocResult {
    Positioning(PositioningResult),
    DigitalPresence(DigitalPresenceResult),
    SeoVisibility(SeoVisibilityResult),
    KeywordOpportunities(KeywordOpportunitiesResult),
    AccommodationStock(AccommodationStockResult),
    ActivityOffer(ActivityOfferResult),
    Competitors(CompetitorsResult),
}

impl BlocResult {
    pub fn bloc(&self) -> BlocName {
        match self {
            BlocResult::Positioning(_) => BlocName::Positioning,
            BlocResult::DigitalPresence(_) => BlocName::DigitalPresence,
            BlocResult::SeoVisibility(_) => BlocName::SeoVisibility,
            BlocResult::KeywordOpportunities(_) => BlocName::KeywordOpportunities,
            BlocResult::AccommodationStock(_) => BlocName::AccommodationStock,
            BlocResult::ActivityOffer(_) => BlocName::ActivityOffer,
            BlocResult::Competitors(_) => BlocName::Competitors,
        }
    }

    /// Candidate count for gate-opening results
    pub fn candidate_count(&self) -> usize {
        match self {
            BlocResult::KeywordOpportunities(r) => r.candidates.len(),
            BlocResult::Competitors(r) => r.candidates.len(),
            _ => 0,
        }
    }
}
