//! Geographic partition counter
//!
//! Listing sites cap the count they display ("1 000+ logements"). To get a
//! usable figure for a whole destination the bounding box is queried, and any
//! box whose count is saturated is split into four quadrants and counted
//! again, down to a maximum depth.
//!
//! Saturated boxes at the depth limit are not queried and contribute 0; they
//! are reported in `truncated_leaves` so the undercount is visible.
//!
//! Queries are paced per browser session, not per count: counts that share a
//! session must share one [`QueryPacer`].

use regex::Regex;
use std::time::Duration;
use tokio::sync::Mutex;

use super::providers::{charge_failure, ListingSearch};
use crate::models::{BoundingBox, CostTracker, GeoCount, ListingKind, SearchPage};

/// Count pattern for raw page text, English and French listing sites
const DEFAULT_COUNT_PATTERN: &str = r"(?i)(?P<over>over|more than|plus de)?\s*(?P<count>\d{1,3}(?:[\s\x{00A0}\x{202F},.]\d{3})+|\d+)\s*(?P<plus>\+)?\s*(?:logements|hébergements|hebergements|stays|listings|results|résultats|resultats|homes|properties|hotels|hôtels|activities|activités|activites|experiences)";

/// Default JSON pointer of the total in the page's embedded state
const DEFAULT_STRUCTURED_POINTER: &str = "/total_count";

#[derive(Debug, Clone)]
pub struct GeoPartitionConfig {
    /// Counts at or above this are treated as saturated
    pub threshold: u64,
    /// Boxes at this depth are not queried (root is depth 0)
    pub max_depth: u32,
    /// Pause before every provider query on a session
    pub request_delay: Duration,
}

impl Default for GeoPartitionConfig {
    fn default() -> Self {
        Self {
            threshold: 1000,
            max_depth: 4,
            request_delay: Duration::from_millis(1500),
        }
    }
}

/// Spaces the queries sent on one browser session
///
/// The pause is taken while holding the lock, and the lock is fair, so
/// concurrent counts take turns and no two query starts on the session are
/// closer than `delay`.
#[derive(Debug)]
pub struct QueryPacer {
    delay: Duration,
    turn: Mutex<()>,
}

impl QueryPacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            turn: Mutex::new(()),
        }
    }

    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let _turn = self.turn.lock().await;
        tokio::time::sleep(self.delay).await;
    }
}

/// Count read from a results page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedCount {
    Exact(u64),
    /// Displayed as a lower bound ("1 000+", "over 1,000")
    AtLeast(u64),
}

/// One way of reading a count off a page, tried in order
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    /// Number (or count text) at a JSON pointer in the structured payload
    StructuredField { pointer: String },
    /// Regex over the visible text with a `count` group and optional
    /// `over`/`plus` lower-bound markers
    Pattern(Regex),
    /// Number of rendered result cards
    VisibleCards,
}

impl ExtractionStrategy {
    pub fn extract(&self, page: &SearchPage) -> Option<ReportedCount> {
        match self {
            ExtractionStrategy::StructuredField { pointer } => {
                let value = page.structured.as_ref()?.pointer(pointer)?;
                if let Some(n) = value.as_u64() {
                    return Some(ReportedCount::Exact(n));
                }
                value.as_str().and_then(parse_count_text)
            }
            ExtractionStrategy::Pattern(regex) => {
                let caps = regex.captures(&page.content)?;
                let count = digits_to_u64(caps.name("count")?.as_str())?;
                if caps.name("over").is_some() || caps.name("plus").is_some() {
                    Some(ReportedCount::AtLeast(count))
                } else {
                    Some(ReportedCount::Exact(count))
                }
            }
            ExtractionStrategy::VisibleCards => page.card_count.map(ReportedCount::Exact),
        }
    }
}

/// "1 000+", "over 1,000", "347"
fn parse_count_text(text: &str) -> Option<ReportedCount> {
    let count = digits_to_u64(text)?;
    let lower = text.to_lowercase();
    if text.contains('+') || lower.contains("over") || lower.contains("plus de") {
        Some(ReportedCount::AtLeast(count))
    } else {
        Some(ReportedCount::Exact(count))
    }
}

fn digits_to_u64(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Recursive quadrant counter
#[derive(Debug, Clone)]
pub struct GeoPartitionCounter {
    config: GeoPartitionConfig,
    strategies: Vec<ExtractionStrategy>,
}

impl GeoPartitionCounter {
    /// Counter with the default strategies: structured → pattern → cards
    pub fn new(config: GeoPartitionConfig) -> Self {
        let pattern = Regex::new(DEFAULT_COUNT_PATTERN).ok();
        let mut strategies = vec![ExtractionStrategy::StructuredField {
            pointer: DEFAULT_STRUCTURED_POINTER.to_string(),
        }];
        if let Some(pattern) = pattern {
            strategies.push(ExtractionStrategy::Pattern(pattern));
        }
        strategies.push(ExtractionStrategy::VisibleCards);
        Self::with_strategies(config, strategies)
    }

    pub fn with_strategies(config: GeoPartitionConfig, strategies: Vec<ExtractionStrategy>) -> Self {
        Self { config, strategies }
    }

    pub fn config(&self) -> &GeoPartitionConfig {
        &self.config
    }

    /// Pacer for one browser session, shared by every count run on it
    pub fn pacer(&self) -> QueryPacer {
        QueryPacer::new(self.config.request_delay)
    }

    /// First strategy that yields a count wins
    pub fn extract_count(&self, page: &SearchPage) -> Option<ReportedCount> {
        self.strategies.iter().find_map(|s| s.extract(page))
    }

    /// Count `kind` listings inside `bbox`
    ///
    /// Never fails: provider errors and unreadable pages contribute 0 and are
    /// reported in `failed_queries`. Every query is charged to `tracker` under
    /// `provider` and waits its turn on `pacer`.
    pub async fn count<S>(
        &self,
        source: &S,
        pacer: &QueryPacer,
        provider: &str,
        kind: ListingKind,
        bbox: &BoundingBox,
        tracker: &CostTracker,
    ) -> GeoCount
    where
        S: ListingSearch + ?Sized,
    {
        let mut result = GeoCount::default();
        let mut pending: Vec<(BoundingBox, u32)> = vec![(*bbox, 0)];

        while let Some((cell, depth)) = pending.pop() {
            if depth >= self.config.max_depth {
                result.truncated_leaves += 1;
                continue;
            }

            pacer.wait().await;

            result.queries += 1;
            let page = match source.search_listings(kind, &cell).await {
                Ok(metered) => {
                    tracker.charge(provider, metered.cost);
                    metered.data
                }
                Err(e) => {
                    charge_failure(tracker, provider, source.unit_cost(), &e);
                    result.failed_queries += 1;
                    tracing::warn!(
                        kind = kind.as_str(),
                        depth,
                        error = %e,
                        "Listings query failed, box contributes 0"
                    );
                    continue;
                }
            };

            match self.extract_count(&page) {
                Some(ReportedCount::Exact(n)) if n < self.config.threshold => {
                    result.total += n;
                    result.exact_leaves += 1;
                }
                Some(reported) => {
                    tracing::debug!(
                        kind = kind.as_str(),
                        depth,
                        ?reported,
                        "Box saturated, splitting into quadrants"
                    );
                    for quadrant in cell.quadrants() {
                        pending.push((quadrant, depth + 1));
                    }
                }
                None => {
                    result.failed_queries += 1;
                    tracing::warn!(
                        kind = kind.as_str(),
                        depth,
                        "No count found on results page, box contributes 0"
                    );
                }
            }
        }

        tracing::info!(
            kind = kind.as_str(),
            total = result.total,
            queries = result.queries,
            truncated_leaves = result.truncated_leaves,
            failed_queries = result.failed_queries,
            "Geographic partition count finished"
        );

        result
    }
}
