//! Data models for tda-audit
//!
//! - Audit lifecycle and snapshots
//! - Bloc state machine and segment plans
//! - Cost ledger, log entries, typed bloc results

pub mod audit;
pub mod audit_log;
pub mod bloc;
pub mod cost;
pub mod destination;
pub mod provider_data;
pub mod results;
pub mod segment;

pub use audit::{Audit, AuditSnapshot, AuditStatus};
pub use audit_log::{LogEntry, LogLevel};
pub use bloc::{BlocName, BlocPhase, BlocStatus, IllegalTransition};
pub use cost::{BlocCost, CostEntry, CostLedger, CostTracker};
pub use destination::{BoundingBox, Destination, DestinationRequest};
pub use provider_data::{
    DomainMetrics, KeywordIdea, ListingKind, RankedKeyword, SearchPage, SocialInsights,
};
pub use results::{
    AccommodationStockResult, ActivityOfferResult, BlocResult, CompetitorBenchmark,
    CompetitorCandidate, CompetitorsResult, DigitalPresenceResult, GeoCount, KeywordCandidate,
    KeywordOpportunitiesResult, PositioningResult, SeoVisibilityResult, VerifiedKeyword,
};
pub use segment::{BlocStep, Segment};
