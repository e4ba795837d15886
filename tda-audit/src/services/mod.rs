//! Audit services
//!
//! - `audit_pipeline`: entry points used by the HTTP layer
//! - `audit_orchestrator`: segment runner and the seven blocs
//! - `providers` / `clients`: provider seams and their HTTP adapters
//! - `fallback`, `geo_partition`: collection strategies shared by the blocs
//! - `audit_logger`, `cost_ledger`: best-effort bookkeeping

pub mod audit_logger;
pub mod audit_orchestrator;
pub mod audit_pipeline;
pub mod clients;
pub mod cost_ledger;
pub mod domain;
pub mod fallback;
pub mod geo_partition;
pub mod providers;

pub use audit_logger::AuditLogger;
pub use audit_orchestrator::{
    BlocContext, BlocExecutor, BlocFailure, BlocOutput, GateSelection, ProviderBlocExecutor,
    SegmentOutcome, SegmentRunner, SubStepFailure,
};
pub use audit_pipeline::{AuditPipeline, AuditReport, OpenGate, StartAuditRequest, StartedAudit};
pub use clients::build_providers;
pub use fallback::{FallbackOutcome, FallbackRole, ProviderFallbackPolicy};
pub use geo_partition::{GeoPartitionConfig, GeoPartitionCounter, QueryPacer};
pub use providers::{ProviderError, Providers};
