//! HTTP API handlers for tda-audit
//!
//! JSON REST endpoints for the audit lifecycle plus an SSE push channel.

pub mod audits;
pub mod health;
pub mod sse;

pub use audits::audit_routes;
pub use health::health_routes;
pub use sse::event_stream;
