//! Server-Sent Events (SSE) for audit progress
//!
//! Push channel only: a client that misses events reads GET /audits/:id.

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;

/// GET /events query
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this audit
    pub audit_id: Option<Uuid>,
}

/// GET /events - SSE stream of audit events
///
/// Streams AuditStarted, SegmentStarted, BlocStatusChanged,
/// AwaitingValidation, SegmentCompleted, AuditLogAppended, AuditCompleted
/// and AuditFailed.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(audit_id = ?query.audit_id, "New SSE client connected to audit events");

    let mut rx = state.event_bus.subscribe();
    let filter = query.audit_id;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if filter.is_some_and(|id| id != event.audit_id()) {
                        continue;
                    }
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting audit event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: Client lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
