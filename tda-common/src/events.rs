//! Event types for the audit event system
//!
//! Provides the shared `AuditEvent` enum and the broadcast `EventBus` used to
//! push audit progress to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Audit pipeline events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// Bloc and status names travel as their wire strings so that subscribers do
/// not depend on the service's model types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    /// Audit created or reset for a destination
    AuditStarted {
        audit_id: Uuid,
        destination_id: Uuid,
        destination_name: String,
        /// True when an existing audit was reset by a forced start
        reset: bool,
        timestamp: DateTime<Utc>,
    },

    /// Segment invocation began executing blocs
    SegmentStarted {
        audit_id: Uuid,
        segment: String,
        timestamp: DateTime<Utc>,
    },

    /// Bloc status transition committed
    BlocStatusChanged {
        audit_id: Uuid,
        bloc: String,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Segment paused on a validation gate
    AwaitingValidation {
        audit_id: Uuid,
        bloc: String,
        candidate_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Segment invocation finished (gate reached or audit complete)
    SegmentCompleted {
        audit_id: Uuid,
        segment: String,
        audit_status: String,
        failed_blocs: Vec<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Entry appended to the persistent audit log
    AuditLogAppended {
        audit_id: Uuid,
        bloc: Option<String>,
        level: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Audit reached `complete`
    AuditCompleted {
        audit_id: Uuid,
        total_cost: f64,
        timestamp: DateTime<Utc>,
    },

    /// Audit marked `failed` after a fatal orchestrator error
    AuditFailed {
        audit_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::AuditStarted { .. } => "AuditStarted",
            AuditEvent::SegmentStarted { .. } => "SegmentStarted",
            AuditEvent::BlocStatusChanged { .. } => "BlocStatusChanged",
            AuditEvent::AwaitingValidation { .. } => "AwaitingValidation",
            AuditEvent::SegmentCompleted { .. } => "SegmentCompleted",
            AuditEvent::AuditLogAppended { .. } => "AuditLogAppended",
            AuditEvent::AuditCompleted { .. } => "AuditCompleted",
            AuditEvent::AuditFailed { .. } => "AuditFailed",
        }
    }

    /// Audit the event belongs to
    pub fn audit_id(&self) -> Uuid {
        match self {
            AuditEvent::AuditStarted { audit_id, .. }
            | AuditEvent::SegmentStarted { audit_id, .. }
            | AuditEvent::BlocStatusChanged { audit_id, .. }
            | AuditEvent::AwaitingValidation { audit_id, .. }
            | AuditEvent::SegmentCompleted { audit_id, .. }
            | AuditEvent::AuditLogAppended { audit_id, .. }
            | AuditEvent::AuditCompleted { audit_id, .. }
            | AuditEvent::AuditFailed { audit_id, .. } => *audit_id,
        }
    }
}

/// Broadcast bus for audit events
///
/// Cloning is cheap; every clone shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuditEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    ///
    /// ```
    /// use tda_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AuditEvent,
    ) -> Result<usize, broadcast::error::SendError<AuditEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// The push channel is best-effort; the status query endpoint is the
    /// fallback for clients that miss events.
    pub fn emit_lossy(&self, event: AuditEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let audit_id = Uuid::new_v4();

        bus.emit_lossy(AuditEvent::SegmentStarted {
            audit_id,
            segment: "A".to_string(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "SegmentStarted");
        assert_eq!(event.audit_id(), audit_id);
    }

    #[test]
    fn emit_without_subscribers_reports_error() {
        let bus = EventBus::new(10);
        let result = bus.emit(AuditEvent::AuditFailed {
            audit_id: Uuid::new_v4(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        // Lossy variant never panics or errors
        bus.emit_lossy(AuditEvent::AuditFailed {
            audit_id: Uuid::new_v4(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AuditEvent::AwaitingValidation {
            audit_id: Uuid::nil(),
            bloc: "keyword_opportunities".to_string(),
            candidate_count: 12,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AwaitingValidation");
        assert_eq!(json["candidate_count"], 12);
    }
}
