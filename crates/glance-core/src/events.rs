//! Server event types, envelope schema, and event bus for real-time notifications.
//!
//! The event bus is the in-process fan-out point for completion events.
//! Downstream consumers (WebSocket sessions, SSE streams, telemetry)
//! subscribe independently and filter on the envelope's actor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ResultSummary;

// ============================================================================
// Event Envelope
// ============================================================================

/// Actor metadata for event attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventActor {
    /// Actor type: `"system"` or `"user"`.
    pub kind: String,
    /// Optional actor identifier (user ID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventActor {
    /// System actor (background jobs, internal processes).
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    /// User actor; listeners scope delivery by this ID.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id.into()),
        }
    }

    /// Whether this actor is the given user.
    pub fn is_user(&self, user_id: &str) -> bool {
        self.kind == "user" && self.id.as_deref() == Some(user_id)
    }
}

/// Optional emission context (actor and correlation).
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Who the event concerns. Defaults to the system actor.
    pub actor: Option<EventActor>,
    /// Correlation ID for tracing related events across operations.
    pub correlation_id: Option<Uuid>,
}

/// Versioned event envelope.
///
/// The `event_type` field uses dot-namespaced names (e.g. `"capture.analyzed"`).
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    pub actor: EventActor,
    /// ID of the entity this event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Payload schema version.
    pub payload_version: u32,
    pub payload: ServerEvent,
}

impl EventEnvelope {
    /// Create an envelope from a ServerEvent with default (system) context.
    pub fn new(event: ServerEvent) -> Self {
        Self::with_context(event, EventContext::default())
    }

    /// Create an envelope with explicit context.
    pub fn with_context(event: ServerEvent, ctx: EventContext) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            actor: ctx.actor.unwrap_or_else(EventActor::system),
            entity_id: event.entity_id().map(|id| id.to_string()),
            correlation_id: ctx.correlation_id,
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Server Event (domain payloads)
// ============================================================================

/// Domain events pushed to listeners, serialized with a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Queue depth snapshot.
    QueueStatus { pending: i64, processing: i64 },
    /// A capture finished analysis.
    CaptureAnalyzed {
        job_id: Uuid,
        summary: ResultSummary,
    },
}

impl ServerEvent {
    /// Namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            ServerEvent::QueueStatus { .. } => "queue.status",
            ServerEvent::CaptureAnalyzed { .. } => "capture.analyzed",
        }
    }

    /// Primary entity ID this event relates to.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::QueueStatus { .. } => None,
            ServerEvent::CaptureAnalyzed { job_id, .. } => Some(*job_id),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events;
/// real-time streams favour freshness over completeness.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit with system context. Returns the number of receivers reached.
    pub fn emit(&self, event: ServerEvent) -> usize {
        self.emit_with_context(event, EventContext::default())
    }

    /// Emit with explicit context. Returns the number of receivers reached.
    pub fn emit_with_context(&self, event: ServerEvent, ctx: EventContext) -> usize {
        let envelope = EventEnvelope::with_context(event, ctx);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
