use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An append-only fact about an order.
///
/// Events are never mutated or deleted. They are the audit trail and the
/// surface the idempotency check queries: at most one event of a given
/// type exists per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The order this event belongs to.
    pub order_id: OrderId,

    /// The transition that produced the event (e.g. "payment_charged").
    pub event_type: String,

    /// The step output as JSON.
    pub payload: serde_json::Value,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates a new event with a fresh ID.
    pub fn new(
        order_id: OrderId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            order_id,
            event_type: event_type.into(),
            payload,
            timestamp,
        }
    }

    /// Deserializes the payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
