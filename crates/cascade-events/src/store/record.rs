//! The flat persisted projection of an [`Event`].
//!
//! Persistence never stores the live bus object; it stores this flat
//! record and reconstructs defensively — a record written by an older
//! build with missing optional fields still loads, with defaults, and
//! never errors a read path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cascade_core::{Event, EventStatus};

/// Flat persisted event record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event ID (primary key).
    pub id: String,
    /// Dotted taxonomy string.
    pub event_type: String,
    /// Producing component.
    pub source: String,
    /// Conversation correlation key.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// User correlation key.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session correlation key.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Ordered parent event IDs.
    #[serde(default)]
    pub parent_events: Vec<String>,
    /// Resolved chain root.
    #[serde(default)]
    pub root_event_id: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Status at store time.
    #[serde(default = "default_status")]
    pub status: EventStatus,
    /// Handlers that succeeded.
    #[serde(default)]
    pub processed_by: Vec<String>,
    /// Failure detail.
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_status() -> EventStatus {
    EventStatus::Pending
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            conversation_id: event.conversation_id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            parent_events: event.parent_events.clone(),
            root_event_id: event.root_event_id.clone(),
            data: event.data.clone(),
            metadata: event.metadata.clone(),
            status: event.status,
            processed_by: event.processed_by.clone(),
            error_message: event.error_message.clone(),
        }
    }
}

impl EventRecord {
    /// Reconstruct a bus-shaped [`Event`]. Fields the record does not
    /// carry (target, priority) take their defaults.
    #[must_use]
    pub fn into_event(self) -> Event {
        let mut event = Event::new(self.event_type, self.source);
        event.event_id = self.id;
        event.timestamp = self.timestamp;
        event.conversation_id = self.conversation_id;
        event.user_id = self.user_id;
        event.session_id = self.session_id;
        event.data = self.data;
        event.metadata = self.metadata;
        event.status = self.status;
        event.parent_events = self.parent_events;
        event.root_event_id = self.root_event_id;
        event.processed_by = self.processed_by;
        event.error_message = self.error_message;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::event::user_input_event;

    #[test]
    fn projection_round_trip() {
        let mut event = user_input_event("c1", "hello").with_user("u1");
        event.root_event_id = Some(event.event_id.clone());
        let record = EventRecord::from(&event);
        assert_eq!(record.id, event.event_id);

        let back = record.into_event();
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.conversation_id, event.conversation_id);
        assert_eq!(back.root_event_id, event.root_event_id);
        assert_eq!(back.data, event.data);
    }

    #[test]
    fn missing_optional_fields_default() {
        // A minimal record, as an older writer might have produced.
        let json = r#"{
            "id": "evt_1",
            "event_type": "x.y",
            "source": "src",
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, EventStatus::Pending);
        assert!(record.parent_events.is_empty());
        assert!(record.conversation_id.is_none());
        assert!(record.data.is_empty());
    }
}
