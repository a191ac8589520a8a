//! Event records as they move from the store to the handlers.
//!
//! The transport hands over [`WireEvent`]s; the delivery loop maps each one to a
//! transport-agnostic [`ReceivedEvent`] before running the handler pipeline, and
//! keeps the [`EventRef`] around to acknowledge it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

/// An entry as recorded by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique identifier for this event
    pub id: String,
    /// Stream the event was appended to
    pub stream_id: String,
    /// Position within `stream_id`
    pub stream_position: u64,
    /// Position within the whole log
    pub global_position: u64,
    /// Event type (e.g., "OrderCreated", "PaymentSucceeded")
    pub event_type: String,
    /// Assigned by the store on append
    pub created: DateTime<Utc>,
    /// Serialized payload (typically JSON or binary)
    pub data: Vec<u8>,
    /// Serialized metadata
    pub metadata: Vec<u8>,
}

impl RecordedEvent {
    /// Create a recorded event with an empty metadata payload.
    pub fn new(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        stream_position: u64,
        global_position: u64,
        event_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            stream_position,
            global_position,
            event_type: event_type.into(),
            created: Utc::now(),
            data,
            metadata: Vec::new(),
        }
    }

    /// Set the metadata payload.
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the creation timestamp.
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// An event as delivered by the transport on a live subscription.
///
/// When the subscription resolves links, `event` is the resolved target and
/// `link` is the link entry that was actually read from the subscribed stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireEvent {
    pub event: RecordedEvent,
    pub link: Option<RecordedEvent>,
    /// How many times the server has already delivered this entry.
    pub retry_count: u32,
}

impl WireEvent {
    pub fn new(event: RecordedEvent) -> Self {
        Self {
            event,
            link: None,
            retry_count: 0,
        }
    }

    pub fn with_link(mut self, link: RecordedEvent) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// The entry the server tracks for acknowledgement.
    pub fn original(&self) -> &RecordedEvent {
        self.link.as_ref().unwrap_or(&self.event)
    }

    /// Reference used to ack or nack this delivery.
    pub fn event_ref(&self) -> EventRef {
        let original = self.original();
        EventRef {
            event_id: original.id.clone(),
            global_position: original.global_position,
        }
    }
}

/// Identifies one delivered entry towards the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventRef {
    pub event_id: String,
    pub global_position: u64,
}

/// Canonical, transport-agnostic representation of one log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub event_id: String,
    /// Position in the subscribed log. Non-decreasing within one attachment.
    pub global_position: u64,
    pub stream_id: String,
    pub stream_position: u64,
    pub event_type: String,
    pub created: DateTime<Utc>,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    /// Number of earlier delivery attempts reported by the server.
    pub retry_count: u32,
}

impl ReceivedEvent {
    /// Map a transport event field by field.
    ///
    /// Identity, type and payload come from the resolved event; the global
    /// position comes from the entry read on the subscribed log.
    pub fn from_wire(wire: &WireEvent) -> Self {
        let event = &wire.event;
        Self {
            event_id: event.id.clone(),
            global_position: wire.original().global_position,
            stream_id: event.stream_id.clone(),
            stream_position: event.stream_position,
            event_type: event.event_type.clone(),
            created: event.created,
            data: event.data.clone(),
            metadata: event.metadata.clone(),
            retry_count: wire.retry_count,
        }
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Decode the payload from JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        serde_json::from_slice(&self.data).map_err(|source| SerializationError::Json {
            event_type: self.event_type.clone(),
            source,
        })
    }

    /// Decode the payload from bitcode binary format.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        bitcode::deserialize(&self.data).map_err(|source| SerializationError::Bitcode {
            event_type: self.event_type.clone(),
            source,
        })
    }
}

impl From<&WireEvent> for ReceivedEvent {
    fn from(wire: &WireEvent) -> Self {
        ReceivedEvent::from_wire(wire)
    }
}
