//! Event trait and the wire envelope shared by every topic.
//!
//! Events are immutable facts. They travel over the bus as a bincode-encoded
//! [`SerializedEvent`] envelope whose `data` field is itself the bincode
//! encoding of the concrete event struct:
//!
//! ```text
//! Kafka key   = ticket id (UTF-8)
//! Kafka value = bincode(SerializedEvent { event_type, data: bincode(event) })
//! ```
//!
//! The envelope lets a consumer tell a foreign or corrupt message apart from
//! a valid one before it touches any state: anything that fails
//! [`SerializedEvent::decode`] or [`SerializedEvent::to_event`] is *malformed*
//! and is skipped by the stages rather than retried.
//!
//! # Example
//!
//! ```
//! use triage_core::event::{Event, SerializedEvent};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct Pinged {
//!     host: String,
//! }
//!
//! impl Event for Pinged {
//!     const EVENT_TYPE: &'static str = "Pinged.v1";
//!
//!     fn partition_key(&self) -> &str {
//!         &self.host
//!     }
//! }
//!
//! let event = Pinged { host: "db1".to_string() };
//! let bytes = SerializedEvent::from_event(&event).unwrap().encode().unwrap();
//! let back: Pinged = SerializedEvent::decode(&bytes).unwrap().to_event().unwrap();
//! assert_eq!(back, event);
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The envelope carried a different event type than the one expected.
    #[error("Unexpected event type: expected {expected}, found {found}")]
    UnexpectedEventType {
        /// Type the consumer was reading
        expected: &'static str,
        /// Type found in the envelope
        found: String,
    },
}

/// An immutable domain event that can travel over the bus.
///
/// # Event Naming Convention
///
/// `EVENT_TYPE` is a stable identifier with a version suffix
/// (`"TicketCreated.v1"`), so the schema can evolve without old consumers
/// misreading new payloads.
///
/// # Partitioning
///
/// `partition_key` decides the bus partition. Every event about one ticket
/// returns that ticket's id, which keeps per-ticket ordering inside a topic.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable, versioned type identifier.
    const EVENT_TYPE: &'static str;

    /// Key used to partition this event on the bus.
    fn partition_key(&self) -> &str;

    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// belong to a different schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// The envelope written to the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "TicketCreated.v1").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>) -> Self {
        Self { event_type, data }
    }

    /// Wrap a typed event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event>(event: &E) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
        })
    }

    /// Encode the envelope into the bytes that go on the wire.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` for anything that is not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }

    /// Unwrap the typed event, checking the envelope's type tag first.
    ///
    /// # Errors
    ///
    /// - `EventError::UnexpectedEventType` if the tag names another event
    /// - `EventError::DeserializationError` if the data does not decode
    pub fn to_event<E: Event>(&self) -> Result<E, EventError> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventError::UnexpectedEventType {
                expected: E::EVENT_TYPE,
                found: self.event_type.clone(),
            });
        }
        E::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
