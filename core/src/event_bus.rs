//! Event bus abstraction: keyed publishing and group consumers with explicit commits.
//!
//! Stages never share memory. The ingestion and analysis stages publish
//! envelopes with [`EventPublisher::publish`]; the analysis and materializer
//! stages read them through an [`EventConsumer`] obtained from
//! [`EventBus::subscribe`].
//!
//! # Delivery contract
//!
//! ```text
//!   fetch() ──▶ Delivery ──▶ process ──┬─▶ commit(&delivery)     position moves past it
//!                                       └─▶ redeliver(&delivery)  same delivery is fetched again
//! ```
//!
//! - **At-least-once**: a delivery is only acknowledged by [`EventConsumer::commit`],
//!   which the caller issues *after* processing. A crash before the commit
//!   means the message is delivered again after restart.
//! - **Per-key order**: every event about one ticket is published with the
//!   ticket id as key, so one partition holds them all in order.
//! - **No skipping**: after a transient failure the caller uses
//!   [`EventConsumer::redeliver`] so the next fetch returns the failed message,
//!   not its successor.
//!
//! # Dyn Compatibility
//!
//! The traits return `Pin<Box<dyn Future>>` instead of `async fn` so stages can
//! hold `Arc<dyn EventBus>` and `Box<dyn EventConsumer>`.

use crate::event::SerializedEvent;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Errors that can occur during event bus operations.
///
/// All of them are transient from a stage's point of view: the broker may
/// come back, so the caller backs off and tries again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to join a consumer group
    #[error("Subscription failed for topic '{topic}' (group '{group}'): {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The consumer group
        group: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to fetch the next message
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Failed to commit a consumer position
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Failed to rewind a consumer position
    #[error("Seek failed: {0}")]
    SeekFailed(String),
}

/// One message handed to a consumer, with the coordinates needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, if it was valid UTF-8.
    pub key: Option<String>,
    /// Raw message value.
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Decode the payload as an event envelope.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` for bytes that are not an envelope.
    pub fn envelope(&self) -> Result<SerializedEvent, crate::event::EventError> {
        SerializedEvent::decode(&self.payload)
    }
}

/// Write side of the bus.
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope under `key` and wait for the broker to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::PublishFailed` if the broker rejects the write or
    /// does not acknowledge it in time.
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, event: &'a SerializedEvent)
    -> BusFuture<'a, ()>;
}

/// A member of a consumer group reading one topic.
///
/// The consumer is owned by a single processing loop, so methods take `&mut self`.
pub trait EventConsumer: Send {
    /// Wait up to `max_wait` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::FetchFailed` if the broker cannot be read.
    fn fetch(&mut self, max_wait: Duration) -> BusFuture<'_, Option<Delivery>>;

    /// Acknowledge `delivery`, moving the group position past it.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::CommitFailed` if the position cannot be stored.
    fn commit<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()>;

    /// Rewind so that the next fetch returns `delivery` again.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::SeekFailed` if the position cannot be moved.
    fn redeliver<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()>;
}

/// Factory for publishers and consumers on one broker.
pub trait EventBus: EventPublisher {
    /// Join `group` on `topic`.
    ///
    /// Members of the same group share the topic's partitions; distinct groups
    /// each see every message.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::SubscriptionFailed` if the group cannot be joined.
    fn subscribe<'a>(&'a self, topic: &'a str, group: &'a str)
    -> BusFuture<'a, Box<dyn EventConsumer>>;
}
