//! Ingestion stage: accept a submission, assign identity, publish `TicketCreated`.
//!
//! Publishing is fail-closed. A ticket is only reported as accepted once the
//! broker acknowledged the creation event; there is no internal retry.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use triage_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use triage_core::event::{EventError, SerializedEvent};
use triage_core::event_bus::{EventBusError, EventPublisher};
use triage_core::ticket::TicketCreated;
use triage_runtime::metrics;

/// Why a submission was not accepted.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The submission can never be accepted as given.
    #[error("Invalid submission: {0}")]
    InvalidSubmission(&'static str),

    /// The creation event could not be encoded.
    #[error("Failed to encode ticket event: {0}")]
    Encode(#[from] EventError),

    /// The broker did not acknowledge the creation event. Safe to resubmit.
    #[error("Failed to publish ticket: {0}")]
    Publish(#[from] EventBusError),
}

impl IngestionError {
    /// Whether resubmitting the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Publish(_))
    }
}

/// Producer side of the pipeline.
#[derive(Clone)]
pub struct Ingestion {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Ingestion {
    /// Publish to `topic` with wall-clock timestamps and random ids.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the id generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Accept a ticket and publish its creation event, keyed by the new id.
    ///
    /// # Errors
    ///
    /// - [`IngestionError::InvalidSubmission`] if `payload` is blank
    /// - [`IngestionError::Publish`] if the broker did not acknowledge the event
    pub async fn submit(
        &self,
        source: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<TicketCreated, IngestionError> {
        let payload = payload.into();
        if payload.trim().is_empty() {
            return Err(IngestionError::InvalidSubmission("payload must not be empty"));
        }

        let event = TicketCreated {
            id: self.ids.next_id(),
            source: source.into(),
            payload,
            created_at: self.clock.now(),
        };
        let envelope = SerializedEvent::from_event(&event)?;

        if let Err(e) = self
            .publisher
            .publish(&self.topic, event.id.as_str(), &envelope)
            .await
        {
            warn!(ticket_id = %event.id, topic = %self.topic, error = %e, "Ticket not accepted");
            return Err(e.into());
        }

        metrics::record_submission();
        info!(
            ticket_id = %event.id,
            source = %event.source,
            topic = %self.topic,
            "Ticket accepted"
        );
        Ok(event)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use triage_testing::mocks::{SequentialIds, test_clock};
    use triage_testing::InMemoryEventBus;

    fn ingestion(bus: &InMemoryEventBus) -> Ingestion {
        Ingestion::new(Arc::new(bus.clone()), "tickets.new")
            .with_clock(Arc::new(test_clock()))
            .with_id_generator(Arc::new(SequentialIds::new()))
    }

    #[tokio::test]
    async fn submission_is_published_keyed_by_id() {
        let bus = InMemoryEventBus::new();
        let created = ingestion(&bus)
            .submit("monitor-x", "disk full on db1")
            .await
            .unwrap();

        assert_eq!(created.id.as_str(), "ticket-0001");
        assert_eq!(created.created_at, test_clock().now());

        let messages = bus.messages("tickets.new");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0.as_deref(), Some("ticket-0001"));
        assert_eq!(bus.events::<TicketCreated>("tickets.new"), vec![created]);
    }

    #[tokio::test]
    async fn ids_are_distinct_per_submission() {
        let bus = InMemoryEventBus::new();
        let ingestion = ingestion(&bus);

        let first = ingestion.submit("a", "one").await.unwrap();
        let second = ingestion.submit("a", "one").await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(bus.message_count("tickets.new"), 2);
    }

    #[tokio::test]
    async fn blank_payload_is_rejected_before_publishing() {
        let bus = InMemoryEventBus::new();
        let err = ingestion(&bus).submit("monitor-x", "  \n").await.unwrap_err();

        assert!(matches!(err, IngestionError::InvalidSubmission(_)));
        assert!(!err.is_transient());
        assert_eq!(bus.message_count("tickets.new"), 0);
    }

    #[tokio::test]
    async fn empty_source_is_allowed() {
        let bus = InMemoryEventBus::new();
        let created = ingestion(&bus).submit("", "cpu hot").await.unwrap();
        assert_eq!(created.source, "");
    }

    #[tokio::test]
    async fn publish_failure_fails_the_submission() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        let err = ingestion(&bus).submit("monitor-x", "disk full").await.unwrap_err();

        assert!(matches!(err, IngestionError::Publish(_)));
        assert!(err.is_transient());
        assert_eq!(bus.message_count("tickets.new"), 0);
    }
}
