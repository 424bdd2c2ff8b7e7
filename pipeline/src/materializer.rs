//! Materializer: two independent loops folding both topics into the read model.
//!
//! Loop A merges `TicketCreated`, loop B merges `AnalysisCompleted`. Each runs
//! under its own consumer group and commits only after the repository write
//! succeeded. The repository merge is idempotent and commutative per ticket,
//! so the loops need no coordination with each other.

use crate::decode_delivery;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use triage_core::event_bus::Delivery;
use triage_core::repository::{RepositoryError, TicketRepository};
use triage_core::ticket::{AnalysisCompleted, MergeOutcome, TicketCreated, TicketId};
use triage_runtime::{DeliveryHandler, Disposition, metrics};

/// Loop A: merges creation events.
pub struct CreatedHandler {
    repository: Arc<dyn TicketRepository>,
}

impl CreatedHandler {
    /// Write to `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn TicketRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl DeliveryHandler for CreatedHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event: TicketCreated = match decode_delivery(delivery) {
            Ok(event) => event,
            Err(reason) => return Disposition::Poisoned(reason),
        };
        let merged = self.repository.record_created(&event).await;
        settle("created", &event.id, merged)
    }
}

/// Loop B: merges analysis events, creating a placeholder when the ticket is unknown.
pub struct AnalyzedHandler {
    repository: Arc<dyn TicketRepository>,
}

impl AnalyzedHandler {
    /// Write to `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn TicketRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl DeliveryHandler for AnalyzedHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event: AnalysisCompleted = match decode_delivery(delivery) {
            Ok(event) => event,
            Err(reason) => return Disposition::Poisoned(reason),
        };
        let merged = self.repository.record_analysis(&event).await;
        settle("analysis", &event.ticket_id, merged)
    }
}

/// Store failures are transient: the message is redelivered.
fn settle(
    kind: &'static str,
    id: &TicketId,
    merged: Result<MergeOutcome, RepositoryError>,
) -> Disposition {
    match merged {
        Ok(outcome) => {
            metrics::record_merge(kind, outcome.as_str());
            debug!(ticket_id = %id, kind, outcome = outcome.as_str(), "Merged event");
            Disposition::Processed
        }
        Err(e) => {
            metrics::record_merge(kind, "error");
            warn!(ticket_id = %id, kind, error = %e, "Failed to merge event");
            Disposition::Retry(format!("store write failed: {e}"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use triage_core::environment::Clock;
    use triage_core::event::{Event, SerializedEvent};
    use triage_core::ticket::TicketStatus;
    use triage_testing::InMemoryTicketRepository;
    use triage_testing::mocks::test_clock;

    fn delivery<E: Event>(event: &E) -> Delivery {
        Delivery {
            topic: "t".to_string(),
            partition: 0,
            offset: 7,
            key: Some(event.partition_key().to_string()),
            payload: SerializedEvent::from_event(event).unwrap().encode().unwrap(),
        }
    }

    fn created() -> TicketCreated {
        TicketCreated {
            id: TicketId::new("ticket-0001"),
            source: "monitor-x".to_string(),
            payload: "disk full on db1".to_string(),
            created_at: test_clock().now(),
        }
    }

    fn analysis() -> AnalysisCompleted {
        AnalysisCompleted {
            ticket_id: TicketId::new("ticket-0001"),
            result: "disk space".to_string(),
            analyzed_at: test_clock().now() + Duration::seconds(2),
        }
    }

    #[tokio::test]
    async fn creation_is_stored_once() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let handler = CreatedHandler::new(repo.clone());

        assert_eq!(handler.handle(&delivery(&created())).await, Disposition::Processed);
        assert_eq!(handler.handle(&delivery(&created())).await, Disposition::Processed);

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.ticket("ticket-0001").unwrap().status, TicketStatus::New);
    }

    #[tokio::test]
    async fn analysis_before_creation_converges() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let created_loop = CreatedHandler::new(repo.clone());
        let analyzed_loop = AnalyzedHandler::new(repo.clone());

        analyzed_loop.handle(&delivery(&analysis())).await;
        assert!(repo.ticket("ticket-0001").unwrap().is_placeholder());

        created_loop.handle(&delivery(&created())).await;
        let ticket = repo.ticket("ticket-0001").unwrap();
        assert_eq!(ticket.status, TicketStatus::Analyzed);
        assert_eq!(ticket.payload, "disk full on db1");
        assert_eq!(ticket.analysis_result.as_deref(), Some("disk space"));
    }

    #[tokio::test]
    async fn malformed_payload_is_poisoned() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let handler = AnalyzedHandler::new(repo.clone());
        let mut bad = delivery(&analysis());
        bad.payload.truncate(3);

        assert!(matches!(handler.handle(&bad).await, Disposition::Poisoned(_)));
        assert_eq!(repo.write_attempts(), 0);
    }

    #[tokio::test]
    async fn creation_on_the_analysis_loop_is_poisoned() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let handler = AnalyzedHandler::new(repo.clone());

        assert!(matches!(
            handler.handle(&delivery(&created())).await,
            Disposition::Poisoned(_)
        ));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_retried() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        repo.fail_next_writes(1);
        let handler = CreatedHandler::new(repo.clone());

        assert!(matches!(
            handler.handle(&delivery(&created())).await,
            Disposition::Retry(_)
        ));
        assert!(repo.is_empty());
        assert_eq!(handler.handle(&delivery(&created())).await, Disposition::Processed);
        assert_eq!(repo.len(), 1);
    }
}
