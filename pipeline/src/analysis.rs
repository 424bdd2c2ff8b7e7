//! Analysis stage: `TicketCreated` in, oracle diagnosis, `AnalysisCompleted` out.
//!
//! Per message: decode, analyse, publish, then let the consumer loop commit.
//!
//! | Step fails            | Disposition | Effect                          |
//! |-----------------------|-------------|---------------------------------|
//! | decode                | `Poisoned`  | committed, skipped for good     |
//! | oracle error/timeout  | `Retry`     | rewound, analysed again later   |
//! | publish               | `Retry`     | rewound, analysed again later   |
//!
//! Re-analysis after a crash between publish and commit is harmless: the
//! materializer merge is idempotent.

use crate::decode_delivery;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use triage_core::environment::{Clock, SystemClock};
use triage_core::event::SerializedEvent;
use triage_core::event_bus::{Delivery, EventPublisher};
use triage_core::oracle::{Oracle, OracleError};
use triage_core::ticket::{AnalysisCompleted, TicketCreated};
use triage_runtime::{DeliveryHandler, Disposition, metrics};

/// Default per-call oracle timeout.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles creation events for the analysis consumer group.
pub struct AnalysisHandler {
    oracle: Arc<dyn Oracle>,
    publisher: Arc<dyn EventPublisher>,
    output_topic: String,
    clock: Arc<dyn Clock>,
    oracle_timeout: Duration,
}

impl AnalysisHandler {
    /// Analyse with `oracle` and publish results to `output_topic`.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn Oracle>,
        publisher: Arc<dyn EventPublisher>,
        output_topic: impl Into<String>,
    ) -> Self {
        Self {
            oracle,
            publisher,
            output_topic: output_topic.into(),
            clock: Arc::new(SystemClock),
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
        }
    }

    /// Replace the clock used for `analyzed_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every oracle call by `timeout`.
    #[must_use]
    pub const fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    async fn analyze(&self, ticket: &TicketCreated) -> Result<String, OracleError> {
        let oracle = self.oracle.name();
        let outcome =
            tokio::time::timeout(self.oracle_timeout, self.oracle.analyze(&ticket.payload)).await;

        match outcome {
            Ok(Ok(diagnosis)) => {
                metrics::record_oracle_call(oracle, "ok");
                Ok(diagnosis)
            }
            Ok(Err(e)) => {
                metrics::record_oracle_call(oracle, "error");
                Err(e)
            }
            Err(_) => {
                metrics::record_oracle_call(oracle, "timeout");
                Err(OracleError::Timeout(self.oracle_timeout))
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for AnalysisHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let ticket: TicketCreated = match decode_delivery(delivery) {
            Ok(ticket) => ticket,
            Err(reason) => return Disposition::Poisoned(reason),
        };
        debug!(ticket_id = %ticket.id, oracle = self.oracle.name(), "Analysing ticket");

        let result = match self.analyze(&ticket).await {
            Ok(result) => result,
            Err(e) => {
                warn!(ticket_id = %ticket.id, oracle = self.oracle.name(), error = %e, "Oracle failed");
                return Disposition::Retry(format!("oracle failed: {e}"));
            }
        };

        let analysis = AnalysisCompleted {
            ticket_id: ticket.id,
            result,
            analyzed_at: self.clock.now(),
        };
        let envelope = match SerializedEvent::from_event(&analysis) {
            Ok(envelope) => envelope,
            Err(e) => return Disposition::Retry(format!("failed to encode analysis: {e}")),
        };

        if let Err(e) = self
            .publisher
            .publish(&self.output_topic, analysis.ticket_id.as_str(), &envelope)
            .await
        {
            warn!(ticket_id = %analysis.ticket_id, error = %e, "Failed to publish analysis");
            return Disposition::Retry(format!("publish failed: {e}"));
        }

        info!(
            ticket_id = %analysis.ticket_id,
            topic = %self.output_topic,
            "Published analysis"
        );
        Disposition::Processed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use triage_core::ticket::TicketId;
    use triage_testing::mocks::test_clock;
    use triage_testing::{FailingOracle, InMemoryEventBus, ScriptedOracle, StalledOracle};

    fn delivery_of(created: &TicketCreated) -> Delivery {
        Delivery {
            topic: "tickets.new".to_string(),
            partition: 0,
            offset: 0,
            key: Some(created.id.to_string()),
            payload: SerializedEvent::from_event(created).unwrap().encode().unwrap(),
        }
    }

    fn ticket(payload: &str) -> TicketCreated {
        TicketCreated {
            id: TicketId::new("ticket-0001"),
            source: "monitor-x".to_string(),
            payload: payload.to_string(),
            created_at: test_clock().now(),
        }
    }

    fn handler(oracle: Arc<dyn Oracle>, bus: &InMemoryEventBus) -> AnalysisHandler {
        AnalysisHandler::new(oracle, Arc::new(bus.clone()), "tickets.analyzed")
            .with_clock(Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn publishes_diagnosis_keyed_by_ticket_id() {
        let bus = InMemoryEventBus::new();
        let oracle = Arc::new(ScriptedOracle::new("other").with_rule("disk", "disk space"));
        let handler = handler(oracle.clone(), &bus);

        let disposition = handler.handle(&delivery_of(&ticket("disk full on db1"))).await;

        assert_eq!(disposition, Disposition::Processed);
        assert_eq!(oracle.calls(), vec!["disk full on db1".to_string()]);
        let published = bus.events::<AnalysisCompleted>("tickets.analyzed");
        assert_eq!(
            published,
            vec![AnalysisCompleted {
                ticket_id: TicketId::new("ticket-0001"),
                result: "disk space".to_string(),
                analyzed_at: test_clock().now(),
            }]
        );
        assert_eq!(bus.messages("tickets.analyzed")[0].0.as_deref(), Some("ticket-0001"));
    }

    #[tokio::test]
    async fn undecodable_message_is_poisoned_without_oracle_call() {
        let bus = InMemoryEventBus::new();
        let oracle = Arc::new(ScriptedOracle::new("other"));
        let handler = handler(oracle.clone(), &bus);

        let mut delivery = delivery_of(&ticket("x"));
        delivery.payload = vec![0xde, 0xad];

        assert!(matches!(handler.handle(&delivery).await, Disposition::Poisoned(_)));
        assert!(oracle.calls().is_empty());
        assert_eq!(bus.message_count("tickets.analyzed"), 0);
    }

    #[tokio::test]
    async fn wrong_event_type_is_poisoned() {
        let bus = InMemoryEventBus::new();
        let handler = handler(Arc::new(ScriptedOracle::new("other")), &bus);

        let analysis = AnalysisCompleted {
            ticket_id: TicketId::new("t"),
            result: "r".to_string(),
            analyzed_at: test_clock().now(),
        };
        let mut delivery = delivery_of(&ticket("x"));
        delivery.payload = SerializedEvent::from_event(&analysis).unwrap().encode().unwrap();

        assert!(matches!(handler.handle(&delivery).await, Disposition::Poisoned(_)));
    }

    #[tokio::test]
    async fn oracle_failure_is_retried_and_nothing_published() {
        let bus = InMemoryEventBus::new();
        let oracle = Arc::new(FailingOracle::new(1, ScriptedOracle::new("ok")));
        let handler = handler(oracle.clone(), &bus);
        let delivery = delivery_of(&ticket("x"));

        assert!(matches!(handler.handle(&delivery).await, Disposition::Retry(_)));
        assert_eq!(bus.message_count("tickets.analyzed"), 0);

        assert_eq!(handler.handle(&delivery).await, Disposition::Processed);
        assert_eq!(oracle.attempts(), 2);
        assert_eq!(bus.message_count("tickets.analyzed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_oracle_times_out_into_retry() {
        let bus = InMemoryEventBus::new();
        let handler = handler(Arc::new(StalledOracle), &bus)
            .with_oracle_timeout(Duration::from_millis(250));

        let disposition = handler.handle(&delivery_of(&ticket("x"))).await;

        match disposition {
            Disposition::Retry(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_failure_is_retried() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);
        let handler = handler(Arc::new(ScriptedOracle::new("ok")), &bus);

        let disposition = handler.handle(&delivery_of(&ticket("x"))).await;

        assert!(matches!(disposition, Disposition::Retry(ref r) if r.contains("publish")));
        assert_eq!(bus.message_count("tickets.analyzed"), 0);
    }
}
