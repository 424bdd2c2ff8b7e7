//! # Triage Redpanda
//!
//! Kafka-compatible [`EventBus`] implementation for Redpanda (and Kafka).
//!
//! # Delivery Semantics
//!
//! - **Publish**: keyed by ticket id and awaited until the broker acknowledges
//!   (`acks=all` by default), so a returned `Ok` means the event is durable.
//! - **Consume**: auto-commit is disabled. Each [`RedpandaConsumer`] hands out
//!   one message per `fetch`, and the caller commits it explicitly after
//!   processing. `redeliver` seeks the partition back to the failed offset,
//!   because librdkafka's in-memory position has already moved past it.
//!
//! # Example
//!
//! ```no_run
//! use triage_redpanda::RedpandaEventBus;
//! use triage_core::event_bus::{EventBus, EventPublisher};
//! use triage_core::event::SerializedEvent;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! let event = SerializedEvent::new("TicketCreated.v1".to_string(), vec![]);
//! bus.publish("tickets.new", "ticket-1", &event).await?;
//!
//! let mut consumer = bus.subscribe("tickets.new", "triage-analysis-dev").await?;
//! if let Some(delivery) = consumer.fetch(Duration::from_millis(500)).await? {
//!     // ... process ...
//!     consumer.commit(&delivery).await?;
//! }
//! # Ok(())
//! # }
//! ```

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use triage_core::event::SerializedEvent;
use triage_core::event_bus::{
    BusFuture, Delivery, EventBus, EventBusError, EventConsumer, EventPublisher,
};

/// Redpanda-backed event bus.
///
/// Holds one shared producer; every `subscribe` creates a dedicated consumer
/// so each loop owns its group membership.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaEventBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::ConnectionFailed` if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get the broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Create any of `topics` that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::ConnectionFailed` if the admin client cannot be
    /// created or a topic cannot be created for a reason other than already existing.
    pub async fn ensure_topics(&self, topics: &[&str], partitions: i32) -> Result<(), EventBusError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|name| NewTopic::new(name, partitions, TopicReplication::Fixed(1)))
            .collect();
        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

        let results = admin
            .create_topics(&new_topics, &options)
            .await
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create topics: {e}")))?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic = %topic, partitions, "Created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %topic, "Topic already exists");
                }
                Err((topic, code)) => {
                    return Err(EventBusError::ConnectionFailed(format!(
                        "Failed to create topic '{topic}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Wait for every in-flight publish to be acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::PublishFailed` if the queue does not drain within `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| EventBusError::PublishFailed {
                topic: "*".to_string(),
                reason: format!("Failed to flush producer: {e}"),
            })
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set producer timeout (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a group with no committed offset starts (default: "earliest").
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set consumer session timeout (default: 10 seconds).
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::ConnectionFailed` if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

impl EventPublisher for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        event: &'a SerializedEvent,
    ) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let payload = event.encode().map_err(|e| EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

            let record = FutureRecord::to(topic).payload(&payload).key(key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        key,
                        partition,
                        offset,
                        event_type = %event.event_type,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, key, error = %kafka_error, "Failed to publish event");
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> BusFuture<'a, Box<dyn EventConsumer>> {
        Box::pin(async move {
            let failed = |reason: String| EventBusError::SubscriptionFailed {
                topic: topic.to_string(),
                group: group.to_string(),
                reason,
            };

            // Manual commits only: a message is acknowledged after processing.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", group)
                .set("enable.auto.commit", "false")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set(
                    "session.timeout.ms",
                    self.session_timeout.as_millis().to_string(),
                )
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[topic])
                .map_err(|e| failed(format!("Failed to subscribe to topic: {e}")))?;

            tracing::info!(
                topic,
                group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let consumer: Box<dyn EventConsumer> = Box::new(RedpandaConsumer {
                consumer: Arc::new(consumer),
                group: group.to_string(),
                timeout: self.timeout,
            });
            Ok(consumer)
        })
    }
}

/// One consumer-group member created by [`RedpandaEventBus::subscribe`].
pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
    group: String,
    timeout: Duration,
}

impl RedpandaConsumer {
    /// Run a blocking librdkafka call off the async worker threads.
    async fn blocking<F>(&self, call: F) -> Result<(), String>
    where
        F: FnOnce(&StreamConsumer) -> Result<(), String> + Send + 'static,
    {
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || call(&consumer))
            .await
            .map_err(|e| e.to_string())?
    }
}

impl EventConsumer for RedpandaConsumer {
    fn fetch(&mut self, max_wait: Duration) -> BusFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let Ok(received) = tokio::time::timeout(max_wait, self.consumer.recv()).await else {
                return Ok(None);
            };
            let message = received.map_err(|e| {
                EventBusError::FetchFailed(format!("Failed to receive message: {e}"))
            })?;

            let delivery = Delivery {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .and_then(|k| std::str::from_utf8(k).ok())
                    .map(str::to_string),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            };

            tracing::trace!(
                topic = %delivery.topic,
                group = %self.group,
                partition = delivery.partition,
                offset = delivery.offset,
                "Received message"
            );
            Ok(Some(delivery))
        })
    }

    fn commit<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(
                    &delivery.topic,
                    delivery.partition,
                    Offset::Offset(delivery.offset + 1),
                )
                .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;

            self.blocking(move |consumer| {
                consumer
                    .commit(&offsets, CommitMode::Sync)
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(EventBusError::CommitFailed)?;

            tracing::trace!(
                topic = %delivery.topic,
                group = %self.group,
                partition = delivery.partition,
                offset = delivery.offset,
                "Committed offset"
            );
            Ok(())
        })
    }

    fn redeliver<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let topic = delivery.topic.clone();
            let partition = delivery.partition;
            let offset = delivery.offset;
            let timeout = self.timeout;

            self.blocking(move |consumer| {
                consumer
                    .seek(&topic, partition, Offset::Offset(offset), Timeout::After(timeout))
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(EventBusError::SeekFailed)?;

            tracing::debug!(
                topic = %delivery.topic,
                group = %self.group,
                partition,
                offset,
                "Rewound consumer for redelivery"
            );
            Ok(())
        })
    }
}
