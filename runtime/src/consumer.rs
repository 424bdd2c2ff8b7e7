//! Generic group consumer loop with commit-after-process semantics.
//!
//! Every consuming stage (analysis, both materializer loops) is a
//! [`ConsumerLoop`] around a [`DeliveryHandler`]. The loop owns all of the
//! delivery plumbing; the handler only decides what a message means.
//!
//! # Pattern: Subscribe-Fetch-Handle-Acknowledge
//!
//! ```text
//! loop {
//!     subscribe (retry with backoff until it works or shutdown)
//!     loop {
//!         fetch                     ◀── only step raced against shutdown
//!         handle ──┬─ Processed ──▶ commit, reset backoff
//!                  ├─ Poisoned  ──▶ log, commit (skip)
//!                  └─ Retry     ──▶ redeliver, back off, fetch same message again
//!     }
//!     if the consumer is in an unknown position: drop it and resubscribe
//! }
//! ```
//!
//! # Guarantees
//!
//! - A message is committed only after its handler returned.
//! - A transiently failing message blocks its partition until it succeeds;
//!   nothing behind it is committed first.
//! - A malformed message is committed exactly once and never retried.
//! - Shutdown never interrupts a handler: the in-flight message finishes and
//!   is acknowledged before the loop exits.

use crate::lifecycle::ShutdownListener;
use crate::metrics;
use crate::retry::{Backoff, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use triage_core::event_bus::{Delivery, EventBus, EventConsumer};

/// What the loop should do with a message after handling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; acknowledge it.
    Processed,
    /// Can never be handled (malformed); acknowledge it so it is skipped.
    Poisoned(String),
    /// Failed for a reason that may go away; deliver it again after a backoff.
    Retry(String),
}

impl Disposition {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Poisoned(_) => "poisoned",
            Self::Retry(_) => "retry",
        }
    }
}

/// Stage-specific processing of one delivery.
///
/// Handlers are shared across tasks, so they must be `Send + Sync + 'static`.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handle one message and say whether it can be acknowledged.
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Why the inner processing loop returned.
enum Exit {
    Shutdown,
    Resubscribe,
}

/// One member of a consumer group, driving a handler.
pub struct ConsumerLoop {
    /// Loop name (for logging)
    name: String,
    topic: String,
    group: String,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: ShutdownListener,
    policy: RetryPolicy,
    fetch_wait: Duration,
}

impl ConsumerLoop {
    /// Create a builder for configuring a loop.
    #[must_use]
    pub fn builder() -> ConsumerLoopBuilder {
        ConsumerLoopBuilder::default()
    }

    /// Loop name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the loop as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is requested.
    pub async fn run(mut self) {
        info!(
            consumer = %self.name,
            topic = %self.topic,
            group = %self.group,
            "Consumer loop started"
        );
        let mut backoff = Backoff::new(self.policy.clone());

        while let Some(mut consumer) = self.subscribe(&mut backoff).await {
            match self.process(consumer.as_mut(), &mut backoff).await {
                Exit::Shutdown => break,
                Exit::Resubscribe => {
                    warn!(consumer = %self.name, "Dropping consumer and resubscribing");
                }
            }
        }

        info!(consumer = %self.name, "Consumer loop stopped");
    }

    /// Join the group, retrying until it works. `None` means shutdown.
    async fn subscribe(&mut self, backoff: &mut Backoff) -> Option<Box<dyn EventConsumer>> {
        loop {
            let result = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return None,
                result = self.bus.subscribe(&self.topic, &self.group) => result,
            };

            match result {
                Ok(consumer) => {
                    info!(consumer = %self.name, topic = %self.topic, "Subscribed to event bus");
                    return Some(consumer);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        consumer = %self.name,
                        error = %e,
                        delay_ms = millis(delay),
                        "Failed to subscribe to event bus, retrying"
                    );
                    if !self.shutdown.sleep(delay).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn process(&mut self, consumer: &mut dyn EventConsumer, backoff: &mut Backoff) -> Exit {
        loop {
            if self.shutdown.is_cancelled() {
                return Exit::Shutdown;
            }

            let fetched = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Exit::Shutdown,
                fetched = consumer.fetch(self.fetch_wait) => fetched,
            };

            let delivery = match fetched {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        consumer = %self.name,
                        error = %e,
                        delay_ms = millis(delay),
                        "Fetch failed, retrying"
                    );
                    if !self.shutdown.sleep(delay).await {
                        return Exit::Shutdown;
                    }
                    continue;
                }
            };

            let started = Instant::now();
            let disposition = self.handler.handle(&delivery).await;
            metrics::record_message(
                &self.topic,
                &self.group,
                disposition.as_str(),
                started.elapsed(),
            );

            match disposition {
                Disposition::Processed => {
                    debug!(
                        consumer = %self.name,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Message processed"
                    );
                    self.acknowledge(consumer, &delivery).await;
                    backoff.reset();
                }
                Disposition::Poisoned(reason) => {
                    warn!(
                        consumer = %self.name,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        key = ?delivery.key,
                        reason = %reason,
                        "Skipping malformed message"
                    );
                    self.acknowledge(consumer, &delivery).await;
                }
                Disposition::Retry(reason) => {
                    let delay = backoff.next_delay();
                    warn!(
                        consumer = %self.name,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempt = backoff.attempt(),
                        delay_ms = millis(delay),
                        reason = %reason,
                        "Transient failure, message will be redelivered"
                    );
                    if let Err(e) = consumer.redeliver(&delivery).await {
                        // Position is unknown; a fresh member resumes from the last commit.
                        error!(consumer = %self.name, error = %e, "Failed to rewind consumer");
                        if !self.shutdown.sleep(delay).await {
                            return Exit::Shutdown;
                        }
                        return Exit::Resubscribe;
                    }
                    if !self.shutdown.sleep(delay).await {
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    async fn acknowledge(&self, consumer: &mut dyn EventConsumer, delivery: &Delivery) {
        // A lost commit only causes a redelivery, which handlers absorb.
        if let Err(e) = consumer.commit(delivery).await {
            warn!(
                consumer = %self.name,
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Failed to commit offset"
            );
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Errors from [`ConsumerLoopBuilder::build`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Consumer loop is missing required field: {0}")]
pub struct MissingField(pub &'static str);

/// Builder for configuring a [`ConsumerLoop`].
#[derive(Default)]
pub struct ConsumerLoopBuilder {
    name: Option<String>,
    topic: Option<String>,
    group: Option<String>,
    bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn DeliveryHandler>>,
    shutdown: Option<ShutdownListener>,
    policy: Option<RetryPolicy>,
    fetch_wait: Option<Duration>,
}

impl ConsumerLoopBuilder {
    /// Set loop name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topic to consume.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set consumer group.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set delivery handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown listener.
    #[must_use]
    pub fn shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set backoff policy for transient failures (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set how long one fetch waits for a message (default: 500ms).
    #[must_use]
    pub const fn fetch_wait(mut self, wait: Duration) -> Self {
        self.fetch_wait = Some(wait);
        self
    }

    /// Build the [`ConsumerLoop`].
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] if topic, group, event bus, handler or
    /// shutdown listener were not set.
    pub fn build(self) -> Result<ConsumerLoop, MissingField> {
        let topic = self.topic.ok_or(MissingField("topic"))?;
        let group = self.group.ok_or(MissingField("group"))?;
        Ok(ConsumerLoop {
            name: self.name.unwrap_or_else(|| format!("{group}@{topic}")),
            topic,
            group,
            bus: self.bus.ok_or(MissingField("event_bus"))?,
            handler: self.handler.ok_or(MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(MissingField("shutdown"))?,
            policy: self.policy.unwrap_or_default(),
            fetch_wait: self.fetch_wait.unwrap_or(Duration::from_millis(500)),
        })
    }
}
