//! In-memory event bus with partitions, consumer groups and explicit commits.
//!
//! Behaves like the broker where it matters for the stages:
//!
//! - messages are partitioned by key, so one ticket's events stay in order
//! - each consumer group has its own committed offset per partition
//! - a new member of a group starts at the group's committed offsets
//! - `redeliver` rewinds the member so the same message is fetched again
//!
//! Every member of a group reads every partition (there is no rebalancing),
//! so tests run one member per group.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use triage_core::event::{Event, SerializedEvent};
use triage_core::event_bus::{
    BusFuture, Delivery, EventBus, EventBusError, EventConsumer, EventPublisher,
};

const DEFAULT_PARTITIONS: usize = 3;

#[derive(Debug, Clone)]
struct Message {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Message>>>,
    committed: HashMap<(String, String), Vec<i64>>,
    failing_publishes: usize,
    failing_subscribes: usize,
}

#[derive(Debug)]
struct Inner {
    partitions: usize,
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn partition_for(&self, key: Option<&str>) -> usize {
        key.map_or(0, |key| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            usize::try_from(hasher.finish() % self.partitions as u64).unwrap_or(0)
        })
    }

    fn append(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) {
        let partition = self.partition_for(key);
        {
            let mut state = self.state.lock().unwrap();
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            partitions[partition].push(Message {
                key: key.map(str::to_string),
                payload,
            });
        }
        self.notify.notify_waiters();
    }
}

/// In-memory [`EventBus`] for fast, deterministic tests.
///
/// Cloning shares the underlying broker.
///
/// # Example
///
/// ```
/// use triage_testing::InMemoryEventBus;
/// use triage_core::event_bus::{EventBus, EventPublisher};
/// use triage_core::event::SerializedEvent;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("Probe.v1".to_string(), vec![1, 2, 3]);
/// bus.publish("tickets.new", "t-1", &event).await?;
///
/// let mut consumer = bus.subscribe("tickets.new", "group-a").await?;
/// let delivery = consumer.fetch(Duration::from_millis(10)).await?.unwrap();
/// consumer.commit(&delivery).await?;
/// assert_eq!(bus.lag("tickets.new", "group-a"), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create an empty bus with three partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create an empty bus with `partitions` partitions per topic.
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Append raw bytes to a topic, bypassing the envelope.
    ///
    /// Used to plant malformed messages.
    pub fn inject_raw(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) {
        self.inner.append(topic, key, payload);
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.state.lock().unwrap().failing_publishes = count;
    }

    /// Make the next `count` subscriptions fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.inner.state.lock().unwrap().failing_subscribes = count;
    }

    /// Every message on `topic` as `(key, payload)`, partition by partition.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<(Option<String>, Vec<u8>)> {
        let state = self.inner.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .flatten()
                    .map(|m| (m.key.clone(), m.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every message on `topic` that decodes as `E`.
    #[must_use]
    pub fn events<E: Event>(&self, topic: &str) -> Vec<E> {
        self.messages(topic)
            .into_iter()
            .filter_map(|(_, payload)| SerializedEvent::decode(&payload).ok())
            .filter_map(|envelope| envelope.to_event::<E>().ok())
            .collect()
    }

    /// Number of messages on `topic`.
    #[must_use]
    pub fn message_count(&self, topic: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .map_or(0, |partitions| partitions.iter().map(Vec::len).sum())
    }

    /// Messages on `topic` not yet committed by `group`.
    #[must_use]
    pub fn lag(&self, topic: &str, group: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        let committed = state.committed.get(&(topic.to_string(), group.to_string()));
        partitions
            .iter()
            .enumerate()
            .map(|(p, messages)| {
                let done = committed.map_or(0, |c| c[p]);
                messages.len().saturating_sub(usize::try_from(done).unwrap_or(0))
            })
            .sum()
    }

    /// Poll until `group` has committed everything on `topic`, or `timeout` elapses.
    ///
    /// Returns whether the group caught up.
    pub async fn wait_for_drain(&self, topic: &str, group: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.message_count(topic) > 0 && self.lag(topic, group) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        event: &'a SerializedEvent,
    ) -> BusFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut state = self.inner.state.lock().unwrap();
                if state.failing_publishes > 0 {
                    state.failing_publishes -= 1;
                    return Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: "injected failure".to_string(),
                    });
                }
            }
            let payload = event
                .encode()
                .map_err(|e| EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
            self.inner.append(topic, Some(key), payload);
            Ok(())
        })
    }
}

impl EventBus for InMemoryEventBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> BusFuture<'a, Box<dyn EventConsumer>> {
        Box::pin(async move {
            let positions = {
                let mut state = self.inner.state.lock().unwrap();
                if state.failing_subscribes > 0 {
                    state.failing_subscribes -= 1;
                    return Err(EventBusError::SubscriptionFailed {
                        topic: topic.to_string(),
                        group: group.to_string(),
                        reason: "injected failure".to_string(),
                    });
                }
                state
                    .committed
                    .entry((topic.to_string(), group.to_string()))
                    .or_insert_with(|| vec![0; self.inner.partitions])
                    .clone()
            };

            let consumer: Box<dyn EventConsumer> = Box::new(InMemoryConsumer {
                inner: Arc::clone(&self.inner),
                topic: topic.to_string(),
                group: group.to_string(),
                positions,
                next_partition: 0,
            });
            Ok(consumer)
        })
    }
}

/// A group member returned by [`InMemoryEventBus::subscribe`].
#[derive(Debug)]
pub struct InMemoryConsumer {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    positions: Vec<i64>,
    next_partition: usize,
}

impl InMemoryConsumer {
    fn poll(&mut self) -> Option<Delivery> {
        let state = self.inner.state.lock().unwrap();
        let partitions = state.topics.get(&self.topic)?;

        for step in 0..self.inner.partitions {
            let partition = (self.next_partition + step) % self.inner.partitions;
            let position = self.positions[partition];
            let Some(message) = usize::try_from(position)
                .ok()
                .and_then(|index| partitions[partition].get(index))
            else {
                continue;
            };

            self.positions[partition] = position + 1;
            self.next_partition = (partition + 1) % self.inner.partitions;
            return Some(Delivery {
                topic: self.topic.clone(),
                partition: i32::try_from(partition).unwrap_or(0),
                offset: position,
                key: message.key.clone(),
                payload: message.payload.clone(),
            });
        }
        None
    }
}

impl EventConsumer for InMemoryConsumer {
    fn fetch(&mut self, max_wait: Duration) -> BusFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let inner = Arc::clone(&self.inner);
            let deadline = tokio::time::Instant::now() + max_wait;
            loop {
                let notified = inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(delivery) = self.poll() {
                    return Ok(Some(delivery));
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn commit<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let partition = usize::try_from(delivery.partition)
                .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;
            let mut state = self.inner.state.lock().unwrap();
            let committed = state
                .committed
                .entry((self.topic.clone(), self.group.clone()))
                .or_insert_with(|| vec![0; self.inner.partitions]);
            committed[partition] = committed[partition].max(delivery.offset + 1);
            Ok(())
        })
    }

    fn redeliver<'a>(&'a mut self, delivery: &'a Delivery) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let partition = usize::try_from(delivery.partition)
                .map_err(|e| EventBusError::SeekFailed(e.to_string()))?;
            self.positions[partition] = delivery.offset;
            Ok(())
        })
    }
}
