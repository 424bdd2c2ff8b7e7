//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Keyed publish and fetch round-trip
//! - Commit-after-process: uncommitted messages come back to a new member
//! - Redelivery: a rewound consumer fetches the same message again
//! - Independent consumer groups
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p triage-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use triage_core::event::SerializedEvent;
use triage_core::event_bus::{Delivery, EventBus, EventConsumer, EventPublisher};
use triage_redpanda::RedpandaEventBus;

fn test_event(marker: u8) -> SerializedEvent {
    SerializedEvent::new("Probe.v1".to_string(), vec![marker])
}

async fn start_kafka() -> (ContainerAsync<Kafka>, RedpandaEventBus) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");

    let bus = RedpandaEventBus::builder()
        .brokers(format!("{host}:{port}"))
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");

    (kafka, bus)
}

async fn ensure_topic(bus: &RedpandaEventBus, topic: &str) {
    for attempt in 1..=60 {
        if bus.ensure_topics(&[topic], 1).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

async fn fetch_one(consumer: &mut Box<dyn EventConsumer>) -> Delivery {
    for _ in 0..60 {
        if let Some(delivery) = consumer
            .fetch(Duration::from_millis(500))
            .await
            .expect("fetch should succeed")
        {
            return delivery;
        }
    }
    panic!("no message within 30 seconds");
}

fn marker(delivery: &Delivery) -> u8 {
    delivery.envelope().expect("valid envelope").data[0]
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_keyed_publish_and_fetch_round_trip() {
    let (_kafka, bus) = start_kafka().await;
    ensure_topic(&bus, "tickets.new").await;

    bus.publish("tickets.new", "ticket-1", &test_event(1))
        .await
        .expect("publish should succeed");

    let mut consumer = bus
        .subscribe("tickets.new", "round-trip")
        .await
        .expect("subscribe should succeed");
    let delivery = fetch_one(&mut consumer).await;

    assert_eq!(delivery.key.as_deref(), Some("ticket-1"));
    assert_eq!(marker(&delivery), 1);
    consumer.commit(&delivery).await.expect("commit should succeed");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_uncommitted_message_returns_to_next_member() {
    let (_kafka, bus) = start_kafka().await;
    ensure_topic(&bus, "tickets.analyzed").await;

    for n in [1, 2] {
        bus.publish("tickets.analyzed", "ticket-1", &test_event(n))
            .await
            .expect("publish should succeed");
    }

    {
        let mut first = bus
            .subscribe("tickets.analyzed", "materializer")
            .await
            .expect("subscribe should succeed");
        let d1 = fetch_one(&mut first).await;
        first.commit(&d1).await.expect("commit should succeed");
        let d2 = fetch_one(&mut first).await;
        assert_eq!(marker(&d2), 2);
        // Dropped without committing d2.
    }

    let mut second = bus
        .subscribe("tickets.analyzed", "materializer")
        .await
        .expect("subscribe should succeed");
    let again = fetch_one(&mut second).await;
    assert_eq!(marker(&again), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redeliver_rewinds_to_failed_offset() {
    let (_kafka, bus) = start_kafka().await;
    ensure_topic(&bus, "redeliver").await;

    for n in [1, 2] {
        bus.publish("redeliver", "ticket-1", &test_event(n))
            .await
            .expect("publish should succeed");
    }

    let mut consumer = bus
        .subscribe("redeliver", "analysis")
        .await
        .expect("subscribe should succeed");
    let first = fetch_one(&mut consumer).await;
    consumer
        .redeliver(&first)
        .await
        .expect("redeliver should succeed");

    let again = fetch_one(&mut consumer).await;
    assert_eq!(again.offset, first.offset);
    assert_eq!(marker(&again), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_groups_each_see_every_message() {
    let (_kafka, bus) = start_kafka().await;
    ensure_topic(&bus, "fanout").await;

    bus.publish("fanout", "ticket-1", &test_event(7))
        .await
        .expect("publish should succeed");

    for group in ["analysis", "materializer-created"] {
        let mut consumer = bus
            .subscribe("fanout", group)
            .await
            .expect("subscribe should succeed");
        assert_eq!(marker(&fetch_one(&mut consumer).await), 7);
    }
}
