//! # Triage Testing
//!
//! Testing utilities and helpers for the triage pipeline.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clock, id generation)
//! - An in-memory event bus with consumer groups, commits and raw injection
//! - An in-memory ticket repository with failure injection
//! - Oracle doubles (scripted, failing, stalled)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use triage_pipeline::Ingestion;
//! use triage_testing::InMemoryEventBus;
//! use triage_testing::mocks::{SequentialIds, test_clock};
//!
//! #[tokio::test]
//! async fn test_ticket_flow() {
//!     let bus = InMemoryEventBus::new();
//!     let ingestion = Ingestion::new(Arc::new(bus.clone()), "tickets.new")
//!         .with_clock(Arc::new(test_clock()))
//!         .with_id_generator(Arc::new(SequentialIds::new()));
//!
//!     let created = ingestion.submit("monitor-x", "disk full on db1").await.unwrap();
//!     assert_eq!(created.id.as_str(), "ticket-0001");
//! }
//! ```

use chrono::{DateTime, Utc};
use triage_core::environment::{Clock, IdGenerator};

pub mod event_bus;
pub mod oracle;
pub mod repository;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use triage_core::ticket::TicketId;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use triage_testing::mocks::FixedClock;
    /// use triage_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every reading.
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: chrono::Duration,
    }

    impl SteppingClock {
        /// First reading is `start`, each later one `step` after the previous.
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Predictable ids: `ticket-0001`, `ticket-0002`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        counter: AtomicU64,
    }

    impl SequentialIds {
        /// Start at `ticket-0001`.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> TicketId {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            TicketId::new(format!("ticket-{n:04}"))
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honours `RUST_LOG`; output is captured by the test harness.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use event_bus::{InMemoryConsumer, InMemoryEventBus};
pub use helpers::init_tracing;
pub use mocks::{FixedClock, SequentialIds, SteppingClock, test_clock};
pub use oracle::{FailingOracle, ScriptedOracle, StalledOracle};
pub use repository::InMemoryTicketRepository;
