//! # Triage Core
//!
//! Domain model and port traits for the triage ticket pipeline.
//!
//! Tickets flow through three stages that only talk to each other through
//! the event bus:
//!
//! ```text
//!              tickets.new                       tickets.analyzed
//! ┌───────────┐    │     ┌──────────────┐              │
//! │ Ingestion │────┼────▶│   Analysis   │──────────────┤
//! └───────────┘    │     └──────────────┘              │
//!                  │                                   │
//!                  ▼                                   ▼
//!          ┌──────────────────────────────────────────────────┐
//!          │  Materializer (loop A)     Materializer (loop B)  │
//!          │            └──── idempotent merge ────┘           │
//!          │                  tickets table                    │
//!          └──────────────────────────────────────────────────┘
//! ```
//!
//! This crate has no I/O. It defines:
//!
//! - [`ticket`]: the `Ticket` read model, the two events and the merge rules
//! - [`event`]: the `Event` trait and the bincode wire envelope
//! - [`event_bus`]: keyed publishing and group consumers with explicit commits
//! - [`repository`]: the durable store contract used by the materializer
//! - [`oracle`]: the pluggable `analyze(text) -> diagnosis` capability
//! - [`environment`]: clock and id generation, injected for testability

pub mod event;
pub mod event_bus;
pub mod oracle;
pub mod repository;
pub mod ticket;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Injected dependencies that make stages deterministic under test.
pub mod environment {
    use crate::ticket::TicketId;
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use triage_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of fresh ticket identities.
    pub trait IdGenerator: Send + Sync {
        /// Produce an id that has never been handed out before.
        fn next_id(&self) -> TicketId;
    }

    /// Random 128-bit (UUID v4) ids.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_id(&self) -> TicketId {
            TicketId::generate()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{IdGenerator, UuidGenerator};

    #[test]
    fn uuid_generator_yields_distinct_ids() {
        let ids = UuidGenerator;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}
