//! # Triage Pipeline
//!
//! The three stages of the ticket pipeline, wired on top of `triage-runtime`.
//!
//! ```text
//! submit ──▶ Ingestion ──▶ tickets.new ──┬──▶ Analysis ──▶ tickets.analyzed ──┐
//!                                        │                                    │
//!                                        └──▶ Materializer (loop A)           │
//!                                             Materializer (loop B) ◀─────────┘
//!                                                     │
//!                                                     ▼
//!                                           TicketQueries (read contract)
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: accept a submission and publish `TicketCreated`
//! - [`analysis`]: consumer handler calling the oracle, publishing `AnalysisCompleted`
//! - [`materializer`]: the two handlers merging events into the repository
//! - [`read`]: list and get over the read model
//! - [`oracle`]: keyword and Anthropic oracles
//! - [`config`], [`bootstrap`], [`app`]: environment, resources, lifecycle

pub mod analysis;
pub mod app;
pub mod bootstrap;
pub mod config;
pub mod ingestion;
pub mod materializer;
pub mod oracle;
pub mod read;

pub use app::{App, AppError, Stage};
pub use config::{Config, ConfigError};
pub use ingestion::{Ingestion, IngestionError};
pub use read::{ReadError, TicketQueries};

use triage_core::event::Event;
use triage_core::event_bus::Delivery;

/// Decode a delivery as `E`, describing why it is malformed otherwise.
///
/// A message is malformed when the envelope does not decode, carries another
/// event type, the inner event does not decode, or the ticket id is empty.
pub(crate) fn decode_delivery<E: Event>(delivery: &Delivery) -> Result<E, String> {
    let event: E = delivery
        .envelope()
        .and_then(|envelope| envelope.to_event())
        .map_err(|e| e.to_string())?;

    if event.partition_key().is_empty() {
        return Err(format!("{} has an empty ticket id", E::EVENT_TYPE));
    }
    Ok(event)
}
