//! Read-model storage for the triage pipeline.
//!
//! # Overview
//!
//! This crate provides the `PostgreSQL` implementation of
//! [`TicketRepository`](triage_core::repository::TicketRepository):
//! - **Atomic merges**: one upsert statement per event, safe under concurrent loops
//! - **Migrations**: the `tickets` schema is embedded and applied at startup
//! - **Queries**: list (newest first) and lookup by id
//!
//! # Example
//!
//! ```ignore
//! use triage_projections::{PoolSettings, PostgresTicketRepository};
//!
//! let repository = PostgresTicketRepository::connect(&database_url, &PoolSettings::default()).await?;
//! repository.migrate().await?;
//!
//! let outcome = repository.record_created(&event).await?;
//! let tickets = repository.get_all().await?;
//! ```

pub mod postgres;

// Re-export main types for convenience
pub use postgres::{PoolSettings, PostgresTicketRepository};
