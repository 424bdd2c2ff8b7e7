//! Durable store contract for materialized tickets.
//!
//! The materializer writes through [`TicketRepository::record_created`] and
//! [`TicketRepository::record_analysis`]; the read contract goes through
//! [`TicketRepository::get_all`] and [`TicketRepository::get_by_id`].
//!
//! Both writes must behave exactly like [`crate::ticket::merge_created`] and
//! [`crate::ticket::merge_analysis`] applied to the stored row, and must be
//! atomic per ticket: two loops writing the same id concurrently may not lose
//! either update.

use crate::ticket::{AnalysisCompleted, MergeOutcome, Ticket, TicketCreated, TicketId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Errors that can occur during repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Store not reachable (connection refused, pool exhausted, timeout).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Statement failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// A stored row could not be mapped back to a ticket.
    #[error("Corrupt row for ticket {id}: {reason}")]
    Corrupt {
        /// Id of the offending row
        id: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Persistent ticket storage.
pub trait TicketRepository: Send + Sync {
    /// Merge a creation event into the stored ticket.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be written.
    fn record_created<'a>(&'a self, event: &'a TicketCreated) -> RepositoryFuture<'a, MergeOutcome>;

    /// Merge an analysis event into the stored ticket.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be written.
    fn record_analysis<'a>(
        &'a self,
        event: &'a AnalysisCompleted,
    ) -> RepositoryFuture<'a, MergeOutcome>;

    /// Every stored ticket, newest `created_at` first, ties broken by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be read.
    fn get_all(&self) -> RepositoryFuture<'_, Vec<Ticket>>;

    /// One ticket by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be read.
    fn get_by_id<'a>(&'a self, id: &'a TicketId) -> RepositoryFuture<'a, Option<Ticket>>;
}

/// Sort tickets the way `get_all` returns them.
pub fn sort_for_listing(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{TicketCreated, TicketId};
    use chrono::{TimeZone, Utc};

    fn ticket(id: &str, secs: i64) -> Ticket {
        Ticket::from_created(&TicketCreated {
            id: TicketId::new(id),
            source: "probe".to_string(),
            payload: "load".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).single().unwrap_or_default(),
        })
    }

    #[test]
    fn listing_is_newest_first_then_by_id() {
        let mut tickets = vec![ticket("b", 10), ticket("c", 20), ticket("a", 10)];
        sort_for_listing(&mut tickets);
        let ids: Vec<_> = tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }
}
