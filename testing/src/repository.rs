//! In-memory ticket repository.
//!
//! Applies the merge rules from `triage_core::ticket` to a `HashMap`, which
//! makes it the reference behaviour the PostgreSQL repository is tested
//! against. Failures can be injected to exercise the stages' retry paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use triage_core::repository::{RepositoryError, RepositoryFuture, TicketRepository, sort_for_listing};
use triage_core::ticket::{
    AnalysisCompleted, MergeOutcome, Ticket, TicketCreated, TicketId, merge_analysis,
    merge_created,
};

#[derive(Debug, Default)]
struct State {
    tickets: HashMap<TicketId, Ticket>,
    failing_writes: usize,
    writes: usize,
}

/// In-memory [`TicketRepository`] for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use triage_testing::InMemoryTicketRepository;
/// use triage_core::repository::TicketRepository;
/// use triage_core::ticket::{MergeOutcome, TicketCreated, TicketId};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = InMemoryTicketRepository::new();
/// let event = TicketCreated {
///     id: TicketId::new("t-1"),
///     source: "monitor-x".to_string(),
///     payload: "disk full on db1".to_string(),
///     created_at: Utc::now(),
/// };
///
/// assert_eq!(repo.record_created(&event).await?, MergeOutcome::Inserted);
/// assert_eq!(repo.record_created(&event).await?, MergeOutcome::Unchanged);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryTicketRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with `RepositoryError::Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.write().unwrap().failing_writes = count;
    }

    /// Number of stored tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().tickets.len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().tickets.is_empty()
    }

    /// Write attempts seen so far, including failed ones.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.state.read().unwrap().writes
    }

    /// Snapshot of one ticket.
    #[must_use]
    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.state
            .read()
            .unwrap()
            .tickets
            .get(&TicketId::new(id))
            .cloned()
    }

    fn write(
        &self,
        id: &TicketId,
        apply: impl FnOnce(&mut Option<Ticket>) -> MergeOutcome,
    ) -> Result<MergeOutcome, RepositoryError> {
        let mut state = self.state.write().unwrap();
        state.writes += 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(RepositoryError::Unavailable("injected failure".to_string()));
        }

        let mut row = state.tickets.remove(id);
        let outcome = apply(&mut row);
        if let Some(ticket) = row {
            state.tickets.insert(id.clone(), ticket);
        }
        Ok(outcome)
    }
}

impl TicketRepository for InMemoryTicketRepository {
    fn record_created<'a>(&'a self, event: &'a TicketCreated) -> RepositoryFuture<'a, MergeOutcome> {
        Box::pin(async move { self.write(&event.id, |row| merge_created(row, event)) })
    }

    fn record_analysis<'a>(
        &'a self,
        event: &'a AnalysisCompleted,
    ) -> RepositoryFuture<'a, MergeOutcome> {
        Box::pin(async move { self.write(&event.ticket_id, |row| merge_analysis(row, event)) })
    }

    fn get_all(&self) -> RepositoryFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let mut tickets: Vec<Ticket> =
                self.state.read().unwrap().tickets.values().cloned().collect();
            sort_for_listing(&mut tickets);
            Ok(tickets)
        })
    }

    fn get_by_id<'a>(&'a self, id: &'a TicketId) -> RepositoryFuture<'a, Option<Ticket>> {
        Box::pin(async move { Ok(self.state.read().unwrap().tickets.get(id).cloned()) })
    }
}
