//! Read contract consumed by front-ends: list tickets, fetch one by id.

use std::sync::Arc;
use thiserror::Error;
use triage_core::repository::{RepositoryError, TicketRepository};
use triage_core::ticket::{Ticket, TicketId};

/// Why a read did not return a ticket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// No ticket has this id.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),

    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Side-effect-free queries over the read model.
#[derive(Clone)]
pub struct TicketQueries {
    repository: Arc<dyn TicketRepository>,
}

impl TicketQueries {
    /// Query `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn TicketRepository>) -> Self {
        Self { repository }
    }

    /// Every ticket, newest `created_at` first; equal timestamps ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Store`] if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<Ticket>, ReadError> {
        Ok(self.repository.get_all().await?)
    }

    /// One ticket.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::NotFound`] for an unknown id, or
    /// [`ReadError::Store`] if the store cannot be read.
    pub async fn get(&self, id: &TicketId) -> Result<Ticket, ReadError> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| ReadError::NotFound(id.clone()))
    }
}
