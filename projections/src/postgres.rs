//! `PostgreSQL` ticket repository.
//!
//! # Overview
//!
//! Each merge from `triage_core::ticket` is one `INSERT ... ON CONFLICT ... DO
//! UPDATE ... WHERE ...` statement, so PostgreSQL's row lock makes it atomic
//! per ticket even when both materializer loops write the same id at once.
//!
//! The statements return `(xmax = 0)` to tell an insert from an update; a
//! conflicting row whose `WHERE` guard rejects the update returns no row at
//! all, which is reported as [`MergeOutcome::Unchanged`].
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE tickets (
//!     id              TEXT PRIMARY KEY,
//!     source          TEXT NOT NULL,
//!     payload         TEXT NOT NULL,
//!     status          TEXT NOT NULL CHECK (status IN ('new', 'analyzed')),
//!     analysis_result TEXT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     analyzed_at     TIMESTAMPTZ NULL,
//!     creation_seen   BOOLEAN NOT NULL,
//!     updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use triage_core::repository::{RepositoryError, RepositoryFuture, TicketRepository};
use triage_core::ticket::{
    AnalysisCompleted, MergeOutcome, Ticket, TicketCreated, TicketId, TicketStatus,
};

/// Merge a creation event. Only a placeholder row is completed; a row whose
/// creation was already seen keeps its first-seen values.
const UPSERT_CREATED: &str = "
    INSERT INTO tickets (id, source, payload, status, created_at, creation_seen)
    VALUES ($1, $2, $3, 'new', $4, TRUE)
    ON CONFLICT (id) DO UPDATE
       SET source = EXCLUDED.source,
           payload = EXCLUDED.payload,
           created_at = EXCLUDED.created_at,
           creation_seen = TRUE,
           updated_at = now()
     WHERE tickets.creation_seen = FALSE
    RETURNING (xmax = 0) AS inserted";

/// Merge an analysis event. Latest `analyzed_at` wins; an identical replay is a no-op.
const UPSERT_ANALYSIS: &str = "
    INSERT INTO tickets (id, source, payload, status, analysis_result, created_at, analyzed_at, creation_seen)
    VALUES ($1, '', '', 'analyzed', $2, $3, $3, FALSE)
    ON CONFLICT (id) DO UPDATE
       SET status = 'analyzed',
           analysis_result = EXCLUDED.analysis_result,
           analyzed_at = EXCLUDED.analyzed_at,
           updated_at = now()
     WHERE tickets.analyzed_at IS NULL
        OR tickets.analyzed_at < EXCLUDED.analyzed_at
        OR (tickets.analyzed_at = EXCLUDED.analyzed_at
            AND tickets.analysis_result IS DISTINCT FROM EXCLUDED.analysis_result)
    RETURNING (xmax = 0) AS inserted";

const SELECT_COLUMNS: &str = "
    SELECT id, source, payload, status, analysis_result, created_at, analyzed_at, creation_seen
      FROM tickets";

type TicketRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    bool,
);

/// Pool settings for [`PostgresTicketRepository::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum pool size.
    pub max_connections: u32,
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// How long to wait for a connection.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// PostgreSQL-backed [`TicketRepository`].
#[derive(Clone)]
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    /// Create a repository over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Query(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[tracing::instrument(skip(self, event), fields(ticket_id = %event.id), err)]
    async fn upsert_created(&self, event: &TicketCreated) -> Result<MergeOutcome, RepositoryError> {
        let inserted: Option<(bool,)> = sqlx::query_as(UPSERT_CREATED)
            .bind(event.id.as_str())
            .bind(&event.source)
            .bind(&event.payload)
            .bind(event.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to record ticket creation", &e))?;

        let outcome = outcome_of(inserted);
        tracing::debug!(outcome = outcome.as_str(), "Merged creation event");
        Ok(outcome)
    }

    #[tracing::instrument(skip(self, event), fields(ticket_id = %event.ticket_id), err)]
    async fn upsert_analysis(
        &self,
        event: &AnalysisCompleted,
    ) -> Result<MergeOutcome, RepositoryError> {
        let inserted: Option<(bool,)> = sqlx::query_as(UPSERT_ANALYSIS)
            .bind(event.ticket_id.as_str())
            .bind(&event.result)
            .bind(event.analyzed_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to record analysis", &e))?;

        let outcome = outcome_of(inserted);
        tracing::debug!(outcome = outcome.as_str(), "Merged analysis event");
        Ok(outcome)
    }

    async fn select_all(&self) -> Result<Vec<Ticket>, RepositoryError> {
        let rows: Vec<TicketRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id ASC"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| storage_error("Failed to list tickets", &e))?;

        rows.into_iter().map(into_ticket).collect()
    }

    async fn select_one(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let row: Option<TicketRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get ticket", &e))?;

        row.map(into_ticket).transpose()
    }
}

impl TicketRepository for PostgresTicketRepository {
    fn record_created<'a>(&'a self, event: &'a TicketCreated) -> RepositoryFuture<'a, MergeOutcome> {
        Box::pin(self.upsert_created(event))
    }

    fn record_analysis<'a>(
        &'a self,
        event: &'a AnalysisCompleted,
    ) -> RepositoryFuture<'a, MergeOutcome> {
        Box::pin(self.upsert_analysis(event))
    }

    fn get_all(&self) -> RepositoryFuture<'_, Vec<Ticket>> {
        Box::pin(self.select_all())
    }

    fn get_by_id<'a>(&'a self, id: &'a TicketId) -> RepositoryFuture<'a, Option<Ticket>> {
        Box::pin(self.select_one(id))
    }
}

const fn outcome_of(inserted: Option<(bool,)>) -> MergeOutcome {
    match inserted {
        Some((true,)) => MergeOutcome::Inserted,
        Some((false,)) => MergeOutcome::Updated,
        None => MergeOutcome::Unchanged,
    }
}

fn into_ticket(row: TicketRow) -> Result<Ticket, RepositoryError> {
    let (id, source, payload, status, analysis_result, created_at, analyzed_at, creation_seen) =
        row;
    let status: TicketStatus = status.parse().map_err(|e: triage_core::ticket::InvalidStatus| {
        RepositoryError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        }
    })?;

    Ok(Ticket {
        id: TicketId::new(id),
        source,
        payload,
        status,
        analysis_result,
        created_at,
        analyzed_at,
        creation_seen,
    })
}

/// Connection-level failures are `Unavailable`; everything else is a `Query` error.
fn storage_error(context: &str, error: &sqlx::Error) -> RepositoryError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RepositoryError::Unavailable(format!("{context}: {error}")),
        _ => RepositoryError::Query(format!("{context}: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returning_clause_maps_to_outcomes() {
        assert_eq!(outcome_of(Some((true,))), MergeOutcome::Inserted);
        assert_eq!(outcome_of(Some((false,))), MergeOutcome::Updated);
        assert_eq!(outcome_of(None), MergeOutcome::Unchanged);
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let row: TicketRow = (
            "t-1".to_string(),
            String::new(),
            String::new(),
            "closed".to_string(),
            None,
            Utc::now(),
            None,
            true,
        );
        assert!(matches!(
            into_ticket(row),
            Err(RepositoryError::Corrupt { ref id, .. }) if id == "t-1"
        ));
    }

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(
            storage_error("ctx", &sqlx::Error::PoolTimedOut),
            RepositoryError::Unavailable(_)
        ));
        assert!(matches!(
            storage_error("ctx", &sqlx::Error::RowNotFound),
            RepositoryError::Query(_)
        ));
    }
}
