//! The ticket read model, its two events, and the merge rules that fold them.
//!
//! The materializer consumes `TicketCreated` and `AnalysisCompleted` through
//! two independent consumer groups, so for one ticket id the events may arrive
//! in either order and any number of times. The functions on [`Ticket`] are the
//! single definition of how a row evolves; the PostgreSQL upserts in
//! `triage-projections` are written to match them statement for statement.
//!
//! # Merge rules
//!
//! | current row            | event              | result                                   |
//! |------------------------|--------------------|------------------------------------------|
//! | none                   | `TicketCreated`    | new row, status `new`                    |
//! | none                   | `AnalysisCompleted`| placeholder row, status `analyzed`       |
//! | creation seen          | `TicketCreated`    | unchanged (first-seen create wins)       |
//! | placeholder            | `TicketCreated`    | source/payload/created_at filled in      |
//! | any                    | `AnalysisCompleted`| result replaced unless the stored one is newer or identical |
//!
//! Applying the same event twice is always `Unchanged` the second time, and
//! the final row does not depend on arrival order.

use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Globally unique ticket identity, assigned at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap an id received from elsewhere (wire, store, caller).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random (UUID v4) id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Ingested, no analysis recorded yet.
    New,
    /// An analysis result has been recorded.
    Analyzed,
}

impl TicketStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Analyzed => "analyzed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that is neither `new` nor `analyzed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid ticket status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for TicketStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "analyzed" => Ok(Self::Analyzed),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Emitted once per ticket by the ingestion stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCreated {
    /// Assigned ticket id.
    pub id: TicketId,
    /// Monitoring source that reported the problem.
    pub source: String,
    /// Raw problem description.
    pub payload: String,
    /// Ingestion timestamp.
    pub created_at: DateTime<Utc>,
}

impl Event for TicketCreated {
    const EVENT_TYPE: &'static str = "TicketCreated.v1";

    fn partition_key(&self) -> &str {
        self.id.as_str()
    }
}

/// Emitted by the analysis stage after each successful oracle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCompleted {
    /// Correlation key: the analysed ticket.
    pub ticket_id: TicketId,
    /// Diagnosis text produced by the oracle.
    pub result: String,
    /// When the analysis finished.
    pub analyzed_at: DateTime<Utc>,
}

impl Event for AnalysisCompleted {
    const EVENT_TYPE: &'static str = "AnalysisCompleted.v1";

    fn partition_key(&self) -> &str {
        self.ticket_id.as_str()
    }
}

/// What a merge did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A row was created.
    Inserted,
    /// An existing row changed.
    Updated,
    /// The event was already reflected; nothing changed.
    Unchanged,
}

impl MergeOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// The materialized ticket record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Primary key.
    pub id: TicketId,
    /// Monitoring source; empty until the creation event is seen.
    pub source: String,
    /// Problem description; empty until the creation event is seen.
    pub payload: String,
    /// Current lifecycle status.
    pub status: TicketStatus,
    /// Latest diagnosis, if any.
    pub analysis_result: Option<String>,
    /// Ingestion time (provisionally the analysis time on a placeholder).
    pub created_at: DateTime<Utc>,
    /// Timestamp of the recorded analysis.
    pub analyzed_at: Option<DateTime<Utc>>,
    /// `false` while the row is a placeholder created by an early analysis.
    pub creation_seen: bool,
}

impl Ticket {
    /// Row for a ticket first seen through its creation event.
    #[must_use]
    pub fn from_created(event: &TicketCreated) -> Self {
        Self {
            id: event.id.clone(),
            source: event.source.clone(),
            payload: event.payload.clone(),
            status: TicketStatus::New,
            analysis_result: None,
            created_at: event.created_at,
            analyzed_at: None,
            creation_seen: true,
        }
    }

    /// Row for a ticket whose analysis arrived before its creation event.
    #[must_use]
    pub fn placeholder(event: &AnalysisCompleted) -> Self {
        Self {
            id: event.ticket_id.clone(),
            source: String::new(),
            payload: String::new(),
            status: TicketStatus::Analyzed,
            analysis_result: Some(event.result.clone()),
            created_at: event.analyzed_at,
            analyzed_at: Some(event.analyzed_at),
            creation_seen: false,
        }
    }

    /// Fold a creation event into an existing row.
    pub fn apply_created(&mut self, event: &TicketCreated) -> MergeOutcome {
        if self.creation_seen {
            return MergeOutcome::Unchanged;
        }
        self.source.clone_from(&event.source);
        self.payload.clone_from(&event.payload);
        self.created_at = event.created_at;
        self.creation_seen = true;
        MergeOutcome::Updated
    }

    /// Fold an analysis event into an existing row.
    pub fn apply_analysis(&mut self, event: &AnalysisCompleted) -> MergeOutcome {
        if let Some(recorded_at) = self.analyzed_at {
            if recorded_at > event.analyzed_at {
                return MergeOutcome::Unchanged;
            }
            if recorded_at == event.analyzed_at
                && self.analysis_result.as_deref() == Some(event.result.as_str())
            {
                return MergeOutcome::Unchanged;
            }
        }
        self.status = TicketStatus::Analyzed;
        self.analysis_result = Some(event.result.clone());
        self.analyzed_at = Some(event.analyzed_at);
        MergeOutcome::Updated
    }

    /// Whether the ticket still lacks its creation details.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        !self.creation_seen
    }
}

/// Merge a creation event into an optional row, creating it if absent.
pub fn merge_created(row: &mut Option<Ticket>, event: &TicketCreated) -> MergeOutcome {
    match row {
        Some(ticket) => ticket.apply_created(event),
        None => {
            *row = Some(Ticket::from_created(event));
            MergeOutcome::Inserted
        }
    }
}

/// Merge an analysis event into an optional row, creating a placeholder if absent.
pub fn merge_analysis(row: &mut Option<Ticket>, event: &AnalysisCompleted) -> MergeOutcome {
    match row {
        Some(ticket) => ticket.apply_analysis(event),
        None => {
            *row = Some(Ticket::placeholder(event));
            MergeOutcome::Inserted
        }
    }
}
