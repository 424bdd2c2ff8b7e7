//! The analysis oracle: an opaque `analyze(text) -> diagnosis` capability.
//!
//! The analysis stage is written against [`Oracle`] only. Implementations live
//! in the pipeline crate (a deterministic keyword classifier and an LLM-backed
//! one) and in the testing crate (scripted and failing doubles).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by [`Oracle::analyze`].
pub type OracleFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OracleError>> + Send + 'a>>;

/// Why an oracle could not produce a diagnosis.
///
/// Every variant is treated as transient by the analysis stage: the ticket is
/// retried rather than skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The call did not finish in time.
    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached or failed.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    /// The backend answered without any text.
    #[error("Oracle returned an empty response")]
    EmptyResponse,

    /// The backend refused the request (bad credentials, quota, validation).
    #[error("Oracle rejected request: {0}")]
    Rejected(String),
}

/// Produces a diagnosis for a ticket's problem description.
pub trait Oracle: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Analyse `payload` and return a diagnosis.
    ///
    /// # Errors
    ///
    /// Returns `OracleError` when no diagnosis could be produced.
    fn analyze<'a>(&'a self, payload: &'a str) -> OracleFuture<'a>;
}
