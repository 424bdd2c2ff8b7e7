//! Prometheus metrics for the pipeline stages.
//!
//! Recording goes through the `metrics` facade, so it is free when no exporter
//! is installed (tests, or `METRICS_ADDR` unset). [`MetricsServer::start`]
//! installs the Prometheus recorder with its own HTTP listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use triage_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Messages handled by consumer loops, by outcome.
pub const MESSAGES_TOTAL: &str = "triage_messages_total";
/// Handler latency per message.
pub const MESSAGE_DURATION_SECONDS: &str = "triage_message_duration_seconds";
/// Tickets accepted by ingestion.
pub const TICKETS_SUBMITTED_TOTAL: &str = "triage_tickets_submitted_total";
/// Oracle invocations, by oracle and outcome.
pub const ORACLE_CALLS_TOTAL: &str = "triage_oracle_calls_total";
/// Repository merges, by event kind and merge outcome.
pub const MERGE_TOTAL: &str = "triage_merge_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already installed.
    pub fn start(&self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        MESSAGES_TOTAL,
        "Messages handled by consumer loops, labelled by topic, group and outcome"
    );
    describe_histogram!(
        MESSAGE_DURATION_SECONDS,
        "Time spent handling one message"
    );
    describe_counter!(
        TICKETS_SUBMITTED_TOTAL,
        "Tickets accepted and published by ingestion"
    );
    describe_counter!(
        ORACLE_CALLS_TOTAL,
        "Oracle invocations, labelled by oracle and outcome"
    );
    describe_counter!(
        MERGE_TOTAL,
        "Repository merges, labelled by event kind and merge outcome"
    );
}

/// Record one handled message.
pub fn record_message(topic: &str, group: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        MESSAGES_TOTAL,
        "topic" => topic.to_string(),
        "group" => group.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        MESSAGE_DURATION_SECONDS,
        "topic" => topic.to_string(),
        "group" => group.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record one oracle call.
pub fn record_oracle_call(oracle: &'static str, outcome: &'static str) {
    counter!(ORACLE_CALLS_TOTAL, "oracle" => oracle, "outcome" => outcome).increment(1);
}

/// Record one repository merge.
pub fn record_merge(kind: &'static str, outcome: &'static str) {
    counter!(MERGE_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record one accepted submission.
pub fn record_submission() {
    counter!(TICKETS_SUBMITTED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        record_message("tickets.new", "g", "processed", Duration::from_millis(3));
        record_oracle_call("keyword", "ok");
        record_merge("created", "inserted");
        record_submission();
    }
}
