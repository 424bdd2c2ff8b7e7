//! Oracle doubles.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use triage_core::oracle::{Oracle, OracleError, OracleFuture};

/// Answers from a list of `(needle, diagnosis)` rules, falling back to a default.
///
/// Every payload it is asked about is recorded.
#[derive(Clone, Debug)]
pub struct ScriptedOracle {
    rules: Vec<(String, String)>,
    fallback: String,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOracle {
    /// Oracle that answers `fallback` to everything.
    #[must_use]
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer `diagnosis` for payloads containing `needle`.
    #[must_use]
    pub fn with_rule(mut self, needle: impl Into<String>, diagnosis: impl Into<String>) -> Self {
        self.rules.push((needle.into(), diagnosis.into()));
        self
    }

    /// Payloads analysed so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn analyze<'a>(&'a self, payload: &'a str) -> OracleFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(payload.to_string());
            let answer = self
                .rules
                .iter()
                .find(|(needle, _)| payload.contains(needle.as_str()))
                .map_or(&self.fallback, |(_, diagnosis)| diagnosis);
            Ok(answer.clone())
        })
    }
}

/// Fails a fixed number of times, then delegates to an inner oracle.
#[derive(Clone, Debug)]
pub struct FailingOracle<O> {
    remaining_failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    error: OracleError,
    inner: O,
}

impl<O: Oracle> FailingOracle<O> {
    /// Fail `failures` times with `OracleError::Unavailable`, then answer with `inner`.
    #[must_use]
    pub fn new(failures: usize, inner: O) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
            error: OracleError::Unavailable("injected failure".to_string()),
            inner,
        }
    }

    /// Use `error` for the injected failures.
    #[must_use]
    pub fn with_error(mut self, error: OracleError) -> Self {
        self.error = error;
        self
    }

    /// Total calls, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<O: Oracle> Oracle for FailingOracle<O> {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn analyze<'a>(&'a self, payload: &'a str) -> OracleFuture<'a> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            let error = self.error.clone();
            return Box::pin(async move { Err(error) });
        }
        self.inner.analyze(payload)
    }
}

/// Never answers; used to exercise timeouts.
#[derive(Clone, Copy, Debug, Default)]
pub struct StalledOracle;

impl Oracle for StalledOracle {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn analyze<'a>(&'a self, _payload: &'a str) -> OracleFuture<'a> {
        Box::pin(std::future::pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_oracle_matches_rules_in_order() {
        let oracle = ScriptedOracle::new("unknown")
            .with_rule("disk", "disk space")
            .with_rule("db", "database");

        assert_eq!(oracle.analyze("disk full on db1").await.unwrap(), "disk space");
        assert_eq!(oracle.analyze("db down").await.unwrap(), "database");
        assert_eq!(oracle.analyze("cpu").await.unwrap(), "unknown");
        assert_eq!(oracle.calls().len(), 3);
    }

    #[tokio::test]
    async fn failing_oracle_recovers_after_budget() {
        let oracle = FailingOracle::new(2, ScriptedOracle::new("ok"));

        assert!(oracle.analyze("x").await.is_err());
        assert!(oracle.analyze("x").await.is_err());
        assert_eq!(oracle.analyze("x").await.unwrap(), "ok");
        assert_eq!(oracle.attempts(), 3);
    }
}
