//! Process-scoped infrastructure: event bus, read-model store and oracle.
//!
//! Resources are acquired once at startup, handed explicitly to the stages
//! that need them, and released by [`Resources::close`] after every loop has
//! drained. The broker and the database get a bounded number of retries
//! (`STARTUP_MAX_RETRIES`); failing to reach either after that is fatal.

use crate::app::Stage;
use crate::config::{Config, ConfigError};
use crate::oracle::build_oracle;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use triage_core::event_bus::EventBusError;
use triage_core::oracle::Oracle;
use triage_core::repository::RepositoryError;
use triage_projections::PostgresTicketRepository;
use triage_redpanda::RedpandaEventBus;
use triage_runtime::retry::retry_with_backoff;

/// Startup failures.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The broker could not be reached or prepared.
    #[error("Event bus unavailable: {0}")]
    Bus(#[from] EventBusError),

    /// The database could not be reached or migrated.
    #[error("Store unavailable: {0}")]
    Store(#[from] RepositoryError),
}

/// Infrastructure shared by the stages running in this process.
pub struct Resources {
    /// Kafka-compatible bus (always present)
    pub bus: Arc<RedpandaEventBus>,
    /// Read model, present when the materializer runs here
    pub repository: Option<Arc<PostgresTicketRepository>>,
    /// Oracle, present when the analysis stage runs here
    pub oracle: Option<Arc<dyn Oracle>>,
    producer_timeout: Duration,
}

impl Resources {
    /// Acquire what `stages` need.
    ///
    /// With no stages (the submit tool) only the bus is created.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the oracle is misconfigured, the broker
    /// cannot create the topics, or the database cannot be reached or migrated
    /// within the startup retries.
    pub async fn acquire(config: &Config, stages: &[Stage]) -> Result<Self, BootstrapError> {
        let bus = Arc::new(connect_bus(config)?);
        if !stages.is_empty() {
            let topics = [
                config.topics.tickets_new.as_str(),
                config.topics.tickets_analyzed.as_str(),
            ];
            let (admin, topics) = (bus.as_ref(), &topics);
            let partitions = config.redpanda.topic_partitions;
            retry_with_backoff(config.startup_retry_policy(), move || {
                admin.ensure_topics(topics, partitions)
            })
            .await?;
            info!(brokers = %bus.brokers(), "Event bus ready");
        }

        let oracle = if stages.contains(&Stage::Analysis) {
            let oracle = build_oracle(&config.oracle)?;
            info!(oracle = oracle.name(), "Oracle ready");
            Some(oracle)
        } else {
            None
        };

        let repository = if stages.contains(&Stage::Materializer) {
            Some(Arc::new(connect_store(config).await?))
        } else {
            None
        };

        Ok(Self {
            bus,
            repository,
            oracle,
            producer_timeout: Duration::from_millis(config.redpanda.producer_timeout_ms),
        })
    }

    /// Flush the producer and close the database pool.
    pub async fn close(self) {
        let bus = Arc::clone(&self.bus);
        let timeout = self.producer_timeout;
        match tokio::task::spawn_blocking(move || bus.flush(timeout)).await {
            Ok(Ok(())) => info!("Event bus producer flushed"),
            Ok(Err(e)) => warn!(error = %e, "Event bus producer did not flush"),
            Err(e) => warn!(error = %e, "Producer flush task failed"),
        }

        if let Some(repository) = self.repository {
            repository.close().await;
            info!("Database pool closed");
        }
    }
}

/// Create the Redpanda client from configuration.
///
/// # Errors
///
/// Returns `EventBusError::ConnectionFailed` if the producer cannot be created.
pub fn connect_bus(config: &Config) -> Result<RedpandaEventBus, EventBusError> {
    RedpandaEventBus::builder()
        .brokers(config.redpanda.brokers.clone())
        .timeout(Duration::from_millis(config.redpanda.producer_timeout_ms))
        .auto_offset_reset(config.redpanda.auto_offset_reset.clone())
        .session_timeout(Duration::from_millis(config.redpanda.session_timeout_ms))
        .build()
}

/// Connect to PostgreSQL and apply migrations, retrying per the startup policy.
///
/// # Errors
///
/// Returns the last `RepositoryError` once the retries are exhausted.
pub async fn connect_store(config: &Config) -> Result<PostgresTicketRepository, RepositoryError> {
    info!("Connecting to read model database...");
    let settings = config.pool_settings();
    let (url, settings) = (config.database.url.as_str(), &settings);

    retry_with_backoff(config.startup_retry_policy(), move || async move {
        let repository = PostgresTicketRepository::connect(url, settings).await?;
        repository.migrate().await?;
        Ok::<_, RepositoryError>(repository)
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(retries: &str) -> Config {
        let retries = retries.to_string();
        Config::from_lookup(move |key| match key {
            "DATABASE_URL" => Some("not a url".to_string()),
            "RETRY_INITIAL_DELAY_MS" => Some("100".to_string()),
            "STARTUP_MAX_RETRIES" => Some(retries.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn store_is_retried_with_backoff_before_failing() {
        let started = tokio::time::Instant::now();

        let err = connect_store(&config("2")).await.err().unwrap();

        assert!(matches!(err, RepositoryError::Unavailable(_)));
        // 100 ms then 200 ms, each within 20 % jitter.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(230), "{waited:?}");
        assert!(waited <= Duration::from_millis(400), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_fail_immediately() {
        let started = tokio::time::Instant::now();

        assert!(connect_store(&config("0")).await.is_err());
        assert!(started.elapsed() < Duration::from_millis(1));
    }
}
