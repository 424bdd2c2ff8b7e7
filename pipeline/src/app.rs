//! Application lifecycle: wire stages into consumer loops, run, drain.
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. Every loop stops fetching; a message already being handled finishes
//!    and is committed
//! 2. Loops are joined against one shared grace period (`SHUTDOWN_TIMEOUT`)
//! 3. The producer is flushed and the database pool closed
//!
//! # Example
//!
//! ```rust,ignore
//! let mut app = App::new(config);
//! app.start_analysis(bus.clone(), oracle)?;
//! app.start_materializer(bus, repository)?;
//!
//! shutdown_signal().await;
//! app.stop().await;
//! ```

use crate::analysis::AnalysisHandler;
use crate::bootstrap::{BootstrapError, Resources};
use crate::config::{Config, LogFormat};
use crate::materializer::{AnalyzedHandler, CreatedHandler};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use triage_core::event_bus::EventBus;
use triage_core::oracle::Oracle;
use triage_core::repository::TicketRepository;
use triage_runtime::consumer::MissingField;
use triage_runtime::metrics::MetricsServer;
use triage_runtime::{ConsumerLoop, DeliveryHandler, Shutdown, TaskGroup, shutdown_signal};

/// A consuming stage that can run in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Oracle analysis of new tickets.
    Analysis,
    /// Both materializer loops.
    Materializer,
}

impl Stage {
    /// Every consuming stage.
    pub const ALL: [Self; 2] = [Self::Analysis, Self::Materializer];
}

/// Failure to start or run the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Infrastructure could not be acquired.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// A consumer loop was wired incompletely.
    #[error(transparent)]
    Wiring(#[from] MissingField),

    /// The metrics exporter could not be installed.
    #[error(transparent)]
    Metrics(#[from] triage_runtime::metrics::MetricsError),
}

/// Running consumer loops plus their shutdown controller.
pub struct App {
    config: Arc<Config>,
    shutdown: Shutdown,
    tasks: TaskGroup,
}

impl App {
    /// No loops running yet.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: Shutdown::new(),
            tasks: TaskGroup::new(),
        }
    }

    /// Number of running loops.
    #[must_use]
    pub fn loop_count(&self) -> usize {
        self.tasks.len()
    }

    /// Start the analysis loop.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Wiring`] if the loop cannot be built.
    pub fn start_analysis<B: EventBus + 'static>(
        &mut self,
        bus: Arc<B>,
        oracle: Arc<dyn Oracle>,
    ) -> Result<(), AppError> {
        let handler = AnalysisHandler::new(
            oracle,
            bus.clone(),
            self.config.topics.tickets_analyzed.clone(),
        )
        .with_oracle_timeout(self.config.oracle_timeout());

        let topic = self.config.topics.tickets_new.clone();
        let group = self.config.groups.analysis.clone();
        self.spawn_loop("analysis", topic, group, bus, Arc::new(handler))
    }

    /// Start both materializer loops.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Wiring`] if a loop cannot be built.
    pub fn start_materializer<B: EventBus + 'static>(
        &mut self,
        bus: Arc<B>,
        repository: Arc<dyn TicketRepository>,
    ) -> Result<(), AppError> {
        let created = CreatedHandler::new(Arc::clone(&repository));
        let analyzed = AnalyzedHandler::new(repository);

        let (new_topic, created_group) = (
            self.config.topics.tickets_new.clone(),
            self.config.groups.materializer_created.clone(),
        );
        self.spawn_loop(
            "materializer-created",
            new_topic,
            created_group,
            bus.clone(),
            Arc::new(created),
        )?;

        let (analyzed_topic, analyzed_group) = (
            self.config.topics.tickets_analyzed.clone(),
            self.config.groups.materializer_analyzed.clone(),
        );
        self.spawn_loop(
            "materializer-analyzed",
            analyzed_topic,
            analyzed_group,
            bus,
            Arc::new(analyzed),
        )
    }

    fn spawn_loop(
        &mut self,
        name: &str,
        topic: String,
        group: String,
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), AppError> {
        let consumer = ConsumerLoop::builder()
            .name(name)
            .topic(topic)
            .group(group)
            .event_bus(bus)
            .handler(handler)
            .shutdown(self.shutdown.listener())
            .retry_policy(self.config.retry_policy())
            .fetch_wait(self.config.fetch_wait())
            .build()?;

        self.tasks.spawn(name, consumer.run());
        Ok(())
    }

    /// Signal every loop and wait for them, up to `SHUTDOWN_TIMEOUT`.
    ///
    /// Returns how many loops had to be aborted.
    pub async fn stop(self) -> usize {
        info!(loops = self.tasks.len(), "Stopping consumer loops");
        self.shutdown.trigger();

        let aborted = self.tasks.join(self.config.shutdown_timeout()).await;
        if aborted > 0 {
            warn!(aborted, "Some loops did not stop within the grace period");
        }
        aborted
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,triage=debug,sqlx=warn,rdkafka=warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Run `stages` against the configured Redpanda and PostgreSQL until a
/// shutdown signal, then drain and release resources.
///
/// # Errors
///
/// Returns [`AppError`] if startup fails. Errors after startup are handled
/// inside the loops and never end the process.
pub async fn run(config: Config, stages: &[Stage]) -> Result<(), AppError> {
    if let Some(addr) = config.runtime.metrics_addr {
        MetricsServer::new(addr).start()?;
    }

    let resources = Resources::acquire(&config, stages).await?;
    let mut app = App::new(config);

    if let Some(oracle) = &resources.oracle {
        app.start_analysis(Arc::clone(&resources.bus), Arc::clone(oracle))?;
    }
    if let Some(repository) = &resources.repository {
        let repository: Arc<dyn TicketRepository> = repository.clone();
        app.start_materializer(Arc::clone(&resources.bus), repository)?;
    }
    info!(loops = app.loop_count(), ?stages, "Triage pipeline running");

    shutdown_signal().await;
    app.stop().await;
    resources.close().await;

    info!("Triage pipeline stopped");
    Ok(())
}
