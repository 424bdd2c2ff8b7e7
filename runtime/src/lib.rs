//! # Triage Runtime
//!
//! Execution machinery shared by every pipeline stage.
//!
//! ## Core Components
//!
//! - **`ConsumerLoop`**: subscribe, fetch, handle, then commit or redeliver
//! - **`Backoff`**: bounded exponential delays with jitter for transient failures
//! - **`Shutdown` / `TaskGroup`**: cooperative cancellation and supervised joins
//! - **Metrics**: Prometheus exporter and the pipeline's counters
//!
//! ## Example
//!
//! ```ignore
//! use triage_runtime::consumer::ConsumerLoop;
//! use triage_runtime::lifecycle::{Shutdown, TaskGroup};
//!
//! let shutdown = Shutdown::new();
//! let mut tasks = TaskGroup::new();
//!
//! let consumer = ConsumerLoop::builder()
//!     .topic("tickets.new")
//!     .group("triage-analysis-dev")
//!     .event_bus(bus)
//!     .handler(handler)
//!     .shutdown(shutdown.listener())
//!     .build()?;
//! tasks.spawn(consumer.name().to_string(), consumer.run());
//!
//! shutdown_signal().await;
//! shutdown.trigger();
//! tasks.join(Duration::from_secs(30)).await;
//! ```

/// Consumer loop with commit-after-process semantics
pub mod consumer;

/// Shutdown signalling and task supervision
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use consumer::{ConsumerLoop, DeliveryHandler, Disposition};
pub use lifecycle::{Shutdown, ShutdownListener, TaskGroup, shutdown_signal};
pub use retry::{Backoff, RetryPolicy};
