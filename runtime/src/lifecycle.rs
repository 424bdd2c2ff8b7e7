//! Cooperative shutdown and task supervision.
//!
//! A process owns one [`Shutdown`] controller. Every long-running loop holds a
//! [`ShutdownListener`] and checks it between units of work, so a message that
//! is being processed when the signal arrives is finished (and committed)
//! before the loop exits.
//!
//! # Graceful Shutdown
//!
//! 1. `shutdown_signal()` resolves on Ctrl+C or SIGTERM
//! 2. `Shutdown::trigger()` wakes every listener
//! 3. `TaskGroup::join()` waits for all loops, up to a grace period
//! 4. Tasks still running after the grace period are aborted

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Controller side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create an untriggered controller.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A listener that observes this controller.
    #[must_use]
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Ask every listener to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `trigger` has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or the controller is gone).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `delay` unless shutdown is requested first.
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// A named set of background tasks joined together on shutdown.
#[derive(Debug, Default)]
pub struct TaskGroup {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskGroup {
    /// Empty group.
    #[must_use]
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Spawn `task` on the current runtime under `name`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "Starting task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Number of tasks in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task, sharing one `grace` deadline across all of them.
    ///
    /// Tasks still running at the deadline are aborted. Returns how many were.
    pub async fn join(self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = %name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed"),
                Err(_) => {
                    warn!(task = %name, "Task shutdown timed out, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        aborted
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
