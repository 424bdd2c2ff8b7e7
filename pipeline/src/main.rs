//! Triage pipeline server.
//!
//! Runs the analysis stage and both materializer loops in one process.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run everything
//! cargo run --bin triage
//! ```

use triage_pipeline::app::{self, Stage};
use triage_pipeline::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    app::init_tracing(config.runtime.log_format);
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        oracle = ?config.oracle.provider,
        "Starting triage pipeline"
    );

    app::run(config, &Stage::ALL).await?;
    Ok(())
}
