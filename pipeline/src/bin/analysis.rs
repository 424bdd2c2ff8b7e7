//! Analysis stage only.
//!
//! Scale out by running more instances with the same `ANALYSIS_CONSUMER_GROUP`.

use triage_pipeline::app::{self, Stage};
use triage_pipeline::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    app::init_tracing(config.runtime.log_format);
    tracing::info!(
        group = %config.groups.analysis,
        oracle = ?config.oracle.provider,
        "Starting analysis stage"
    );

    app::run(config, &[Stage::Analysis]).await?;
    Ok(())
}
