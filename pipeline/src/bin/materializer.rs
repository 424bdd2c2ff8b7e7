//! Materializer only: both loops writing the PostgreSQL read model.

use triage_pipeline::app::{self, Stage};
use triage_pipeline::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    app::init_tracing(config.runtime.log_format);
    tracing::info!(
        created_group = %config.groups.materializer_created,
        analyzed_group = %config.groups.materializer_analyzed,
        "Starting materializer"
    );

    app::run(config, &[Stage::Materializer]).await?;
    Ok(())
}
