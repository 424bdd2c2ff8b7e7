//! Submit one ticket and print its id.
//!
//! ```bash
//! cargo run --bin triage-submit -- monitor-x "disk full on db1"
//! ```

use anyhow::{Context, bail};
use triage_pipeline::app;
use triage_pipeline::bootstrap::Resources;
use triage_pipeline::{Config, Ingestion};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let mut args = std::env::args().skip(1);
    let (Some(source), Some(payload), None) = (args.next(), args.next(), args.next()) else {
        bail!("usage: triage-submit <source> <payload>");
    };

    let config = Config::from_env()?;
    app::init_tracing(config.runtime.log_format);

    let resources = Resources::acquire(&config, &[])
        .await
        .context("failed to connect to the event bus")?;
    let ingestion = Ingestion::new(resources.bus.clone(), config.topics.tickets_new.clone());

    let submitted = ingestion.submit(source, payload).await;
    resources.close().await;

    let created = submitted.context("ticket was not accepted")?;
    println!("{}", created.id);
    Ok(())
}
