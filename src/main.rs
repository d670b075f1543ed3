// src/main.rs
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ct_sentinel::cli::Cli;
use ct_sentinel::config::Config;
use ct_sentinel::ct_log::HttpLogClient;
use ct_sentinel::database::PostgresStateStore;
use ct_sentinel::worker::{IngestionWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.validate()?;

    let config = Config::from_file(Path::new(&cli.config))?;

    let log_level = cli.log_level(&config.logging.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!("starting ct-sentinel");

    let store = PostgresStateStore::new(&config.database.url, config.database.max_connections)
        .await?;
    store.migrate().await?;
    store.reset_running_flag().await?;

    let log_client = HttpLogClient::new(config.ct_log.base_url.clone())?;

    let worker = Arc::new(IngestionWorker::new(
        Arc::new(log_client),
        Arc::new(store),
        WorkerConfig {
            poll_interval_secs: config.ct_log.poll_interval_secs,
            batch_size: config.ct_log.batch_size,
            reprocess_on_idle: config.ct_log.reprocess_on_idle,
        },
    ));

    if cli.once {
        tracing::info!("running a single ingestion tick (--once)");
        worker.run_once().await?;
        return Ok(());
    }

    worker.start().await?;
    tracing::info!("ingestion worker running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    worker.stop().await?;

    Ok(())
}
