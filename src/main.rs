// ABOUTME: CLI entry point for search-replicator
// ABOUTME: Resolves configuration, initializes logging, and runs the sync daemon

use anyhow::Context;
use clap::Parser;
use search_replicator::config::{ConfigOverrides, ReplicatorConfig};
use search_replicator::replication::SyncDaemon;
use search_replicator::utils::sanitize_url;

#[derive(Parser)]
#[command(name = "search-replicator")]
#[command(
    about = "Incrementally replicate PostgreSQL film works into a search index",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
    /// Run a single pass and exit instead of polling forever
    #[arg(long)]
    once: bool,
    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config =
        ReplicatorConfig::resolve(&cli.overrides).context("Invalid replicator configuration")?;

    tracing::info!(
        source = %format!(
            "{}@{}:{}/{}",
            config.source.user, config.source.host, config.source.port, config.source.dbname
        ),
        schema = %config.source.schema,
        sink = %sanitize_url(&config.sink.url),
        index = %config.sink.index,
        state = %config.sync.state_path.display(),
        "search-replicator starting"
    );

    let mut daemon = SyncDaemon::new(config).await;

    if cli.once {
        let stats = daemon.run_once().await?;
        tracing::info!(
            "Pass completed: {} rows in {} batches, {} loaded, {} rejected, {} skipped",
            stats.rows_read,
            stats.batches,
            stats.documents_loaded,
            stats.documents_failed,
            stats.records_skipped
        );
        return Ok(());
    }

    tokio::select! {
        result = daemon.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping");
            Ok(())
        }
    }
}
