//! Operational CLI: trigger a full re-sync or inspect sync state without
//! going through the HTTP API.

use anyhow::Context;
use clap::{Parser, Subcommand};
use prospect_search::{
    config::Config,
    search::IndexManager,
    state::create_kv_store,
    sync::{
        CheckpointStore, DenormalizationRefresher, InMemoryRelationalStore, PipelineHealth,
        LISTENER_SOURCE, REFRESHER_SOURCE,
    },
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "prospect-search-cli", version, about = "Prospect search sync operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reset all checkpoints and rebuild the index from the joined view
    FullSync,

    /// Refresh the denormalized view if anything changed
    Refresh,

    /// Print checkpoints and index statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prospect_search=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    let kv = create_kv_store(&config.state)
        .await
        .context("failed to initialize state backend")?;
    let index = Arc::new(IndexManager::new(config.search.clone()).context("failed to open index")?);
    let checkpoints = CheckpointStore::new(kv, config.state.key_prefix.clone());

    match cli.command {
        Command::FullSync => {
            let refresher = build_refresher(&config, index, checkpoints);
            let documents = refresher.full_resync().await?;
            println!("Full re-sync complete: {} documents indexed", documents);
        }
        Command::Refresh => {
            let refresher = build_refresher(&config, index, checkpoints);
            if refresher.run_once().await? {
                println!("Denormalized view refreshed");
            } else {
                println!("View is current, nothing to do");
            }
        }
        Command::Stats => {
            let stats = index.stats()?;
            let listener = checkpoints.load(LISTENER_SOURCE).await?;
            let refresher = checkpoints.load(REFRESHER_SOURCE).await?;

            let report = serde_json::json!({
                "index": {
                    "totalDocuments": stats.total_documents,
                    "indexSizeBytes": stats.index_size_bytes,
                    "numSegments": stats.num_segments,
                },
                "checkpoints": {
                    LISTENER_SOURCE: listener,
                    REFRESHER_SOURCE: refresher,
                },
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn build_refresher(
    config: &Config,
    index: Arc<IndexManager>,
    checkpoints: CheckpointStore,
) -> DenormalizationRefresher {
    DenormalizationRefresher::new(
        Arc::new(InMemoryRelationalStore::new()),
        index,
        checkpoints,
        PipelineHealth::new(),
        config.sync.clone(),
    )
}
