use prospect_search::{
    api::{build_router, AppState},
    cache::ResultCache,
    config::Config,
    search::{IndexManager, SearchService, SuggestionEngine},
    state::create_kv_store,
    sync::{
        ChangeCaptureListener, CheckpointStore, DenormalizationRefresher,
        InMemoryRelationalStore, PipelineHealth, PollingChangeStream,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so logging can honor it
    let config = Config::load()?;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "prospect_search={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting prospect-search v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = prospect_search::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("Prometheus metrics initialized");
        }
    }

    // Key-value backend: checkpoints and the result cache
    tracing::info!("State backend: {:?}", config.state.backend);
    let kv = create_kv_store(&config.state).await?;

    // Relational source of truth (external collaborator; the in-memory
    // backend serves local mode)
    tracing::info!("Source backend: {:?}", config.source.backend);
    let source = Arc::new(InMemoryRelationalStore::new());

    // Search index
    let index = Arc::new(IndexManager::new(config.search.clone())?);
    tracing::info!(path = ?config.search.index_path, "Search index opened");

    // Query path
    let result_cache = config.cache.enabled.then(|| {
        ResultCache::new(
            kv.clone(),
            Duration::from_secs(config.cache.result_ttl_secs),
            config.state.key_prefix.clone(),
        )
    });
    let search = Arc::new(SearchService::new(
        index.clone(),
        result_cache,
        config.search.clone(),
    ));
    let suggestions = Arc::new(SuggestionEngine::new(
        index.clone(),
        Duration::from_secs(config.cache.suggest_ttl_secs),
        config.search.clone(),
    ));

    // Sync pipeline
    let checkpoints = CheckpointStore::new(kv.clone(), config.state.key_prefix.clone());
    let health = PipelineHealth::new();

    let refresher = Arc::new(DenormalizationRefresher::new(
        source.clone(),
        index.clone(),
        checkpoints.clone(),
        health.clone(),
        config.sync.clone(),
    ));

    if config.sync.listener_enabled {
        let listener = ChangeCaptureListener::new(
            Arc::new(PollingChangeStream::new(source.clone())),
            source.clone(),
            index.clone(),
            checkpoints.clone(),
            health.clone(),
            config.sync.clone(),
        );
        tokio::spawn(async move {
            listener.run().await;
        });
        tracing::info!("Change capture listener started");
    }

    if config.sync.refresher_enabled {
        let refresher_loop = refresher.clone();
        tokio::spawn(async move {
            refresher_loop.run().await;
        });
        tracing::info!("Denormalization refresher started");
    }

    // HTTP API
    let app_state = AppState {
        search,
        suggestions,
        index,
        checkpoints,
        health,
        refresher,
    };
    let app = build_router(app_state);

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API listening on http://{}", http_addr);
    tracing::info!("   Search:   POST http://{}/v1/prospects/search", http_addr);
    tracing::info!("   Suggest:  GET  http://{}/v1/prospects/suggest", http_addr);
    tracing::info!("   Status:   GET  http://{}/v1/sync/status", http_addr);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
