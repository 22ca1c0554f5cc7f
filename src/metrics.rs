//! Prometheus metrics for the sync pipeline and the query path.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Sync batches processed
    ///
    /// Labels: source, result (committed | retried | failed)
    pub static ref SYNC_BATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("sync_batches_total", "Sync batches processed")
            .namespace("prospect_search"),
        &["source", "result"]
    ).expect("Failed to create SYNC_BATCHES_TOTAL metric");

    /// Index document operations applied by the sync pipeline
    ///
    /// Labels: op (upserted | deleted | stale_skipped)
    pub static ref SYNC_DOCUMENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("sync_documents_total", "Index document operations applied")
            .namespace("prospect_search"),
        &["op"]
    ).expect("Failed to create SYNC_DOCUMENTS_TOTAL metric");

    /// Last committed checkpoint position per sync source
    pub static ref SYNC_CHECKPOINT_POSITION: GaugeVec = GaugeVec::new(
        Opts::new("sync_checkpoint_position", "Last committed checkpoint position")
            .namespace("prospect_search"),
        &["source"]
    ).expect("Failed to create SYNC_CHECKPOINT_POSITION metric");

    /// Pipeline health per source: 0 healthy, 1 unhealthy
    pub static ref SYNC_PIPELINE_UNHEALTHY: GaugeVec = GaugeVec::new(
        Opts::new("sync_pipeline_unhealthy", "Pipeline health per source (0 healthy, 1 unhealthy)")
            .namespace("prospect_search"),
        &["source"]
    ).expect("Failed to create SYNC_PIPELINE_UNHEALTHY metric");

    /// Cache operations
    ///
    /// Labels: cache (result | suggest), outcome (hit | miss | error)
    pub static ref CACHE_OPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cache_ops_total", "Cache lookups by outcome")
            .namespace("prospect_search"),
        &["cache", "outcome"]
    ).expect("Failed to create CACHE_OPS_TOTAL metric");

    /// Search request latency in seconds
    ///
    /// Labels: kind (paged | cursor | suggest)
    pub static ref SEARCH_LATENCY_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_latency_seconds", "Search request latency in seconds")
            .namespace("prospect_search")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["kind"]
    ).expect("Failed to create SEARCH_LATENCY_SECONDS metric");
}

/// Register all metrics with the global registry. Idempotent per process;
/// call once at startup.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(SYNC_BATCHES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SYNC_DOCUMENTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SYNC_CHECKPOINT_POSITION.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SYNC_PIPELINE_UNHEALTHY.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(CACHE_OPS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_LATENCY_SECONDS.clone()))?;
    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&PROMETHEUS_REGISTRY.gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_and_render() {
        // Registration may already have happened in another test
        let _ = init_metrics();

        SYNC_BATCHES_TOTAL
            .with_label_values(&["listener", "committed"])
            .inc();
        CACHE_OPS_TOTAL.with_label_values(&["result", "hit"]).inc();

        let rendered = render();
        assert!(rendered.contains("prospect_search_sync_batches_total"));
    }
}
