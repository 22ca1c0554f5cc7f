//! Pipeline health bookkeeping.
//!
//! Each sync source records its batch successes and failures here; the
//! status endpoint exposes the snapshot, and the unhealthy gauge is the
//! pipeline-health alarm raised when a batch exhausts its retries.

use crate::metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Health record for one sync source
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared health state across the sync loops
#[derive(Clone, Default)]
pub struct PipelineHealth {
    sources: Arc<DashMap<String, SourceHealth>>,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, source_id: &str) {
        let mut entry = self.sources.entry(source_id.to_string()).or_default();
        entry.healthy = true;
        entry.consecutive_failures = 0;
        entry.last_success_at = Some(Utc::now());
        entry.last_error = None;

        metrics::SYNC_PIPELINE_UNHEALTHY
            .with_label_values(&[source_id])
            .set(0.0);
    }

    /// Record a batch failure after retries were exhausted
    pub fn record_failure(&self, source_id: &str, error: &str) {
        let mut entry = self.sources.entry(source_id.to_string()).or_default();
        entry.healthy = false;
        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(Utc::now());
        entry.last_error = Some(error.to_string());

        metrics::SYNC_PIPELINE_UNHEALTHY
            .with_label_values(&[source_id])
            .set(1.0);

        tracing::error!(
            source_id = source_id,
            consecutive_failures = entry.consecutive_failures,
            error = error,
            "Sync pipeline unhealthy"
        );
    }

    /// True when every known source is healthy (an idle pipeline with no
    /// recorded sources counts as healthy)
    pub fn all_healthy(&self) -> bool {
        self.sources.iter().all(|entry| entry.value().healthy)
    }

    /// Snapshot for the status endpoint
    pub fn snapshot(&self) -> std::collections::BTreeMap<String, SourceHealth> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_then_recovery() {
        let health = PipelineHealth::new();
        assert!(health.all_healthy());

        health.record_failure("listener", "index unreachable");
        health.record_failure("listener", "index unreachable");
        assert!(!health.all_healthy());
        assert_eq!(
            health.snapshot()["listener"].consecutive_failures,
            2
        );

        health.record_success("listener");
        assert!(health.all_healthy());
        assert_eq!(health.snapshot()["listener"].consecutive_failures, 0);
    }
}
