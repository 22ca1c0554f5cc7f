//! The denormalization refresher: a coarser-grained, periodic complement
//! to the change-capture listener. It trades latency for simplicity and
//! resilience to listener outages by recomputing the whole joined view
//! when anything changed since its watermark.

use crate::config::SyncConfig;
use crate::metrics;
use crate::search::{IndexManager, ProspectDocument};
use crate::sync::checkpoint::CheckpointStore;
use crate::sync::error::SyncResult;
use crate::sync::health::PipelineHealth;
use crate::sync::source::RelationalStore;
use crate::sync::{LISTENER_SOURCE, REFRESHER_SOURCE};
use std::sync::Arc;
use std::time::Duration;

pub struct DenormalizationRefresher {
    store: Arc<dyn RelationalStore>,
    index: Arc<IndexManager>,
    checkpoints: CheckpointStore,
    health: PipelineHealth,
    config: SyncConfig,
}

impl DenormalizationRefresher {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        index: Arc<IndexManager>,
        checkpoints: CheckpointStore,
        health: PipelineHealth,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            index,
            checkpoints,
            health,
            config,
        }
    }

    /// Run the refresh loop until process shutdown
    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.refresh_interval_secs,
            "Denormalization refresher started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.refresh_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.run_once().await {
                Ok(true) => {
                    metrics::SYNC_BATCHES_TOTAL
                        .with_label_values(&[REFRESHER_SOURCE, "committed"])
                        .inc();
                    self.health.record_success(REFRESHER_SOURCE);
                }
                Ok(false) => {}
                Err(e) => {
                    metrics::SYNC_BATCHES_TOTAL
                        .with_label_values(&[REFRESHER_SOURCE, "failed"])
                        .inc();
                    self.health.record_failure(REFRESHER_SOURCE, &e.to_string());
                }
            }
        }
    }

    /// One refresher cycle: refresh only when a source row changed since
    /// the watermark. Returns whether a refresh ran.
    pub async fn run_once(&self) -> SyncResult<bool> {
        let Some(max_updated_at) = self.store.max_updated_at().await? else {
            return Ok(false);
        };

        let watermark = self.checkpoints.load(REFRESHER_SOURCE).await?;
        let max_micros = max_updated_at.timestamp_micros().max(0) as u64;

        if max_micros <= watermark.position {
            tracing::debug!(watermark = watermark.position, "View is current, skipping refresh");
            return Ok(false);
        }

        self.refresh_now().await?;
        Ok(true)
    }

    /// Recompute the joined view and rebuild the index. The rebuild lands
    /// in one commit, so readers only ever see the previous complete view
    /// or the new one; the watermark advances afterwards.
    pub async fn refresh_now(&self) -> SyncResult<usize> {
        // Snapshot the source watermark before reading the view so a write
        // racing the refresh stays ahead of the checkpoint
        let source_max = self
            .store
            .max_updated_at()
            .await?
            .map(|dt| dt.timestamp_micros().max(0) as u64)
            .unwrap_or(0);

        let rows = self.store.denormalized_view().await?;
        let docs: Vec<ProspectDocument> = rows
            .iter()
            .map(|(prospect, company)| ProspectDocument::from_join(prospect, company))
            .collect();

        let count = self.index.rebuild(&docs).await?;

        // The watermark covers every source row observed by this refresh,
        // including dangling prospects omitted from the view
        let watermark = docs
            .iter()
            .map(|doc| doc.last_updated_micros().max(0) as u64)
            .max()
            .unwrap_or(0)
            .max(source_max);
        if watermark > 0 {
            self.checkpoints.advance(REFRESHER_SOURCE, watermark).await?;
        }

        tracing::info!(documents = count, watermark = watermark, "Denormalized view refreshed");
        Ok(count)
    }

    /// Explicit re-sync: drop every checkpoint and rebuild the index from
    /// the joined view in the same operation, so a mapping change cannot
    /// leave stale documents behind.
    pub async fn full_resync(&self) -> SyncResult<usize> {
        tracing::info!("Full re-sync requested");

        self.checkpoints.reset(LISTENER_SOURCE).await?;
        self.checkpoints.reset(REFRESHER_SOURCE).await?;
        self.index.clear().await?;

        self.refresh_now().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::models::{Company, Prospect};
    use crate::state::MemoryKvStore;
    use crate::sync::source::InMemoryRelationalStore;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, secs).unwrap()
    }

    fn fixture(
        dir: &TempDir,
    ) -> (
        DenormalizationRefresher,
        Arc<InMemoryRelationalStore>,
        Arc<IndexManager>,
    ) {
        let store = Arc::new(InMemoryRelationalStore::new());
        let index = Arc::new(
            IndexManager::new(SearchConfig {
                index_path: dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let checkpoints = CheckpointStore::new(Arc::new(MemoryKvStore::new()), "test");

        let refresher = DenormalizationRefresher::new(
            store.clone(),
            index.clone(),
            checkpoints,
            PipelineHealth::new(),
            SyncConfig::default(),
        );

        (refresher, store, index)
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_joined_view() {
        let dir = TempDir::new().unwrap();
        let (refresher, store, index) = fixture(&dir);

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        store.upsert_prospect(Prospect::new(11, 1, "Al", "Lee").with_updated_at(at(3)));

        assert!(refresher.run_once().await.unwrap());
        assert_eq!(index.stats().unwrap().total_documents, 2);
    }

    #[tokio::test]
    async fn test_refresh_noops_when_watermark_current() {
        let dir = TempDir::new().unwrap();
        let (refresher, store, _index) = fixture(&dir);

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));

        assert!(refresher.run_once().await.unwrap());
        // Nothing changed since: the second cycle must not refresh
        assert!(!refresher.run_once().await.unwrap());

        // A newer write moves the max(updated_at) past the watermark
        store.upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(9)));
        assert!(refresher.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_source_never_refreshes() {
        let dir = TempDir::new().unwrap();
        let (refresher, _store, _index) = fixture(&dir);
        assert!(!refresher.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_full_resync_drops_stale_documents() {
        let dir = TempDir::new().unwrap();
        let (refresher, store, index) = fixture(&dir);

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        refresher.run_once().await.unwrap();

        // The row disappears from the source without a listener event
        store.delete_prospect(10, at(5));

        refresher.full_resync().await.unwrap();
        assert_eq!(index.stats().unwrap().total_documents, 0);
    }
}
