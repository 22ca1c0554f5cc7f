//! The change-capture listener: consumes the ordered change stream, joins
//! events against the relational store, and writes the resulting documents
//! idempotently into the index.
//!
//! Delivery is at-least-once: the checkpoint advances only after the whole
//! batch is committed, so a failed batch is redelivered and the index
//! writer's last-writer-wins makes the reprocessing harmless. A row that
//! disappeared before the join completed maps to a document deletion, not
//! an error.

use crate::config::SyncConfig;
use crate::metrics;
use crate::search::{IndexManager, IndexOp};
use crate::sync::checkpoint::CheckpointStore;
use crate::sync::error::SyncResult;
use crate::sync::events::{ChangeEvent, ChangeOp, ChangeStream, SourceTable};
use crate::sync::health::PipelineHealth;
use crate::sync::source::RelationalStore;
use crate::sync::LISTENER_SOURCE;
use std::sync::Arc;
use std::time::Duration;

pub struct ChangeCaptureListener {
    stream: Arc<dyn ChangeStream>,
    store: Arc<dyn RelationalStore>,
    index: Arc<IndexManager>,
    checkpoints: CheckpointStore,
    health: PipelineHealth,
    config: SyncConfig,
}

impl ChangeCaptureListener {
    pub fn new(
        stream: Arc<dyn ChangeStream>,
        store: Arc<dyn RelationalStore>,
        index: Arc<IndexManager>,
        checkpoints: CheckpointStore,
        health: PipelineHealth,
        config: SyncConfig,
    ) -> Self {
        Self {
            stream,
            store,
            index,
            checkpoints,
            health,
            config,
        }
    }

    /// Run the listener loop until process shutdown. At most one instance
    /// per source may be active; enforced by external coordination.
    pub async fn run(&self) {
        tracing::info!("Change capture listener started");
        let idle = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            match self.run_once().await {
                // A batch was processed; poll again immediately in case
                // the stream has more behind it
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(idle).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Listener cycle failed");
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// One listener cycle: read a batch from the checkpoint, process it,
    /// advance the checkpoint. Returns whether a batch was processed.
    pub async fn run_once(&self) -> SyncResult<bool> {
        let checkpoint = self.checkpoints.load(LISTENER_SOURCE).await?;
        let batch = self
            .stream
            .next_batch(checkpoint.position, self.config.batch_size)
            .await?;

        if batch.is_empty() {
            return Ok(false);
        }

        let max_position = batch.iter().map(|e| e.position).max().unwrap_or(0);
        let ops = self.map_batch(&batch).await?;

        self.apply_with_retry(&ops).await?;
        self.checkpoints.advance(LISTENER_SOURCE, max_position).await?;
        self.health.record_success(LISTENER_SOURCE);

        tracing::debug!(
            events = batch.len(),
            ops = ops.len(),
            position = max_position,
            "Listener batch committed"
        );

        Ok(true)
    }

    /// Join each event against the relational store and emit index ops.
    /// The event payload is never trusted: rows are re-read, so a
    /// redelivered stale event converges on current state.
    async fn map_batch(&self, batch: &[ChangeEvent]) -> SyncResult<Vec<IndexOp>> {
        let mut ops = Vec::with_capacity(batch.len());

        for event in batch {
            match (event.table, event.op) {
                (SourceTable::Prospect, ChangeOp::Delete) => {
                    ops.push(IndexOp::Delete {
                        prospect_id: event.row_key,
                        as_of: event.occurred_at,
                    });
                }
                (SourceTable::Prospect, _) => {
                    ops.push(self.map_prospect(event.row_key, event).await?);
                }
                (SourceTable::Company, ChangeOp::Delete) => {
                    self.delete_company_documents(event, &mut ops)?;
                }
                (SourceTable::Company, _) => {
                    match self.store.company(event.row_key).await? {
                        Some(company) => {
                            // Fan out to every prospect of the company
                            let prospects =
                                self.store.prospects_for_company(company.id).await?;
                            for prospect in prospects {
                                ops.push(IndexOp::Upsert(
                                    crate::search::ProspectDocument::from_join(
                                        &prospect, &company,
                                    ),
                                ));
                            }
                        }
                        // Row vanished between the event and the join
                        None => self.delete_company_documents(event, &mut ops)?,
                    }
                }
            }
        }

        Ok(ops)
    }

    async fn map_prospect(&self, prospect_id: u64, event: &ChangeEvent) -> SyncResult<IndexOp> {
        let Some(prospect) = self.store.prospect(prospect_id).await? else {
            // Deleted before the join completed
            return Ok(IndexOp::Delete {
                prospect_id,
                as_of: event.occurred_at,
            });
        };

        let Some(company) = self.store.company(prospect.company_id).await? else {
            // Dangling company reference: treated as deletion of the
            // corresponding document
            return Ok(IndexOp::Delete {
                prospect_id,
                as_of: event.occurred_at,
            });
        };

        Ok(IndexOp::Upsert(crate::search::ProspectDocument::from_join(
            &prospect, &company,
        )))
    }

    /// A company whose row is gone: remove every indexed document that
    /// still references it. The index is the only place those document ids
    /// remain discoverable.
    fn delete_company_documents(
        &self,
        event: &ChangeEvent,
        ops: &mut Vec<IndexOp>,
    ) -> SyncResult<()> {
        for prospect_id in self.index.prospect_ids_for_company(event.row_key)? {
            ops.push(IndexOp::Delete {
                prospect_id,
                as_of: event.occurred_at,
            });
        }
        Ok(())
    }

    /// Apply a batch with bounded exponential backoff. The batch commits
    /// whole or not at all; exhausting the retries raises the
    /// pipeline-health alarm and leaves the checkpoint unmoved.
    async fn apply_with_retry(&self, ops: &[IndexOp]) -> SyncResult<()> {
        let mut attempt = 0u32;

        loop {
            match self.index.apply_batch(ops).await {
                Ok(outcome) => {
                    metrics::SYNC_BATCHES_TOTAL
                        .with_label_values(&[LISTENER_SOURCE, "committed"])
                        .inc();
                    metrics::SYNC_DOCUMENTS_TOTAL
                        .with_label_values(&["upserted"])
                        .inc_by(outcome.upserted as f64);
                    metrics::SYNC_DOCUMENTS_TOTAL
                        .with_label_values(&["deleted"])
                        .inc_by(outcome.deleted as f64);
                    metrics::SYNC_DOCUMENTS_TOTAL
                        .with_label_values(&["stale_skipped"])
                        .inc_by(outcome.stale_skipped as f64);
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_retries => {
                    let backoff =
                        Duration::from_secs(self.config.retry_backoff_secs << attempt.min(16));
                    attempt += 1;
                    metrics::SYNC_BATCHES_TOTAL
                        .with_label_values(&[LISTENER_SOURCE, "retried"])
                        .inc();
                    tracing::warn!(
                        attempt = attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Index write failed, retrying batch"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    metrics::SYNC_BATCHES_TOTAL
                        .with_label_values(&[LISTENER_SOURCE, "failed"])
                        .inc();
                    self.health.record_failure(LISTENER_SOURCE, &e.to_string());
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::models::{Company, Prospect};
    use crate::state::MemoryKvStore;
    use crate::sync::events::ScriptedChangeStream;
    use crate::sync::source::InMemoryRelationalStore;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, secs).unwrap()
    }

    struct Fixture {
        listener: ChangeCaptureListener,
        store: Arc<InMemoryRelationalStore>,
        stream: ScriptedChangeStream,
        index: Arc<IndexManager>,
        checkpoints: CheckpointStore,
    }

    fn fixture(dir: &TempDir) -> Fixture {
        let store = Arc::new(InMemoryRelationalStore::new());
        let stream = ScriptedChangeStream::new();
        let index = Arc::new(
            IndexManager::new(SearchConfig {
                index_path: dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let checkpoints = CheckpointStore::new(Arc::new(MemoryKvStore::new()), "test");

        let listener = ChangeCaptureListener::new(
            Arc::new(stream.clone()),
            store.clone(),
            index.clone(),
            checkpoints.clone(),
            PipelineHealth::new(),
            SyncConfig {
                max_retries: 0,
                retry_backoff_secs: 0,
                ..Default::default()
            },
        );

        Fixture {
            listener,
            store,
            stream,
            index,
            checkpoints,
        }
    }

    fn event(table: SourceTable, op: ChangeOp, row_key: u64, position: u64) -> ChangeEvent {
        ChangeEvent {
            table,
            op,
            row_key,
            position,
            occurred_at: at(position as u32),
        }
    }

    #[tokio::test]
    async fn test_prospect_insert_lands_in_index() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        f.store
            .upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        f.store
            .upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Insert, 10, 1))
            .await;

        assert!(f.listener.run_once().await.unwrap());
        assert_eq!(f.index.stats().unwrap().total_documents, 1);
        assert_eq!(
            f.checkpoints.load(LISTENER_SOURCE).await.unwrap().position,
            1
        );
    }

    #[tokio::test]
    async fn test_missing_row_maps_to_deletion() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        // Seed the index with a document for prospect 10
        f.store
            .upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        f.store
            .upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Insert, 10, 1))
            .await;
        f.listener.run_once().await.unwrap();

        // An update event arrives for a row that is already gone
        f.store.delete_prospect(10, at(5));
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Update, 10, 2))
            .await;
        f.listener.run_once().await.unwrap();

        assert_eq!(f.index.stats().unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_company_update_fans_out_to_prospects() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        f.store
            .upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        f.store
            .upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        f.store
            .upsert_prospect(Prospect::new(11, 1, "Al", "Lee").with_updated_at(at(2)));
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Insert, 10, 1))
            .await;
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Insert, 11, 2))
            .await;
        f.listener.run_once().await.unwrap();

        // Rename the company; both documents must pick up the new name
        f.store
            .upsert_company(Company::new(1, "Acme Corp").with_updated_at(at(9)));
        f.stream
            .push(event(SourceTable::Company, ChangeOp::Update, 1, 3))
            .await;
        f.listener.run_once().await.unwrap();

        assert_eq!(f.index.stats().unwrap().total_documents, 2);
        assert_eq!(f.index.prospect_ids_for_company(1).unwrap(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_company_delete_removes_documents() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        f.store
            .upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        f.store
            .upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        f.stream
            .push(event(SourceTable::Prospect, ChangeOp::Insert, 10, 1))
            .await;
        f.listener.run_once().await.unwrap();
        assert_eq!(f.index.stats().unwrap().total_documents, 1);

        f.store.delete_company(1, at(5));
        f.stream
            .push(event(SourceTable::Company, ChangeOp::Delete, 1, 2))
            .await;
        f.listener.run_once().await.unwrap();

        assert_eq!(f.index.stats().unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_stale_redelivery_does_not_revert() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);

        // Company renamed Acme -> Acme Corp at T2; both change events are
        // in flight, and the T1 event is redelivered after T2 commits.
        f.store
            .upsert_company(Company::new(1, "Acme Corp").with_updated_at(at(20)));
        f.store
            .upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));

        f.stream
            .push(event(SourceTable::Company, ChangeOp::Update, 1, 2))
            .await;
        f.listener.run_once().await.unwrap();

        // Redelivery of the older change; the join re-reads current state
        // and the index skips it as stale
        f.stream
            .push(event(SourceTable::Company, ChangeOp::Update, 1, 1))
            .await;
        f.listener.run_once().await.unwrap();

        let ids = f.index.prospect_ids_for_company(1).unwrap();
        assert_eq!(ids, vec![10]);
        assert_eq!(f.index.stats().unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn test_idle_stream_reports_no_work() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        assert!(!f.listener.run_once().await.unwrap());
    }
}
