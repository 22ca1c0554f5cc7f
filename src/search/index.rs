//! Search index management
//!
//! Writes are idempotent with last-writer-wins by `last_updated`, not by
//! arrival order: an upsert carrying an older watermark than the currently
//! applied document (or a delete tombstone) for the same key is skipped, so
//! redelivered or reordered batches converge on the same index state.

use crate::config::SearchConfig;
use crate::search::document::{build_prospect_schema, ProspectDocument, SearchDocument};
use crate::search::error::{SearchError, SearchResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Schema, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

/// A single write against the index
#[derive(Debug, Clone)]
pub enum IndexOp {
    /// Insert or replace the document for its prospect id
    Upsert(ProspectDocument),

    /// Remove the document for a prospect id. `as_of` is the watermark of
    /// the deletion, so a late stale upsert cannot resurrect the document.
    Delete {
        prospect_id: u64,
        as_of: DateTime<Utc>,
    },
}

/// Per-batch application summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub upserted: usize,
    pub deleted: usize,
    pub stale_skipped: usize,
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total number of documents in the index
    pub total_documents: u64,

    /// Index size in bytes
    pub index_size_bytes: u64,

    /// Number of segments
    pub num_segments: usize,
}

/// Manages the Tantivy search index
pub struct IndexManager {
    index: Index,
    schema: Schema,
    writer: Arc<RwLock<IndexWriter>>,
    reader: IndexReader,
    /// Last applied `last_updated` (microseconds) per prospect id,
    /// including delete tombstones. Re-resolved from the index when a key
    /// is unknown, so the guarantee survives restarts.
    applied: DashMap<u64, i64>,
    config: SearchConfig,
}

impl IndexManager {
    /// Open or create the index at the configured path
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        std::fs::create_dir_all(&config.index_path).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
        })?;

        let schema = build_prospect_schema();

        let index = if Self::index_exists(&config.index_path) {
            Index::open_in_dir(&config.index_path).map_err(|e| {
                SearchError::IndexInitFailed(format!("Failed to open existing index: {}", e))
            })?
        } else {
            Index::create_in_dir(&config.index_path, schema.clone()).map_err(|e| {
                SearchError::IndexInitFailed(format!("Failed to create new index: {}", e))
            })?
        };

        let writer = index
            .writer(config.writer_heap_size)
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create writer: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        Ok(Self {
            index,
            schema,
            writer: Arc::new(RwLock::new(writer)),
            reader,
            applied: DashMap::new(),
            config,
        })
    }

    /// Check if an index exists at the given path
    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    /// Get the schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get the index
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Get the reader
    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    fn id_field(&self) -> SearchResult<tantivy::schema::Field> {
        self.schema
            .get_field("prospect_id")
            .map_err(|e| SearchError::SchemaError(e.to_string()))
    }

    /// Watermark currently applied for a key, consulting the in-memory map
    /// first and the committed index when the key is unknown.
    fn applied_watermark(&self, prospect_id: u64) -> SearchResult<Option<i64>> {
        if let Some(entry) = self.applied.get(&prospect_id) {
            return Ok(Some(*entry));
        }
        self.indexed_watermark(prospect_id)
    }

    /// Read the `last_updated` of the committed document for a key, if any
    fn indexed_watermark(&self, prospect_id: u64) -> SearchResult<Option<i64>> {
        let searcher = self.reader.searcher();
        let term = Term::from_field_u64(self.id_field()?, prospect_id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);

        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(|e| SearchError::SearchFailed(format!("Watermark lookup failed: {}", e)))?;

        let Some((_score, address)) = top.into_iter().next() else {
            return Ok(None);
        };

        let doc: TantivyDocument = searcher
            .doc(address)
            .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))?;

        let field = self
            .schema
            .get_field("last_updated")
            .map_err(|e| SearchError::SchemaError(e.to_string()))?;

        Ok(doc
            .get_first(field)
            .and_then(|v| v.as_datetime())
            .map(|dt| dt.into_timestamp_micros()))
    }

    /// Apply a batch of upserts/deletes and commit once. The whole batch
    /// either commits or is rolled back; watermarks are published only after
    /// a successful commit so a failed batch can be retried verbatim.
    pub async fn apply_batch(&self, ops: &[IndexOp]) -> SearchResult<BatchOutcome> {
        let id_field = self.id_field()?;
        let mut writer = self.writer.write().await;

        let mut outcome = BatchOutcome::default();
        // (prospect_id, watermark) published into `applied` on commit
        let mut pending: Vec<(u64, i64)> = Vec::with_capacity(ops.len());
        let pending_watermark = |pending: &Vec<(u64, i64)>, id: u64| -> Option<i64> {
            pending
                .iter()
                .rev()
                .find(|(pid, _)| *pid == id)
                .map(|(_, wm)| *wm)
        };

        for op in ops {
            match op {
                IndexOp::Upsert(doc) => {
                    let incoming = doc.last_updated_micros();
                    let current = match pending_watermark(&pending, doc.prospect_id) {
                        Some(wm) => Some(wm),
                        None => self.applied_watermark(doc.prospect_id)?,
                    };

                    if current.is_some_and(|wm| wm >= incoming) {
                        outcome.stale_skipped += 1;
                        continue;
                    }

                    writer.delete_term(Term::from_field_u64(id_field, doc.prospect_id));
                    writer.add_document(doc.to_tantivy_doc(&self.schema)).map_err(|e| {
                        SearchError::IndexingFailed(format!("Failed to add document: {}", e))
                    })?;

                    pending.push((doc.prospect_id, incoming));
                    outcome.upserted += 1;
                }
                IndexOp::Delete { prospect_id, as_of } => {
                    let incoming = as_of.timestamp_micros();
                    writer.delete_term(Term::from_field_u64(id_field, *prospect_id));

                    let current = match pending_watermark(&pending, *prospect_id) {
                        Some(wm) => Some(wm),
                        None => self.applied_watermark(*prospect_id)?,
                    };
                    let tombstone = current.map_or(incoming, |wm| wm.max(incoming));

                    pending.push((*prospect_id, tombstone));
                    outcome.deleted += 1;
                }
            }
        }

        if let Err(e) = writer.commit() {
            let _ = writer.rollback();
            return Err(SearchError::IndexingFailed(format!(
                "Failed to commit batch: {}",
                e
            )));
        }

        self.reader
            .reload()
            .map_err(|e| SearchError::IndexingFailed(format!("Reader reload failed: {}", e)))?;

        for (prospect_id, watermark) in pending {
            self.applied.insert(prospect_id, watermark);
        }

        Ok(outcome)
    }

    /// Replace the whole index content with the given documents in a single
    /// commit. Readers see the previous committed view until the commit
    /// lands, so a rebuild is never observed partially.
    pub async fn rebuild(&self, docs: &[ProspectDocument]) -> SearchResult<usize> {
        let mut writer = self.writer.write().await;

        writer
            .delete_all_documents()
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to clear index: {}", e)))?;

        for doc in docs {
            writer.add_document(doc.to_tantivy_doc(&self.schema)).map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to add document: {}", e))
            })?;
        }

        if let Err(e) = writer.commit() {
            let _ = writer.rollback();
            return Err(SearchError::IndexingFailed(format!(
                "Failed to commit rebuild: {}",
                e
            )));
        }

        self.reader
            .reload()
            .map_err(|e| SearchError::IndexingFailed(format!("Reader reload failed: {}", e)))?;

        self.applied.clear();
        for doc in docs {
            self.applied
                .insert(doc.prospect_id, doc.last_updated_micros());
        }

        Ok(docs.len())
    }

    /// Remove every document and forget all watermarks
    pub async fn clear(&self) -> SearchResult<()> {
        self.rebuild(&[]).await?;
        Ok(())
    }

    /// Prospect ids of every indexed document belonging to a company. Used
    /// to resolve company-level deletes when the relational rows are
    /// already gone.
    pub fn prospect_ids_for_company(&self, company_id: u64) -> SearchResult<Vec<u64>> {
        let company_field = self
            .schema
            .get_field("company_id")
            .map_err(|e| SearchError::SchemaError(e.to_string()))?;
        let id_field = self.id_field()?;

        let searcher = self.reader.searcher();
        let term = Term::from_field_u64(company_field, company_id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);

        let addresses = searcher
            .search(&query, &DocSetCollector)
            .map_err(|e| SearchError::SearchFailed(format!("Company lookup failed: {}", e)))?;

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))?;
            if let Some(id) = doc.get_first(id_field).and_then(|v| v.as_u64()) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Get index statistics
    pub fn stats(&self) -> SearchResult<IndexStats> {
        let searcher = self.reader.searcher();

        let total_documents = searcher
            .search(&tantivy::query::AllQuery, &Count)
            .map_err(|e| SearchError::SearchFailed(format!("Failed to count documents: {}", e)))?
            as u64;

        let num_segments = searcher.segment_readers().len();

        let index_size_bytes = std::fs::read_dir(&self.config.index_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        Ok(IndexStats {
            total_documents,
            index_size_bytes,
            num_segments,
        })
    }
}
