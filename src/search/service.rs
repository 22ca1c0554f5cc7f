//! Filtered, paginated prospect search

use crate::cache::ResultCache;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::metrics;
use crate::search::error::SearchError;
use crate::search::index::IndexManager;
use crate::search::query::{FilterSpec, PageRequest, QueryBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::schema::{Schema, Value};
use tantivy::{Order, TantivyDocument};

/// A single search hit, reconstructed from stored index fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProspectHit {
    pub prospect_id: u64,
    pub company_id: u64,
    pub full_name: String,
    pub job_title: Option<String>,
    pub prospect_location: Option<String>,
    pub company_name: String,
    pub industry: Option<String>,
    pub company_location: Option<String>,
    pub min_employee_size: Option<u64>,
    pub max_employee_size: Option<u64>,
    pub last_updated: DateTime<Utc>,
}

/// Pagination metadata for the bulk listing path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// Paged results for the bulk listing path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagedResults {
    pub items: Vec<ProspectHit>,
    pub pagination: PageInfo,
}

/// Cursor results for the streaming path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorResults {
    pub items: Vec<ProspectHit>,
    pub next_cursor: Option<u64>,
}

/// Search response, shaped by the pagination mode of the request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SearchResponse {
    Paged(PagedResults),
    Cursor(CursorResults),
}

/// The query path: compiles a filter specification, consults the result
/// cache, executes against the index, and memoizes the response.
pub struct SearchService {
    index: Arc<IndexManager>,
    cache: Option<ResultCache>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(index: Arc<IndexManager>, cache: Option<ResultCache>, config: SearchConfig) -> Self {
        Self {
            index,
            cache,
            config,
        }
    }

    /// Execute a filtered search. Results are served from the cache when a
    /// fresh entry exists; staleness is bounded by sync lag plus the cache
    /// TTL, never detected or invalidated per write.
    pub async fn search(&self, filters: &FilterSpec, page: &PageRequest) -> Result<SearchResponse> {
        let cache_key = self.cache.as_ref().map(|cache| cache.key(filters, page));

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref()) {
            if let Some(cached) = cache.get::<SearchResponse>(key).await {
                return Ok(cached);
            }
        }

        let response = match page {
            PageRequest::Numbered { size, number } => {
                let timer = metrics::SEARCH_LATENCY_SECONDS
                    .with_label_values(&["paged"])
                    .start_timer();
                let response = self.search_paged(filters, *size, *number)?;
                timer.observe_duration();
                response
            }
            PageRequest::Cursor { size, cursor } => {
                let timer = metrics::SEARCH_LATENCY_SECONDS
                    .with_label_values(&["cursor"])
                    .start_timer();
                let response = self.search_cursor(filters, *size, *cursor)?;
                timer.observe_duration();
                response
            }
        };

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref()) {
            cache.set(key, &response).await;
        }

        Ok(response)
    }

    /// Offset pagination: `from = (number - 1) * size`, ordered by
    /// prospect id ascending for a deterministic page partition.
    fn search_paged(
        &self,
        filters: &FilterSpec,
        size: usize,
        number: usize,
    ) -> Result<SearchResponse> {
        let size = size.clamp(1, self.config.max_page_size);
        let offset = (number.saturating_sub(1)) * size;

        let query = QueryBuilder::new(self.index.schema().clone()).compile(filters);
        let searcher = self.index.reader().searcher();

        let collector = TopDocs::with_limit(size)
            .and_offset(offset)
            .order_by_fast_field::<u64>("prospect_id", Order::Asc);

        let top_docs = searcher
            .search(&*query, &collector)
            .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?;

        let total_items = searcher
            .search(&*query, &Count)
            .map_err(|e| SearchError::SearchFailed(format!("Count failed: {}", e)))?;

        let schema = self.index.schema();
        let mut items = Vec::with_capacity(top_docs.len());
        for (_id, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))?;
            items.push(doc_to_hit(&doc, schema));
        }

        let total_pages = if total_items == 0 {
            0
        } else {
            total_items.div_ceil(size)
        };

        Ok(SearchResponse::Paged(PagedResults {
            items,
            pagination: PageInfo {
                current_page: number,
                page_size: size,
                total_items,
                total_pages,
                has_next_page: number < total_pages,
                has_prev_page: number > 1 && total_items > 0,
            },
        }))
    }

    /// Search-after pagination on the last returned prospect id
    fn search_cursor(
        &self,
        filters: &FilterSpec,
        size: usize,
        cursor: u64,
    ) -> Result<SearchResponse> {
        let size = size.clamp(1, self.config.max_page_size);

        let query = QueryBuilder::new(self.index.schema().clone()).compile_after(filters, cursor);
        let searcher = self.index.reader().searcher();

        let collector = TopDocs::with_limit(size).order_by_fast_field::<u64>("prospect_id", Order::Asc);

        let top_docs = searcher
            .search(&*query, &collector)
            .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?;

        let schema = self.index.schema();
        let mut items = Vec::with_capacity(top_docs.len());
        for (_id, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))?;
            items.push(doc_to_hit(&doc, schema));
        }

        // A full page may have more behind it; a short page is the end
        let next_cursor = if items.len() == size {
            items.last().map(|hit| hit.prospect_id)
        } else {
            None
        };

        Ok(SearchResponse::Cursor(CursorResults { items, next_cursor }))
    }
}

/// Reconstruct a hit from the stored document fields
fn doc_to_hit(doc: &TantivyDocument, schema: &Schema) -> ProspectHit {
    let text = |name: &str| -> Option<String> {
        schema.get_field(name).ok().and_then(|field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
    };
    let number = |name: &str| -> Option<u64> {
        schema
            .get_field(name)
            .ok()
            .and_then(|field| doc.get_first(field).and_then(|v| v.as_u64()))
    };
    let date = |name: &str| -> Option<DateTime<Utc>> {
        schema.get_field(name).ok().and_then(|field| {
            doc.get_first(field)
                .and_then(|v| v.as_datetime())
                .and_then(|dt| DateTime::from_timestamp_micros(dt.into_timestamp_micros()))
        })
    };

    ProspectHit {
        prospect_id: number("prospect_id").unwrap_or_default(),
        company_id: number("company_id").unwrap_or_default(),
        full_name: text("full_name").unwrap_or_default(),
        job_title: text("job_title"),
        prospect_location: text("prospect_location"),
        company_name: text("company_name").unwrap_or_default(),
        industry: text("industry"),
        company_location: text("company_location"),
        min_employee_size: number("min_employee_size"),
        max_employee_size: number("max_employee_size"),
        last_updated: date("last_updated").unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Company, Prospect};
    use crate::search::document::ProspectDocument;
    use crate::search::index::IndexOp;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn seeded_service(dir: &TempDir, count: u64) -> SearchService {
        let config = SearchConfig {
            index_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let index = Arc::new(IndexManager::new(config.clone()).unwrap());

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ops: Vec<IndexOp> = (1..=count)
            .map(|i| {
                let company = Company::new(i, format!("Company {}", i))
                    .with_employee_band(i * 10, i * 100)
                    .with_updated_at(at);
                let prospect = Prospect::new(i, i, "Person", format!("{}", i))
                    .with_job_title("Engineer")
                    .with_updated_at(at);
                IndexOp::Upsert(ProspectDocument::from_join(&prospect, &company))
            })
            .collect();
        index.apply_batch(&ops).await.unwrap();

        SearchService::new(index, None, config)
    }

    #[tokio::test]
    async fn test_pagination_partitions_the_corpus() {
        let dir = TempDir::new().unwrap();
        let service = seeded_service(&dir, 10).await;

        let mut seen = Vec::new();
        for number in 1..=4 {
            let page = PageRequest::Numbered { size: 3, number };
            let response = service.search(&FilterSpec::default(), &page).await.unwrap();
            let SearchResponse::Paged(paged) = response else {
                panic!("expected paged response");
            };

            assert_eq!(paged.pagination.total_items, 10);
            assert_eq!(paged.pagination.total_pages, 4);
            assert_eq!(paged.pagination.has_prev_page, number > 1);
            assert_eq!(paged.pagination.has_next_page, number < 4);
            seen.extend(paged.items.iter().map(|h| h.prospect_id));
        }

        // No duplicates, no gaps, ordered by id ascending
        assert_eq!(seen, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_cursor_pagination_partitions_the_corpus() {
        let dir = TempDir::new().unwrap();
        let service = seeded_service(&dir, 7).await;

        let mut seen = Vec::new();
        let mut cursor = 0u64;
        loop {
            let page = PageRequest::Cursor { size: 3, cursor };
            let response = service.search(&FilterSpec::default(), &page).await.unwrap();
            let SearchResponse::Cursor(batch) = response else {
                panic!("expected cursor response");
            };

            seen.extend(batch.items.iter().map(|h| h.prospect_id));
            match batch.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        assert_eq!(seen, (1..=7).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_range_filters() {
        let dir = TempDir::new().unwrap();
        // Bands: min = 10..=100 step 10, max = 100..=1000 step 100
        let service = seeded_service(&dir, 10).await;

        let page = PageRequest::Numbered { size: 25, number: 1 };

        let min_only = FilterSpec {
            min_employee_size: vec![50],
            ..Default::default()
        };
        let SearchResponse::Paged(results) = service.search(&min_only, &page).await.unwrap()
        else {
            panic!("expected paged response");
        };
        assert!(results
            .items
            .iter()
            .all(|h| h.min_employee_size.unwrap() >= 50));
        assert_eq!(results.pagination.total_items, 6);

        let max_only = FilterSpec {
            max_employee_size: vec![500],
            ..Default::default()
        };
        let SearchResponse::Paged(results) = service.search(&max_only, &page).await.unwrap()
        else {
            panic!("expected paged response");
        };
        assert!(results
            .items
            .iter()
            .all(|h| h.max_employee_size.unwrap() <= 500));
        assert_eq!(results.pagination.total_items, 5);

        let both = FilterSpec {
            min_employee_size: vec![50],
            max_employee_size: vec![500],
            ..Default::default()
        };
        let SearchResponse::Paged(results) = service.search(&both, &page).await.unwrap() else {
            panic!("expected paged response");
        };
        // Intersection: min >= 50 and max <= 500
        assert_eq!(results.pagination.total_items, 1);
        assert_eq!(results.items[0].prospect_id, 5);
    }

    #[tokio::test]
    async fn test_empty_filter_matches_everything() {
        let dir = TempDir::new().unwrap();
        let service = seeded_service(&dir, 4).await;

        let page = PageRequest::Numbered { size: 10, number: 1 };
        let SearchResponse::Paged(results) = service
            .search(&FilterSpec::default(), &page)
            .await
            .unwrap()
        else {
            panic!("expected paged response");
        };

        assert_eq!(results.pagination.total_items, 4);
    }
}
