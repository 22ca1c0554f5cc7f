//! Per-field value suggestions for typeahead.
//!
//! One index query combines fuzzy-prefix, fuzzy, and substring matches on
//! the requested field; candidates are oversampled, deduplicated
//! case-insensitively, ranked (exact match first, then prefix, then
//! lexicographic), and truncated. Results are cached in-process with a
//! longer TTL than the result cache, keyed by field + lowercased query +
//! limit.

use crate::config::SearchConfig;
use crate::error::Result;
use crate::metrics;
use crate::search::error::SearchError;
use crate::search::index::IndexManager;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, RegexQuery};
use tantivy::schema::Value;
use tantivy::{TantivyDocument, Term};

/// Fields that can be suggested against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum SuggestField {
    #[strum(serialize = "company")]
    Company,
    #[strum(serialize = "location")]
    Location,
    #[strum(serialize = "jobTitle")]
    JobTitle,
    #[strum(serialize = "industry")]
    Industry,
}

impl SuggestField {
    /// Index fields whose stored values feed this suggestion field
    fn index_fields(&self) -> &'static [&'static str] {
        match self {
            SuggestField::Company => &["company_name"],
            SuggestField::Location => &["prospect_location", "company_location"],
            SuggestField::JobTitle => &["job_title"],
            SuggestField::Industry => &["industry"],
        }
    }
}

/// Serves prefix/fuzzy/substring value suggestions for a single field
pub struct SuggestionEngine {
    index: Arc<IndexManager>,
    cache: Cache<(SuggestField, String, usize), Vec<String>>,
    config: SearchConfig,
}

impl SuggestionEngine {
    pub fn new(index: Arc<IndexManager>, ttl: Duration, config: SearchConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();

        Self {
            index,
            cache,
            config,
        }
    }

    /// Suggest up to `limit` distinct field values for a partial query
    pub async fn suggest(
        &self,
        field: SuggestField,
        partial: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let normalized = partial.trim().to_lowercase();
        let cache_key = (field, normalized.clone(), limit);

        if let Some(cached) = self.cache.get(&cache_key).await {
            metrics::CACHE_OPS_TOTAL
                .with_label_values(&["suggest", "hit"])
                .inc();
            return Ok(cached);
        }
        metrics::CACHE_OPS_TOTAL
            .with_label_values(&["suggest", "miss"])
            .inc();

        let timer = metrics::SEARCH_LATENCY_SECONDS
            .with_label_values(&["suggest"])
            .start_timer();
        let suggestions = self.query_suggestions(field, &normalized, limit)?;
        timer.observe_duration();

        self.cache.insert(cache_key, suggestions.clone()).await;
        Ok(suggestions)
    }

    fn query_suggestions(
        &self,
        field: SuggestField,
        normalized: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let schema = self.index.schema();
        let searcher = self.index.reader().searcher();

        // Prefix, fuzzy, and substring clauses over every backing field;
        // any one of them may produce a candidate.
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let distance = fuzzy_distance(normalized);
        let substring_pattern = format!(".*{}.*", regex::escape(normalized));

        for field_name in field.index_fields() {
            let Ok(index_field) = schema.get_field(field_name) else {
                continue;
            };

            let term = Term::from_field_text(index_field, normalized);
            clauses.push((
                Occur::Should,
                Box::new(FuzzyTermQuery::new_prefix(term.clone(), distance, true)),
            ));
            clauses.push((
                Occur::Should,
                Box::new(FuzzyTermQuery::new(term, distance, true)),
            ));

            let substring = RegexQuery::from_pattern(&substring_pattern, index_field)
                .map_err(|e| SearchError::SearchFailed(format!("Bad suggestion pattern: {}", e)))?;
            clauses.push((Occur::Should, Box::new(substring)));
        }

        let query = BooleanQuery::new(clauses);
        let collector = TopDocs::with_limit(self.config.suggest_oversample);

        let top_docs = searcher
            .search(&query, &collector)
            .map_err(|e| SearchError::SearchFailed(format!("Suggestion query failed: {}", e)))?;

        // Collect candidate values, deduplicated case-insensitively with
        // the first-seen casing preserved
        let mut values: Vec<String> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))?;

            for field_name in field.index_fields() {
                let Ok(index_field) = schema.get_field(field_name) else {
                    continue;
                };
                let Some(value) = doc.get_first(index_field).and_then(|v| v.as_str()) else {
                    continue;
                };
                let lowered = value.to_lowercase();
                let accepted = lowered.contains(normalized)
                    || lowered
                        .split_whitespace()
                        .any(|token| levenshtein(token, normalized) <= distance as usize);
                if accepted && seen.insert(lowered) {
                    values.push(value.to_string());
                }
            }
        }

        // Exact match first, then prefix matches, then everything else;
        // lexicographic within each class
        values.sort_by_key(|value| {
            let lowered = value.to_lowercase();
            let class = if lowered == normalized {
                0u8
            } else if lowered.starts_with(normalized) {
                1
            } else {
                2
            };
            (class, lowered)
        });

        values.truncate(limit);
        Ok(values)
    }
}

/// Edit distance scaled to query length
fn fuzzy_distance(query: &str) -> u8 {
    match query.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Plain Levenshtein distance, used to keep fuzzy-only candidates that the
/// substring check would drop
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Company, Prospect};
    use crate::search::document::ProspectDocument;
    use crate::search::index::IndexOp;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn engine_with_companies(dir: &TempDir, names: &[&str]) -> SuggestionEngine {
        let config = SearchConfig {
            index_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let index = Arc::new(IndexManager::new(config.clone()).unwrap());

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ops: Vec<IndexOp> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = (i + 1) as u64;
                let company = Company::new(id, *name).with_updated_at(at);
                let prospect = Prospect::new(id, id, "Pat", "Smith").with_updated_at(at);
                IndexOp::Upsert(ProspectDocument::from_join(&prospect, &company))
            })
            .collect();
        index.apply_batch(&ops).await.unwrap();

        SuggestionEngine::new(index, Duration::from_secs(300), config)
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("tech", "tech"), 0);
        assert_eq!(levenshtein("teck", "tech"), 1);
        assert_eq!(levenshtein("", "tech"), 4);
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!(
            SuggestField::from_str("jobTitle").unwrap(),
            SuggestField::JobTitle
        );
        assert_eq!(
            SuggestField::from_str("company").unwrap(),
            SuggestField::Company
        );
        assert!(SuggestField::from_str("email").is_err());
    }

    #[tokio::test]
    async fn test_ranking_exact_then_prefix_then_substring() {
        let dir = TempDir::new().unwrap();
        let engine =
            engine_with_companies(&dir, &["Biotech", "Technology", "Tech", "Finance"]).await;

        let suggestions = engine
            .suggest(SuggestField::Company, "tech", 10)
            .await
            .unwrap();

        assert_eq!(suggestions, vec!["Tech", "Technology", "Biotech"]);
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let dir = TempDir::new().unwrap();
        let engine =
            engine_with_companies(&dir, &["Tech One", "Tech Two", "Tech Three", "Tech Four"])
                .await;

        let suggestions = engine
            .suggest(SuggestField::Company, "tech", 2)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 2);
    }

    #[tokio::test]
    async fn test_dedupes_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_companies(&dir, &["Acme", "ACME", "acme"]).await;

        let suggestions = engine
            .suggest(SuggestField::Company, "acme", 10)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 1);
    }
}
