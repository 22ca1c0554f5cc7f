//! Result cache over the key-value store.
//!
//! Keys are deterministic digests of the canonicalized filter specification
//! plus pagination parameters, so set-equal filters always hit the same
//! entry. Entries live for a fixed TTL and are never invalidated by the
//! sync pipeline: callers get results that were correct at some point
//! within the last `sync lag + TTL` window, not necessarily current ones.
//! Cache store failures are downgraded to misses so the request can fall
//! through to a direct index query.

use crate::metrics;
use crate::search::{FilterSpec, PageRequest};
use crate::state::KvStore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// TTL-bounded memoization of query results
#[derive(Clone)]
pub struct ResultCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    key_prefix: String,
}

impl ResultCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            kv,
            ttl,
            key_prefix: key_prefix.into(),
        }
    }

    /// Deterministic cache key for a filter + page combination
    pub fn key(&self, filters: &FilterSpec, page: &PageRequest) -> String {
        let canonical = format!(
            "{}|{}",
            filters.canonical_string(),
            page.canonical_fragment()
        );
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{}:search:{}", self.key_prefix, hex::encode(digest))
    }

    /// Read a cached value. Store errors read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    metrics::CACHE_OPS_TOTAL
                        .with_label_values(&["result", "hit"])
                        .inc();
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    metrics::CACHE_OPS_TOTAL
                        .with_label_values(&["result", "error"])
                        .inc();
                    None
                }
            },
            Ok(None) => {
                metrics::CACHE_OPS_TOTAL
                    .with_label_values(&["result", "miss"])
                    .inc();
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, falling through to index");
                metrics::CACHE_OPS_TOTAL
                    .with_label_values(&["result", "error"])
                    .inc();
                None
            }
        }
    }

    /// Store a value for the configured TTL. Store errors are logged and
    /// swallowed; they never fail the request.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.kv.set(key, &raw, Some(self.ttl)).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
            metrics::CACHE_OPS_TOTAL
                .with_label_values(&["result", "error"])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryKvStore;

    fn cache() -> ResultCache {
        ResultCache::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(30),
            "test",
        )
    }

    fn page() -> PageRequest {
        PageRequest::Numbered { size: 25, number: 1 }
    }

    #[test]
    fn test_key_deterministic_for_set_equal_filters() {
        let cache = cache();

        let a = FilterSpec {
            company: vec!["Globex".to_string(), "Acme".to_string()],
            location: vec!["Berlin".to_string()],
            ..Default::default()
        };
        let b = FilterSpec {
            location: vec!["berlin".to_string()],
            company: vec!["acme".to_string(), "globex".to_string()],
            ..Default::default()
        };

        assert_eq!(cache.key(&a, &page()), cache.key(&b, &page()));
    }

    #[test]
    fn test_key_varies_with_pagination() {
        let cache = cache();
        let spec = FilterSpec::default();

        let p1 = cache.key(&spec, &PageRequest::Numbered { size: 25, number: 1 });
        let p2 = cache.key(&spec, &PageRequest::Numbered { size: 25, number: 2 });
        let c1 = cache.key(&spec, &PageRequest::Cursor { size: 25, cursor: 1 });

        assert_ne!(p1, p2);
        assert_ne!(p1, c1);
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let cache = cache();
        let key = cache.key(&FilterSpec::default(), &page());

        assert_eq!(cache.get::<Vec<u64>>(&key).await, None);

        cache.set(&key, &vec![1u64, 2, 3]).await;
        assert_eq!(cache.get::<Vec<u64>>(&key).await, Some(vec![1, 2, 3]));
    }
}
