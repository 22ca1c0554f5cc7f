use crate::error::{AppError, Result};
use crate::state::KvStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Sled-backed key-value store for single-node deployments. Sled has no
/// native TTL, so each value is stored in an envelope carrying its expiry
/// and checked on read.
#[derive(Clone)]
pub struct SledKvStore {
    db: sled::Db,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl SledKvStore {
    pub fn new(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open sled database: {}", e)))?;

        tracing::info!(path = ?path, "Initialized sled key-value store");

        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let raw = self
            .db
            .get(key)
            .map_err(|e| AppError::Internal(format!("Sled read failed: {}", e)))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| AppError::Serialization(format!("Corrupt sled entry: {}", e)))?;

        if let Some(expires_at) = envelope.expires_at {
            if Utc::now() >= expires_at {
                self.db
                    .remove(key)
                    .map_err(|e| AppError::Internal(format!("Sled remove failed: {}", e)))?;
                return Ok(None);
            }
        }

        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let envelope = Envelope {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| {
                Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
            }),
        };

        let bytes = serde_json::to_vec(&envelope)?;
        self.db
            .insert(key, bytes)
            .map_err(|e| AppError::Internal(format!("Sled write failed: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| AppError::Internal(format!("Sled remove failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SledKvStore::new(dir.path()).unwrap();

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = SledKvStore::new(dir.path()).unwrap();

        store
            .set("k", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
