//! Per-source sync checkpoints over the key-value store.
//!
//! A checkpoint records the last durably processed position for one sync
//! source. It only ever advances, and only after the corresponding batch
//! has been committed to the index; it is deleted only by an explicit
//! re-sync.

use crate::metrics;
use crate::state::KvStore;
use crate::sync::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The persisted checkpoint record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub source_id: String,
    pub position: u64,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    fn initial(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            position: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Loads, advances, and resets checkpoints; one KV key per source
#[derive(Clone)]
pub struct CheckpointStore {
    kv: Arc<dyn KvStore>,
    key_prefix: String,
}

impl CheckpointStore {
    pub fn new(kv: Arc<dyn KvStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            kv,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, source_id: &str) -> String {
        format!("{}:checkpoint:{}", self.key_prefix, source_id)
    }

    /// Load the checkpoint for a source; a source never synced before
    /// starts at position 0.
    pub async fn load(&self, source_id: &str) -> SyncResult<SyncCheckpoint> {
        let raw = self
            .kv
            .get(&self.key(source_id))
            .await
            .map_err(|e| SyncError::Checkpoint(format!("Failed to load checkpoint: {}", e)))?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| SyncError::Checkpoint(format!("Corrupt checkpoint: {}", e))),
            None => Ok(SyncCheckpoint::initial(source_id)),
        }
    }

    /// Advance the checkpoint. A position at or behind the current one is
    /// ignored: checkpoints never move backward.
    pub async fn advance(&self, source_id: &str, position: u64) -> SyncResult<SyncCheckpoint> {
        let current = self.load(source_id).await?;
        if position <= current.position && current.position != 0 {
            tracing::warn!(
                source_id = source_id,
                current = current.position,
                requested = position,
                "Ignoring non-advancing checkpoint position"
            );
            return Ok(current);
        }

        let next = SyncCheckpoint {
            source_id: source_id.to_string(),
            position,
            updated_at: Utc::now(),
        };

        let raw = serde_json::to_string(&next)
            .map_err(|e| SyncError::Checkpoint(format!("Failed to encode checkpoint: {}", e)))?;

        self.kv
            .set(&self.key(source_id), &raw, None)
            .await
            .map_err(|e| SyncError::Checkpoint(format!("Failed to store checkpoint: {}", e)))?;

        metrics::SYNC_CHECKPOINT_POSITION
            .with_label_values(&[source_id])
            .set(position as f64);

        Ok(next)
    }

    /// Drop the checkpoint for a source (explicit re-sync only)
    pub async fn reset(&self, source_id: &str) -> SyncResult<()> {
        tracing::info!(source_id = source_id, "Resetting sync checkpoint");
        self.kv
            .delete(&self.key(source_id))
            .await
            .map_err(|e| SyncError::Checkpoint(format!("Failed to reset checkpoint: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryKvStore;

    fn store() -> CheckpointStore {
        CheckpointStore::new(Arc::new(MemoryKvStore::new()), "test")
    }

    #[tokio::test]
    async fn test_first_load_starts_at_zero() {
        let checkpoints = store();
        let cp = checkpoints.load("listener").await.unwrap();
        assert_eq!(cp.position, 0);
    }

    #[tokio::test]
    async fn test_advance_persists() {
        let checkpoints = store();

        checkpoints.advance("listener", 42).await.unwrap();
        let cp = checkpoints.load("listener").await.unwrap();
        assert_eq!(cp.position, 42);
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backward() {
        let checkpoints = store();

        checkpoints.advance("listener", 42).await.unwrap();
        let after = checkpoints.advance("listener", 7).await.unwrap();
        assert_eq!(after.position, 42);

        let cp = checkpoints.load("listener").await.unwrap();
        assert_eq!(cp.position, 42);
    }

    #[tokio::test]
    async fn test_reset_returns_to_zero() {
        let checkpoints = store();

        checkpoints.advance("listener", 42).await.unwrap();
        checkpoints.reset("listener").await.unwrap();

        let cp = checkpoints.load("listener").await.unwrap();
        assert_eq!(cp.position, 0);
    }
}
