use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{KvStore, MemoryKvStore, RedisKvStore, SledKvStore};
use std::sync::Arc;

/// Create a key-value store based on configuration
pub async fn create_kv_store(config: &StateConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StateBackend::Memory => {
            tracing::info!("Initializing in-memory key-value backend");
            Ok(Arc::new(MemoryKvStore::new()))
        }

        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing sled key-value backend");

            let store = SledKvStore::new(path)?;
            Ok(Arc::new(store))
        }

        StateBackend::Redis => {
            let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                AppError::Configuration(
                    "Redis backend requires 'redis_url' configuration".to_string(),
                )
            })?;

            tracing::info!(url = %redis_url, "Initializing Redis key-value backend");

            let store = RedisKvStore::new(redis_url).await?;
            Ok(Arc::new(store))
        }
    }
}
