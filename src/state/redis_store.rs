use crate::error::{AppError, Result};
use crate::state::KvStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single Redis call; a timeout is surfaced as a normal
/// unavailability failure, never a hang
const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed key-value store
#[derive(Clone)]
pub struct RedisKvStore {
    #[allow(dead_code)]
    client: Arc<Client>,
    connection: ConnectionManager,
}

impl RedisKvStore {
    /// Create a new Redis store
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Unavailable(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        // Test connection
        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| AppError::Unavailable(format!("Redis connection test failed: {}", e)))?;

        tracing::info!("Initialized Redis key-value store");

        Ok(Self {
            client: Arc::new(client),
            connection,
        })
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(result) => result
                .map_err(|e| AppError::Unavailable(format!("Redis {} failed: {}", operation, e))),
            Err(_) => Err(AppError::Timeout(format!(
                "Redis {} timed out after {:?}",
                operation, OP_TIMEOUT
            ))),
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        self.bounded("GET", conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.bounded("SETEX", conn.set_ex(key, value, secs)).await
            }
            None => self.bounded("SET", conn.set(key, value)).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        self.bounded("DEL", conn.del(key)).await
    }
}
