pub mod factory;
pub mod memory_store;
pub mod redis_store;
pub mod sled_store;

pub use factory::create_kv_store;
pub use memory_store::MemoryKvStore;
pub use redis_store::RedisKvStore;
pub use sled_store::SledKvStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value store contract shared by the checkpoint store and the result
/// cache: `GET key`, `SET key value EX ttl`, `DEL key`. Get/set are atomic
/// per key; no cross-request locking is required.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
