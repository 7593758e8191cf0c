//! Shared key-value store used by every worker.
//!
//! All coordination between workers happens through this store: queue lanes,
//! both caches, queue status projections and heartbeats. Two backends exist:
//! - In-memory (single process, tests)
//! - Redis (distributed, multi-process)

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
#[cfg(feature = "redis-backend")]
pub use redis::RedisStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; 0 means the scan is complete.
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Trait for key-value storage backends.
///
/// Implementations must be thread-safe and handle concurrent access. Keys
/// passed in are already fully namespaced (see [`Keyspace`]).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value, `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value without expiry (`SET key value`).
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a value with an expiry (`SET key value EX ttl`).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key. Returns true if something was removed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Scan keys starting with `prefix`. Start with cursor 0 and continue
    /// until the returned cursor is 0 again.
    async fn scan_prefix(&self, prefix: &str, cursor: u64, count: usize)
        -> StoreResult<ScanPage>;

    /// Add a member to a sorted set (`ZADD`).
    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    /// Read members by rank, lowest score first. `count` members starting at
    /// `offset`.
    async fn zrange(&self, key: &str, offset: usize, count: usize) -> StoreResult<Vec<String>>;

    /// Remove a member from a sorted set. Returns true if it was present.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Number of members in a sorted set.
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Free expired keys. Backends that expire keys on their own do nothing.
    async fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Boxed store trait object, shared between components.
pub type SharedStore = std::sync::Arc<dyn KvStore>;

/// Collect every key under `prefix` by walking the scan cursor to the end.
pub async fn scan_all(store: &dyn KvStore, prefix: &str) -> StoreResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0u64;
    loop {
        let page = store.scan_prefix(prefix, cursor, 100).await?;
        keys.extend(page.keys);
        if page.cursor == 0 {
            break;
        }
        cursor = page.cursor;
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// Builds namespaced key names for every record the system keeps.
#[derive(Debug, Clone)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace.trim_end_matches(':');
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, rest: &str) -> String {
        format!("{}:{}", self.namespace, rest)
    }

    pub fn lane(&self, lane: &str) -> String {
        self.key(&format!("queue:lane:{}", lane))
    }

    pub fn queue_info(&self, user_id: u64) -> String {
        self.key(&format!("queue:info:{}", user_id))
    }

    pub fn queue_abort(&self, user_id: u64) -> String {
        self.key(&format!("queue:abort:{}", user_id))
    }

    pub fn processed(&self, user_id: u64) -> String {
        self.key(&format!("cache:processed:{}", user_id))
    }

    pub fn friend_count(&self, user_id: u64) -> String {
        self.key(&format!("cache:friend_count:{}", user_id))
    }

    pub fn friend_count_prefix(&self) -> String {
        self.key("cache:friend_count:")
    }

    pub fn worker_status(&self, worker_type: &str, worker_id: &str) -> String {
        self.key(&format!("worker:status:{}:{}", worker_type, worker_id))
    }

    pub fn worker_status_prefix(&self) -> String {
        self.key("worker:status:")
    }

    pub fn user_record(&self, user_id: u64) -> String {
        self.key(&format!("record:user:{}", user_id))
    }

    pub fn user_record_prefix(&self) -> String {
        self.key("record:user:")
    }

    pub fn candidate_group(&self, group_id: u64) -> String {
        self.key(&format!("record:group:{}", group_id))
    }

    pub fn candidate_group_prefix(&self) -> String {
        self.key("record:group:")
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new("graphwarden")
    }
}

/// Parse the trailing numeric id out of a key such as `ns:cache:processed:42`.
pub fn trailing_id(key: &str) -> Option<u64> {
    key.rsplit(':').next().and_then(|s| s.parse().ok())
}
