//! In-memory store backend for single-process operation.
//!
//! Fast, lock-based backend that mimics the subset of Redis semantics the
//! workers rely on, including key expiry. State is not persisted across
//! restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvStore, ScanPage, StoreResult};

/// Internal state for a plain key.
#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, ValueEntry>,
    /// Sorted sets, kept ordered by (score, member).
    sorted_sets: HashMap<String, Vec<(f64, String)>>,
}

/// In-memory store backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner.values.get(key).is_some_and(|e| e.is_live(now))
            || inner.sorted_sets.get(key).is_some_and(|z| !z.is_empty()))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let removed_value = inner
            .values
            .remove(key)
            .is_some_and(|e| e.is_live(now));
        let removed_set = inner.sorted_sets.remove(key).is_some();
        Ok(removed_value || removed_set)
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        let mut matching: Vec<&String> = inner
            .values
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k)
            .chain(
                inner
                    .sorted_sets
                    .iter()
                    .filter(|(k, z)| k.starts_with(prefix) && !z.is_empty())
                    .map(|(k, _)| k),
            )
            .collect();
        matching.sort();

        let start = (cursor as usize).min(matching.len());
        let end = start.saturating_add(count.max(1)).min(matching.len());
        let keys = matching[start..end].iter().map(|k| k.to_string()).collect();
        let next = if end >= matching.len() { 0 } else { end as u64 };

        Ok(ScanPage { cursor: next, keys })
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let set = inner.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        let pos = set
            .iter()
            .position(|(s, m)| (*s, m.as_str()) > (score, member))
            .unwrap_or(set.len());
        set.insert(pos, (score, member.to_string()));
        Ok(())
    }

    async fn zrange(&self, key: &str, offset: usize, count: usize) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .skip(offset)
                    .take(count)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.sorted_sets.get_mut(key) else {
            return Ok(false);
        };
        let before = set.len();
        set.retain(|(_, m)| m != member);
        let removed = set.len() != before;
        if set.is_empty() {
            inner.sorted_sets.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .sorted_sets
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    /// Reads already ignore expired keys; this only frees memory.
    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.values.len();
        inner.values.retain(|_, e| e.is_live(now));
        Ok(before - inner.values.len())
    }
}
