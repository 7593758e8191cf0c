//! Dedup and change-detection caches.
//!
//! Both caches are advisory: they cut down repeated work within their TTL
//! window, but a hit is never proof that no further action is needed. Store
//! errors therefore resolve toward doing the work again rather than skipping
//! it.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::store::{scan_all, Keyspace, SharedStore, StoreError};

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to mark {failed} of {total} ids as processed")]
    Partial { failed: usize, total: usize },
}

/// TTL caches shared by all workers.
#[derive(Clone)]
pub struct Cache {
    store: SharedStore,
    keys: Keyspace,
    processed_ttl: Duration,
    friend_count_ttl: Duration,
}

impl Cache {
    pub fn new(store: SharedStore, keys: Keyspace, config: &CacheConfig) -> Self {
        Self::with_ttls(
            store,
            keys,
            Duration::from_secs(config.processed_ttl_secs),
            Duration::from_secs(config.friend_count_ttl_secs),
        )
    }

    pub fn with_ttls(
        store: SharedStore,
        keys: Keyspace,
        processed_ttl: Duration,
        friend_count_ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            processed_ttl,
            friend_count_ttl,
        }
    }

    /// Return the ids that have not been processed within the dedup window.
    ///
    /// An id whose lookup fails is kept: reprocessing is cheaper than
    /// silently losing work.
    pub async fn filter_unprocessed(&self, ids: &[u64]) -> Vec<u64> {
        let mut unprocessed = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.store.exists(&self.keys.processed(id)).await {
                Ok(true) => {}
                Ok(false) => unprocessed.push(id),
                Err(e) => {
                    warn!("Dedup lookup failed for {}, keeping it: {}", id, e);
                    unprocessed.push(id);
                }
            }
        }
        debug!(
            "Dedup filter kept {} of {} ids",
            unprocessed.len(),
            ids.len()
        );
        unprocessed
    }

    /// Mark ids as processed now. Every id is attempted; failures are
    /// reported together afterwards.
    pub async fn mark_processed(&self, ids: &[u64]) -> Result<(), CacheError> {
        let now = Utc::now().to_rfc3339();
        let mut failed = 0usize;
        for &id in ids {
            if let Err(e) = self
                .store
                .set_ex(&self.keys.processed(id), &now, self.processed_ttl)
                .await
            {
                warn!("Failed to mark {} as processed: {}", id, e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(CacheError::Partial {
                failed,
                total: ids.len(),
            });
        }
        Ok(())
    }

    /// Last observed friend count. Unparseable entries read as absent.
    pub async fn get_friend_count(&self, user_id: u64) -> Result<Option<u64>, CacheError> {
        let key = self.keys.friend_count(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match raw.parse::<u64>() {
            Ok(count) => Ok(Some(count)),
            Err(_) => {
                warn!("Ignoring invalid friend count {:?} at {}", raw, key);
                Ok(None)
            }
        }
    }

    pub async fn set_friend_count(&self, user_id: u64, count: u64) -> Result<(), CacheError> {
        self.store
            .set_ex(
                &self.keys.friend_count(user_id),
                &count.to_string(),
                self.friend_count_ttl,
            )
            .await?;
        Ok(())
    }

    /// Whether a user's friend list must be crawled again: true unless a
    /// cached count exists and equals `current`.
    pub async fn has_changed(&self, user_id: u64, current: u64) -> bool {
        match self.get_friend_count(user_id).await {
            Ok(Some(cached)) => cached != current,
            Ok(None) => true,
            Err(e) => {
                warn!("Friend count lookup failed for {}: {}", user_id, e);
                true
            }
        }
    }

    /// Delete friend-count entries whose value is not an integer.
    pub async fn sweep_invalid(&self) -> Result<usize, CacheError> {
        let keys = scan_all(self.store.as_ref(), &self.keys.friend_count_prefix()).await?;
        let mut removed = 0usize;
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            if raw.parse::<u64>().is_err() && self.store.del(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Swept {} invalid friend count entries", removed);
        }
        Ok(removed)
    }

    /// Free expired dedup and heartbeat entries on backends without native
    /// expiry.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.store.purge_expired().await?)
    }
}
