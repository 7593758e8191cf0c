//! Three-lane priority queue kept in the shared store.
//!
//! Each lane is a sorted set scored by enqueue time, so lanes are FIFO.
//! Withdrawal only reads: items stay in their lane until [`PriorityQueue::remove`]
//! is called after successful processing, which makes a crashed consumer's
//! batch visible again to the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::models::{LaneDepths, Priority, QueueInfo, QueueItem, QueueStatus};
use crate::repository::{Repository, RepositoryError};
use crate::store::{Keyspace, SharedStore, StoreError};

/// Tolerance for float weight arithmetic (10 x 0.3 must floor to 3).
const SHARE_EPSILON: f64 = 1e-9;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// One lane member read during withdrawal.
struct Candidate {
    raw: String,
    priority: Priority,
    /// Rank within its lane.
    offset: u64,
}

pub struct PriorityQueue {
    store: SharedStore,
    keys: Keyspace,
    config: QueueConfig,
    repository: Arc<dyn Repository>,
}

impl PriorityQueue {
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        config: QueueConfig,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            store,
            keys,
            config,
            repository,
        }
    }

    fn lane(&self, priority: Priority) -> String {
        self.keys.lane(priority.as_str())
    }

    fn weight(&self, priority: Priority) -> f64 {
        match priority {
            Priority::High => self.config.high_weight,
            Priority::Normal => self.config.normal_weight,
            Priority::Low => self.config.low_weight,
        }
    }

    fn info_ttl(&self) -> Duration {
        Duration::from_secs(self.config.info_ttl_secs)
    }

    /// Add an item to its lane and publish it as pending. Returns the
    /// item's position across all lanes.
    pub async fn enqueue(&self, item: &QueueItem) -> Result<u64, QueueError> {
        let member = item.to_member()?;
        self.store
            .zadd(&self.lane(item.priority), item.score(), &member)
            .await?;

        let depths = self.depths().await?;
        let position =
            depths.ahead_of(item.priority) + depths.get(item.priority).saturating_sub(1);
        self.set_status(item, QueueStatus::Pending, Some(position))
            .await?;
        debug!(
            "Enqueued user {} in {} lane at position {}",
            item.user_id,
            item.priority.as_str(),
            position
        );
        Ok(position)
    }

    /// Current depth of every lane.
    pub async fn depths(&self) -> Result<LaneDepths, QueueError> {
        let mut depths = LaneDepths::default();
        for priority in Priority::ALL {
            depths.set(priority, self.store.zcard(&self.lane(priority)).await?);
        }
        Ok(depths)
    }

    /// Read up to `target` items, split across lanes by weight.
    ///
    /// Each lane contributes `floor(target x weight)` items, capped by its
    /// depth. When a lane holds fewer items than its exact share, the unused
    /// capacity is filled from the remaining items in High, Normal, Low
    /// order. Duplicate users keep their first occurrence; malformed members
    /// and fresh `check_exists` items are removed from their lane.
    pub async fn withdraw_batch(&self, target: usize) -> Result<Vec<QueueItem>, QueueError> {
        if target == 0 {
            return Ok(Vec::new());
        }
        let depths = self.depths().await?;
        if depths.total() == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<Candidate> = Vec::with_capacity(target);
        let mut read = LaneDepths::default();
        let mut shortfall = false;

        for priority in Priority::ALL {
            let depth = depths.get(priority);
            let share = target as f64 * self.weight(priority);
            if (depth as f64) < share - SHARE_EPSILON {
                shortfall = true;
            }
            let quota = ((share + SHARE_EPSILON).floor() as u64).min(depth);
            if quota == 0 {
                continue;
            }
            let members = self
                .store
                .zrange(&self.lane(priority), 0, quota as usize)
                .await?;
            read.set(priority, members.len() as u64);
            candidates.extend(members.into_iter().enumerate().map(|(i, raw)| Candidate {
                raw,
                priority,
                offset: i as u64,
            }));
        }

        if shortfall {
            for priority in Priority::ALL {
                let remaining = target.saturating_sub(candidates.len());
                if remaining == 0 {
                    break;
                }
                let offset = read.get(priority);
                if offset >= depths.get(priority) {
                    continue;
                }
                let members = self
                    .store
                    .zrange(&self.lane(priority), offset as usize, remaining)
                    .await?;
                read.set(priority, offset + members.len() as u64);
                candidates.extend(members.into_iter().enumerate().map(|(i, raw)| Candidate {
                    raw,
                    priority,
                    offset: offset + i as u64,
                }));
            }
        }

        // Scan order is High, Normal, Low regardless of which pass read an item.
        candidates.sort_by_key(|c| (c.priority as u8, c.offset));

        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let lane = self.lane(candidate.priority);
            let item = match QueueItem::from_member(&candidate.raw) {
                Ok(item) => item,
                Err(e) => {
                    warn!(
                        "Dropping malformed member from {} lane: {}",
                        candidate.priority.as_str(),
                        e
                    );
                    self.store.zrem(&lane, &candidate.raw).await?;
                    continue;
                }
            };

            if !seen.insert(item.user_id) {
                debug!(
                    "Removing duplicate entry for user {} from {} lane",
                    item.user_id,
                    candidate.priority.as_str()
                );
                self.store.zrem(&lane, &candidate.raw).await?;
                continue;
            }

            if item.check_exists && self.should_skip(&item).await {
                debug!("Skipping recently updated user {}", item.user_id);
                self.store.zrem(&lane, &candidate.raw).await?;
                self.set_status(&item, QueueStatus::Skipped, None).await?;
                continue;
            }

            let position = depths.ahead_of(candidate.priority) + candidate.offset;
            self.set_status(&item, QueueStatus::Processing, Some(position))
                .await?;
            kept.push(item);
        }

        self.publish_waiting(&depths, &read, target, &seen).await?;

        if !kept.is_empty() {
            info!(
                "Withdrew {} items (depths high={} normal={} low={})",
                kept.len(),
                depths.high,
                depths.normal,
                depths.low
            );
        }
        Ok(kept)
    }

    /// Publish positions for the next `window` items of each lane. Users in
    /// `withdrawn` keep the status this withdrawal gave them.
    async fn publish_waiting(
        &self,
        depths: &LaneDepths,
        read: &LaneDepths,
        window: usize,
        withdrawn: &HashSet<u64>,
    ) -> Result<(), QueueError> {
        for priority in Priority::ALL {
            let offset = read.get(priority);
            if offset >= depths.get(priority) {
                continue;
            }
            let members = self
                .store
                .zrange(&self.lane(priority), offset as usize, window)
                .await?;
            for (i, raw) in members.iter().enumerate() {
                let Ok(item) = serde_json::from_str::<QueueItem>(raw) else {
                    continue;
                };
                if withdrawn.contains(&item.user_id) {
                    continue;
                }
                let position = depths.ahead_of(priority) + offset + i as u64;
                self.set_status(&item, QueueStatus::Pending, Some(position))
                    .await?;
            }
        }
        Ok(())
    }

    /// Remove an item from its lane. Withdrawn items are removed by the exact
    /// member they were read from. Removing a missing item is a no-op.
    pub async fn remove(&self, item: &QueueItem) -> Result<(), QueueError> {
        let removed = self
            .store
            .zrem(&self.lane(item.priority), &item.to_member()?)
            .await?;
        if !removed {
            debug!("User {} was already gone from its lane", item.user_id);
        }
        Ok(())
    }

    /// Whether the freshness check says this item needs no processing.
    ///
    /// Lookup errors mean "process it".
    pub async fn should_skip(&self, item: &QueueItem) -> bool {
        let existing = match self.repository.check_existing(&[item.user_id]).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Freshness check failed for {}: {}", item.user_id, e);
                return false;
            }
        };
        let Some(record) = existing.get(&item.user_id) else {
            return false;
        };
        let age = Utc::now() - record.last_updated;
        age.num_seconds() < self.config.freshness_grace_secs as i64
    }

    pub async fn is_aborted(&self, user_id: u64) -> Result<bool, QueueError> {
        Ok(self.store.exists(&self.keys.queue_abort(user_id)).await?)
    }

    /// Ask consumers to drop this user instead of processing it.
    pub async fn abort(&self, user_id: u64) -> Result<(), QueueError> {
        self.store
            .set_ex(
                &self.keys.queue_abort(user_id),
                &Utc::now().to_rfc3339(),
                self.info_ttl(),
            )
            .await?;
        Ok(())
    }

    pub async fn clear_abort(&self, user_id: u64) -> Result<(), QueueError> {
        self.store.del(&self.keys.queue_abort(user_id)).await?;
        Ok(())
    }

    pub async fn info(&self, user_id: u64) -> Result<Option<QueueInfo>, QueueError> {
        match self.store.get(&self.keys.queue_info(user_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_info(&self, user_id: u64) -> Result<(), QueueError> {
        self.store.del(&self.keys.queue_info(user_id)).await?;
        Ok(())
    }

    /// Publish the status side-channel for an item.
    pub async fn set_status(
        &self,
        item: &QueueItem,
        status: QueueStatus,
        queue_position: Option<u64>,
    ) -> Result<(), QueueError> {
        let info = QueueInfo {
            user_id: item.user_id,
            status,
            priority: item.priority,
            queue_position,
            updated_at: Utc::now(),
        };
        self.store
            .set_ex(
                &self.keys.queue_info(item.user_id),
                &serde_json::to_string(&info)?,
                self.info_ttl(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use crate::repository::{StoreRepository, UserRecord};
    use crate::store::{KvStore, MemoryStore};
    use chrono::{DateTime, TimeZone};

    struct Fixture {
        store: Arc<MemoryStore>,
        repo: Arc<StoreRepository>,
        queue: PriorityQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let keys = Keyspace::new("test");
        let repo = Arc::new(StoreRepository::new(store.clone(), keys.clone()));
        let queue = PriorityQueue::new(store.clone(), keys, QueueConfig::default(), repo.clone());
        Fixture { store, repo, queue }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn item(user_id: u64, priority: Priority, ms: i64) -> QueueItem {
        QueueItem::at(user_id, priority, at(ms))
    }

    async fn fill(queue: &PriorityQueue, priority: Priority, first_id: u64, count: u64) {
        for i in 0..count {
            queue
                .enqueue(&item(first_id + i, priority, i as i64))
                .await
                .unwrap();
        }
    }

    fn split(items: &[QueueItem]) -> (usize, usize, usize) {
        let count = |p| items.iter().filter(|i| i.priority == p).count();
        (
            count(Priority::High),
            count(Priority::Normal),
            count(Priority::Low),
        )
    }

    #[tokio::test]
    async fn test_weighted_split_of_ten() {
        let f = fixture();
        fill(&f.queue, Priority::High, 100, 20).await;
        fill(&f.queue, Priority::Normal, 200, 20).await;
        fill(&f.queue, Priority::Low, 300, 20).await;

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert_eq!(split(&batch), (6, 3, 1));
    }

    #[tokio::test]
    async fn test_weighted_split_floors_shares() {
        let f = fixture();
        fill(&f.queue, Priority::High, 100, 20).await;
        fill(&f.queue, Priority::Normal, 200, 20).await;
        fill(&f.queue, Priority::Low, 300, 20).await;

        let batch = f.queue.withdraw_batch(7).await.unwrap();
        assert_eq!(split(&batch), (4, 2, 0));
    }

    #[tokio::test]
    async fn test_short_lane_capacity_is_backfilled() {
        let f = fixture();
        fill(&f.queue, Priority::High, 100, 10).await;

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert_eq!(split(&batch), (10, 0, 0));
        let ids: Vec<u64> = batch.iter().map(|i| i.user_id).collect();
        assert_eq!(ids, (100..110).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_withdraw_leaves_items_queued() {
        let f = fixture();
        fill(&f.queue, Priority::Normal, 1, 3).await;

        let first = f.queue.withdraw_batch(2).await.unwrap();
        let again = f.queue.withdraw_batch(2).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(f.queue.depths().await.unwrap().normal, 3);

        f.queue.remove(&first[0]).await.unwrap();
        f.queue.remove(&first[0]).await.unwrap();
        assert_eq!(f.queue.depths().await.unwrap().normal, 2);
    }

    #[tokio::test]
    async fn test_duplicate_user_is_taken_from_high_lane() {
        let f = fixture();
        f.queue.enqueue(&item(5, Priority::Low, 0)).await.unwrap();
        f.queue.enqueue(&item(5, Priority::High, 1)).await.unwrap();

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].user_id, 5);
        assert_eq!(batch[0].priority, Priority::High);

        let depths = f.queue.depths().await.unwrap();
        assert_eq!((depths.high, depths.low), (1, 0));
    }

    #[tokio::test]
    async fn test_duplicate_within_lane_keeps_oldest() {
        let f = fixture();
        f.queue.enqueue(&item(9, Priority::High, 0)).await.unwrap();
        f.queue.enqueue(&item(9, Priority::High, 5)).await.unwrap();

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert_eq!(batch, vec![item(9, Priority::High, 0)]);
        assert_eq!(f.queue.depths().await.unwrap().high, 1);
    }

    #[tokio::test]
    async fn test_malformed_member_is_dropped() {
        let f = fixture();
        let lane = Keyspace::new("test").lane("high");
        f.store.zadd(&lane, 0.0, "not json").await.unwrap();
        f.queue.enqueue(&item(1, Priority::High, 10)).await.unwrap();

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].user_id, 1);
        assert_eq!(f.store.zcard(&lane).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recently_updated_user_is_skipped() {
        let f = fixture();
        f.repo
            .put(&UserRecord::new(1, RecordStatus::Cleared))
            .await
            .unwrap();
        let mut stale = UserRecord::new(2, RecordStatus::Cleared);
        stale.last_updated = Utc::now() - chrono::Duration::hours(1);
        f.repo.put(&stale).await.unwrap();

        for (id, ms) in [(1, 0), (2, 1), (3, 2)] {
            f.queue
                .enqueue(&item(id, Priority::High, ms).with_check_exists(true))
                .await
                .unwrap();
        }

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        let ids: Vec<u64> = batch.iter().map(|i| i.user_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(f.queue.depths().await.unwrap().high, 2);

        let info = f.queue.info(1).await.unwrap().unwrap();
        assert_eq!(info.status, QueueStatus::Skipped);
    }

    #[tokio::test]
    async fn test_fresh_record_without_check_flag_is_processed() {
        let f = fixture();
        f.repo
            .put(&UserRecord::new(1, RecordStatus::Cleared))
            .await
            .unwrap();
        f.queue.enqueue(&item(1, Priority::Normal, 0)).await.unwrap();

        let batch = f.queue.withdraw_batch(5).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_positions_are_published() {
        let f = fixture();
        f.queue.enqueue(&item(1, Priority::High, 0)).await.unwrap();
        f.queue.enqueue(&item(2, Priority::Normal, 0)).await.unwrap();
        f.queue.enqueue(&item(3, Priority::Normal, 1)).await.unwrap();
        f.queue.enqueue(&item(4, Priority::Normal, 2)).await.unwrap();

        let info = f.queue.info(4).await.unwrap().unwrap();
        assert_eq!(info.status, QueueStatus::Pending);
        assert_eq!(info.queue_position, Some(3));

        // Shares for 2: high 1.2, normal 0.6, low 0.2. High takes 1 and the
        // short lanes let the backfill take user 2.
        let batch = f.queue.withdraw_batch(2).await.unwrap();
        let ids: Vec<u64> = batch.iter().map(|i| i.user_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let processing = f.queue.info(2).await.unwrap().unwrap();
        assert_eq!(processing.status, QueueStatus::Processing);
        assert_eq!(processing.queue_position, Some(1));

        let waiting = f.queue.info(3).await.unwrap().unwrap();
        assert_eq!(waiting.status, QueueStatus::Pending);
        assert_eq!(waiting.queue_position, Some(2));
    }

    #[tokio::test]
    async fn test_abort_flag() {
        let f = fixture();
        assert!(!f.queue.is_aborted(4).await.unwrap());
        f.queue.abort(4).await.unwrap();
        assert!(f.queue.is_aborted(4).await.unwrap());
        f.queue.clear_abort(4).await.unwrap();
        assert!(!f.queue.is_aborted(4).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let f = fixture();
        assert!(f.queue.withdraw_batch(10).await.unwrap().is_empty());
        assert!(f.queue.withdraw_batch(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_after_enqueue_with_now_timestamp() {
        let f = fixture();
        let queued = QueueItem::new(11, Priority::Low);
        f.queue.enqueue(&queued).await.unwrap();

        let batch = f.queue.withdraw_batch(1).await.unwrap();
        assert_eq!(batch, vec![queued.clone()]);
        f.queue.remove(&batch[0]).await.unwrap();
        assert_eq!(f.queue.depths().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_remove_uses_member_as_submitted() {
        let f = fixture();
        let lane = Keyspace::new("test").lane("high");
        let raw = r#"{"user_id":5,"priority":"high","enqueued_at":"2024-01-01T00:00:00Z"}"#;
        f.store.zadd(&lane, 0.0, raw).await.unwrap();

        let batch = f.queue.withdraw_batch(5).await.unwrap();
        assert_eq!(batch.len(), 1);
        f.queue.remove(&batch[0]).await.unwrap();
        assert_eq!(f.store.zcard(&lane).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_waiting_copy_does_not_mask_processing_status() {
        let f = fixture();
        f.queue.enqueue(&item(5, Priority::High, 0)).await.unwrap();
        for i in 0..20u64 {
            let user_id = if i == 15 { 5 } else { 100 + i };
            f.queue
                .enqueue(&item(user_id, Priority::Low, i as i64))
                .await
                .unwrap();
        }

        let batch = f.queue.withdraw_batch(10).await.unwrap();
        assert!(batch
            .iter()
            .any(|i| i.user_id == 5 && i.priority == Priority::High));

        let info = f.queue.info(5).await.unwrap().unwrap();
        assert_eq!(info.status, QueueStatus::Processing);
        assert_eq!(info.priority, Priority::High);
        assert_eq!(info.queue_position, Some(0));
    }
}
