//! Friend-list crawl.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{add_candidates, CandidateBuffer, Outcome, Services, WorkerError, WorkerStrategy};
use crate::models::WorkerType;

/// Expands known users' friend lists into classification batches.
///
/// Seeds come from the repository. A seed whose friend count matches the
/// cached count is skipped without fetching the list.
pub struct FriendCrawl {
    buffer: CandidateBuffer,
    seeds: VecDeque<u64>,
    batch_size: usize,
    seed_batch_size: usize,
}

impl FriendCrawl {
    pub fn new(batch_size: usize, seed_batch_size: usize, max_retries: Option<u32>) -> Self {
        Self {
            buffer: CandidateBuffer::new(max_retries),
            seeds: VecDeque::new(),
            batch_size: batch_size.max(1),
            seed_batch_size: seed_batch_size.max(1),
        }
    }

    pub fn buffer(&self) -> &CandidateBuffer {
        &self.buffer
    }

    async fn crawl_seed(&mut self, services: &Services, seed: u64) -> Result<(), WorkerError> {
        let count = services.platform.fetch_friend_count(seed).await?;
        if !services.cache.has_changed(seed, count).await {
            debug!("Friend list of {} unchanged ({} friends)", seed, count);
            return Ok(());
        }

        let friends = services.platform.fetch_friend_ids(seed).await?;
        if let Err(e) = services.cache.set_friend_count(seed, count).await {
            warn!("Failed to cache friend count for {}: {}", seed, e);
        }
        let total = friends.len();
        let added = add_candidates(services, &mut self.buffer, friends).await?;
        debug!("Seed {}: {} friends, {} new candidates", seed, total, added);
        Ok(())
    }
}

#[async_trait]
impl WorkerStrategy for FriendCrawl {
    type Batch = Vec<u64>;

    fn kind(&self) -> WorkerType {
        WorkerType::Friend
    }

    fn uses_gate(&self) -> bool {
        true
    }

    async fn assemble(&mut self, services: &Services) -> Result<Vec<u64>, WorkerError> {
        if self.buffer.len() < self.batch_size && self.seeds.is_empty() {
            let seeds = services
                .repository
                .get_candidate_batch(self.seed_batch_size)
                .await?;
            self.seeds.extend(seeds);
        }

        while self.buffer.len() < self.batch_size {
            let Some(seed) = self.seeds.pop_front() else {
                break;
            };
            if let Err(e) = self.crawl_seed(services, seed).await {
                self.seeds.push_front(seed);
                return Err(e);
            }
        }

        Ok(self.buffer.take(self.batch_size))
    }

    async fn complete(
        &mut self,
        _services: &Services,
        _batch: &Vec<u64>,
        outcome: &Outcome,
    ) -> Result<(), WorkerError> {
        self.buffer.clear_retries(&outcome.done_ids());
        let dropped = self.buffer.requeue_failed(&outcome.retry_ids());
        if !dropped.is_empty() {
            warn!("Dropped {} candidates after repeated failures", dropped.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use crate::repository::{Repository, UserRecord};
    use crate::test_support::{FakeClassifier, FakePlatform};
    use crate::worker::testing::*;
    use crate::worker::Worker;
    use tokio_util::sync::CancellationToken;

    fn platform() -> FakePlatform {
        let mut platform = FakePlatform::default();
        platform.friends.insert(1, vec![10, 11, 12, 13, 14]);
        platform.friends.insert(2, vec![14, 15, 16]);
        platform
    }

    #[tokio::test]
    async fn test_assemble_walks_seeds_until_batch_is_full() {
        let h = harness(platform(), FakeClassifier::default());
        h.repo.add_seed_user(1).await.unwrap();
        h.repo.add_seed_user(2).await.unwrap();

        let mut crawl = FriendCrawl::new(4, 10, None);
        let batch = crawl.assemble(&h.services).await.unwrap();
        assert_eq!(batch, vec![10, 11, 12, 13]);
        // Seed 2 was not needed yet.
        assert_eq!(h.platform.friend_requests.lock().unwrap().clone(), vec![1]);
        assert_eq!(crawl.buffer().len(), 1);

        let next = crawl.assemble(&h.services).await.unwrap();
        assert_eq!(next, vec![14, 15, 16]);
    }

    #[tokio::test]
    async fn test_known_and_processed_ids_are_filtered() {
        let h = harness(platform(), FakeClassifier::default());
        h.repo.add_seed_user(1).await.unwrap();
        h.repo
            .put(&UserRecord::new(11, RecordStatus::Cleared))
            .await
            .unwrap();
        h.services.cache.mark_processed(&[12]).await.unwrap();

        let mut crawl = FriendCrawl::new(10, 10, None);
        let batch = crawl.assemble(&h.services).await.unwrap();
        assert_eq!(batch, vec![10, 13, 14]);
    }

    #[tokio::test]
    async fn test_unchanged_friend_count_skips_fetch() {
        let h = harness(platform(), FakeClassifier::default());
        h.repo.add_seed_user(1).await.unwrap();
        h.services.cache.set_friend_count(1, 5).await.unwrap();

        let mut crawl = FriendCrawl::new(10, 10, None);
        assert!(crawl.assemble(&h.services).await.unwrap().is_empty());
        assert!(h.platform.friend_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crawl_records_friend_count() {
        let h = harness(platform(), FakeClassifier::default());
        h.repo.add_seed_user(2).await.unwrap();

        let mut crawl = FriendCrawl::new(10, 10, None);
        crawl.assemble(&h.services).await.unwrap();
        assert_eq!(h.services.cache.get_friend_count(2).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_failed_ids_are_retried_first() {
        let h = harness(platform(), FakeClassifier::failing(&[11, 13]));
        h.repo.add_seed_user(1).await.unwrap();

        let crawl = FriendCrawl::new(5, 10, None);
        let mut worker = Worker::new(
            crawl,
            h.services.clone(),
            reporter(&h, WorkerType::Friend),
            fast_pacing(),
        );
        worker.run_cycle(&CancellationToken::new()).await.unwrap();

        let buffer = worker.strategy().buffer();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.retry_count(11), 1);
        assert_eq!(buffer.retry_count(13), 1);

        let processed = h.services.cache.filter_unprocessed(&[10, 11, 12, 13, 14]).await;
        assert_eq!(processed, vec![11, 13]);
        assert_eq!(h.repo.check_existing(&[10, 11]).await.unwrap().len(), 1);
    }
}
