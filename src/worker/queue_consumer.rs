//! Priority queue consumer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Outcome, Services, WorkerError, WorkerStrategy};
use crate::models::{QueueItem, QueueStatus, WorkerType};
use crate::queue::PriorityQueue;

/// Processes explicitly requested users from the priority queue.
///
/// Items stay in their lane until they succeed, so a failed item is simply
/// picked up again by a later withdrawal.
pub struct QueueConsumer {
    queue: Arc<PriorityQueue>,
    batch_size: usize,
}

impl QueueConsumer {
    pub fn new(queue: Arc<PriorityQueue>, batch_size: usize) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
        }
    }

    async fn drop_aborted(&self, item: &QueueItem) -> Result<(), WorkerError> {
        info!("Dropping aborted request for user {}", item.user_id);
        self.queue.remove(item).await?;
        self.queue.clear_info(item.user_id).await?;
        self.queue.clear_abort(item.user_id).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerStrategy for QueueConsumer {
    type Batch = Vec<QueueItem>;

    fn kind(&self) -> WorkerType {
        WorkerType::Queue
    }

    async fn assemble(&mut self, _services: &Services) -> Result<Vec<QueueItem>, WorkerError> {
        let withdrawn = self.queue.withdraw_batch(self.batch_size).await?;
        let mut batch = Vec::with_capacity(withdrawn.len());
        for item in withdrawn {
            if self.queue.is_aborted(item.user_id).await? {
                self.drop_aborted(&item).await?;
            } else {
                batch.push(item);
            }
        }
        Ok(batch)
    }

    async fn complete(
        &mut self,
        _services: &Services,
        batch: &Vec<QueueItem>,
        outcome: &Outcome,
    ) -> Result<(), WorkerError> {
        let retry: HashSet<u64> = outcome.retry_ids().into_iter().collect();
        for item in batch {
            if retry.contains(&item.user_id) {
                self.queue
                    .set_status(item, QueueStatus::Pending, None)
                    .await?;
                continue;
            }
            self.queue.remove(item).await?;
            if let Err(e) = self
                .queue
                .set_status(item, QueueStatus::Complete, None)
                .await
            {
                warn!("Failed to publish completion for {}: {}", item.user_id, e);
            }
        }
        Ok(())
    }
}
