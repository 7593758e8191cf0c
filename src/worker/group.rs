//! Group roster crawl.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{add_candidates, CandidateBuffer, Outcome, Services, WorkerError, WorkerStrategy};
use crate::models::WorkerType;

/// A group being walked page by page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupCursor {
    group_id: u64,
    cursor: Option<String>,
}

/// Walks candidate groups' member rosters one page per unit. The position
/// inside the current group survives between cycles.
pub struct GroupCrawl {
    buffer: CandidateBuffer,
    groups: VecDeque<u64>,
    current: Option<GroupCursor>,
    batch_size: usize,
    seed_batch_size: usize,
}

impl GroupCrawl {
    pub fn new(batch_size: usize, seed_batch_size: usize, max_retries: Option<u32>) -> Self {
        Self {
            buffer: CandidateBuffer::new(max_retries),
            groups: VecDeque::new(),
            current: None,
            batch_size: batch_size.max(1),
            seed_batch_size: seed_batch_size.max(1),
        }
    }

    pub fn buffer(&self) -> &CandidateBuffer {
        &self.buffer
    }

    /// Group and cursor the next page will be read from.
    pub fn position(&self) -> Option<(u64, Option<&str>)> {
        self.current
            .as_ref()
            .map(|c| (c.group_id, c.cursor.as_deref()))
    }

    fn next_group(&mut self) -> Option<GroupCursor> {
        self.current.take().or_else(|| {
            self.groups.pop_front().map(|group_id| GroupCursor {
                group_id,
                cursor: None,
            })
        })
    }
}

#[async_trait]
impl WorkerStrategy for GroupCrawl {
    type Batch = Vec<u64>;

    fn kind(&self) -> WorkerType {
        WorkerType::Group
    }

    fn uses_gate(&self) -> bool {
        true
    }

    async fn assemble(&mut self, services: &Services) -> Result<Vec<u64>, WorkerError> {
        if self.buffer.len() < self.batch_size && self.current.is_none() && self.groups.is_empty() {
            let groups = services
                .repository
                .get_candidate_groups(self.seed_batch_size)
                .await?;
            self.groups.extend(groups);
        }

        // One page per unit, bounded so a run of empty pages cannot spin.
        let mut pages = 0;
        while self.buffer.len() < self.batch_size && pages < self.seed_batch_size {
            let Some(unit) = self.next_group() else {
                break;
            };
            let page = match services
                .platform
                .fetch_group_member_page(unit.group_id, unit.cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.current = Some(unit);
                    return Err(e.into());
                }
            };
            pages += 1;

            let total = page.ids.len();
            let added = add_candidates(services, &mut self.buffer, page.ids).await?;
            debug!(
                "Group {} page: {} members, {} new candidates",
                unit.group_id, total, added
            );

            self.current = page.next_cursor.map(|cursor| GroupCursor {
                group_id: unit.group_id,
                cursor: Some(cursor),
            });
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
