//! Candidate buffer for the crawl workers.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

/// Ordered set of user ids waiting to be classified, with retry counts for
/// ids that failed validation.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<u64>,
    members: HashSet<u64>,
    retries: HashMap<u64, u32>,
    max_retries: Option<u32>,
}

impl CandidateBuffer {
    /// `max_retries` of `None` keeps retrying forever.
    pub fn new(max_retries: Option<u32>) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.members.contains(&id)
    }

    /// Append ids not already buffered. Returns how many were added.
    pub fn push_back(&mut self, ids: impl IntoIterator<Item = u64>) -> usize {
        let mut added = 0;
        for id in ids {
            if self.members.insert(id) {
                self.queue.push_back(id);
                added += 1;
            }
        }
        added
    }

    /// Take up to `n` ids from the front.
    pub fn take(&mut self, n: usize) -> Vec<u64> {
        let n = n.min(self.queue.len());
        let taken: Vec<u64> = self.queue.drain(..n).collect();
        for id in &taken {
            self.members.remove(id);
        }
        taken
    }

    /// Put failed ids back at the front, in their original order. Ids past
    /// the retry limit are dropped and returned.
    pub fn requeue_failed(&mut self, ids: &[u64]) -> Vec<u64> {
        let mut dropped = Vec::new();
        let mut requeue = Vec::with_capacity(ids.len());
        for &id in ids {
            let attempts = self.retries.entry(id).or_insert(0);
            *attempts += 1;
            if self.max_retries.is_some_and(|max| *attempts > max) {
                warn!("Giving up on {} after {} failed attempts", id, *attempts);
                self.retries.remove(&id);
                dropped.push(id);
            } else {
                requeue.push(id);
            }
        }
        for &id in requeue.iter().rev() {
            if self.members.insert(id) {
                self.queue.push_front(id);
            }
        }
        dropped
    }

    /// Forget retry counts for ids that are finished.
    pub fn clear_retries(&mut self, ids: &[u64]) {
        for id in ids {
            self.retries.remove(id);
        }
    }

    pub fn retry_count(&self, id: u64) -> u32 {
        self.retries.get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_back_skips_members() {
        let mut buffer = CandidateBuffer::new(None);
        assert_eq!(buffer.push_back([1, 2, 2, 3]), 3);
        assert_eq!(buffer.push_back([3, 4]), 1);
        assert_eq!(buffer.take(10), vec![1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_failed_ids_go_to_front_in_order() {
        let mut buffer = CandidateBuffer::new(None);
        buffer.push_back(1..=5);
        let batch = buffer.take(5);
        buffer.push_back([6, 7]);

        let dropped = buffer.requeue_failed(&[batch[1], batch[3]]);
        assert!(dropped.is_empty());
        assert_eq!(buffer.take(4), vec![2, 4, 6, 7]);
    }

    #[test]
    fn test_unbounded_retries_by_default() {
        let mut buffer = CandidateBuffer::new(None);
        for _ in 0..50 {
            buffer.take(1);
            assert!(buffer.requeue_failed(&[9]).is_empty());
        }
        assert_eq!(buffer.retry_count(9), 50);
    }

    #[test]
    fn test_max_retries_drops_id() {
        let mut buffer = CandidateBuffer::new(Some(2));
        assert!(buffer.requeue_failed(&[9]).is_empty());
        buffer.take(1);
        assert!(buffer.requeue_failed(&[9]).is_empty());
        buffer.take(1);
        assert_eq!(buffer.requeue_failed(&[9]), vec![9]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.retry_count(9), 0);
    }

    #[test]
    fn test_clear_retries() {
        let mut buffer = CandidateBuffer::new(None);
        buffer.requeue_failed(&[3]);
        buffer.clear_retries(&[3]);
        assert_eq!(buffer.retry_count(3), 0);
    }
}
