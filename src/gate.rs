//! Backpressure on the crawl workers.
//!
//! Crawling produces flagged users faster than moderators can review them.
//! When the review backlog reaches the threshold the gate holds the caller
//! for one pause interval. The gate keeps no state of its own: every check
//! reads the count again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GateConfig;
use crate::repository::{Repository, RepositoryError};
use crate::status::StatusReporter;
use crate::worker::sleep_or_cancel;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Failed to read flagged count: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// The backlog was over threshold and the pause has elapsed (or was
    /// cancelled).
    Paused,
}

pub struct ThresholdGate {
    repository: Arc<dyn Repository>,
    reporter: Arc<StatusReporter>,
    threshold: u64,
    pause: Duration,
}

impl ThresholdGate {
    pub fn new(
        repository: Arc<dyn Repository>,
        reporter: Arc<StatusReporter>,
        config: &GateConfig,
    ) -> Self {
        Self {
            repository,
            reporter,
            threshold: config.flagged_threshold,
            pause: Duration::from_secs(config.pause_secs),
        }
    }

    pub async fn should_pause(
        &self,
        cancel: &CancellationToken,
    ) -> Result<GateDecision, GateError> {
        let count = self.repository.count_flagged_items().await?;
        if count < self.threshold {
            return Ok(GateDecision::Proceed);
        }

        let task = format!(
            "Paused - {} flagged users exceeds threshold of {}",
            count, self.threshold
        );
        info!("{}", task);
        self.reporter.update_status(&task, 0).await;
        sleep_or_cancel(cancel, self.pause).await;
        Ok(GateDecision::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlaggedResult, Profile, WorkerType};
    use crate::repository::StoreRepository;
    use crate::store::{Keyspace, MemoryStore};
    use crate::test_support::FlakyStore;

    async fn flagged_repo(count: u64) -> Arc<StoreRepository> {
        let repo = Arc::new(StoreRepository::new(
            Arc::new(MemoryStore::new()),
            Keyspace::new("test"),
        ));
        let items: Vec<FlaggedResult> = (1..=count)
            .map(|id| FlaggedResult {
                user_id: id,
                reason: "test".to_string(),
                confidence: 0.8,
                profile: Profile::new(id, "x"),
            })
            .collect();
        repo.save_flagged(&items).await.unwrap();
        repo
    }

    fn gate(
        repository: Arc<dyn Repository>,
        threshold: u64,
    ) -> (ThresholdGate, Arc<StatusReporter>) {
        let reporter = Arc::new(StatusReporter::new(
            Arc::new(MemoryStore::new()),
            Keyspace::new("test"),
            WorkerType::Friend,
            Duration::from_secs(60),
        ));
        let config = GateConfig {
            flagged_threshold: threshold,
            pause_secs: 0,
        };
        (ThresholdGate::new(repository, reporter.clone(), &config), reporter)
    }

    #[tokio::test]
    async fn test_below_threshold_proceeds() {
        let (gate, _) = gate(flagged_repo(4).await, 5);
        let decision = gate.should_pause(&CancellationToken::new()).await.unwrap();
        assert_eq!(decision, GateDecision::Proceed);
    }

    #[tokio::test]
    async fn test_at_threshold_pauses() {
        let (gate, reporter) = gate(flagged_repo(5).await, 5);
        let decision = gate.should_pause(&CancellationToken::new()).await.unwrap();
        assert_eq!(decision, GateDecision::Paused);

        let status = reporter.snapshot().await;
        assert_eq!(
            status.current_task,
            "Paused - 5 flagged users exceeds threshold of 5"
        );
        assert_eq!(status.progress, 0);
    }

    #[tokio::test]
    async fn test_above_threshold_pauses() {
        let (gate, _) = gate(flagged_repo(6).await, 5);
        let decision = gate.should_pause(&CancellationToken::new()).await.unwrap();
        assert_eq!(decision, GateDecision::Paused);
    }

    #[tokio::test]
    async fn test_pause_is_cancellable() {
        let repo = flagged_repo(1).await;
        let reporter = Arc::new(StatusReporter::new(
            Arc::new(MemoryStore::new()),
            Keyspace::new("test"),
            WorkerType::Group,
            Duration::from_secs(60),
        ));
        let config = GateConfig {
            flagged_threshold: 1,
            pause_secs: 3600,
        };
        let gate = ThresholdGate::new(repo, reporter, &config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let decision = tokio::time::timeout(Duration::from_secs(1), gate.should_pause(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision, GateDecision::Paused);
    }

    #[tokio::test]
    async fn test_count_error_is_returned() {
        let store = Arc::new(FlakyStore::new());
        store.fail_keys_containing("record:user");
        let repo = Arc::new(StoreRepository::new(store, Keyspace::new("test")));
        let (gate, _) = gate(repo, 5);
        assert!(gate.should_pause(&CancellationToken::new()).await.is_err());
    }
}
