//! Worker polling loop.
//!
//! Every worker runs the same cycle: gate, assemble, enrich, classify,
//! persist, complete. A [`WorkerStrategy`] decides where a batch comes from
//! and what completion means for it; [`Worker`] owns the loop, the
//! heartbeat milestones, the pacing and the recovery path.

mod buffer;
mod friend;
mod group;
mod maintenance;
mod queue_consumer;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheError};
use crate::classifier::{Classifier, ClassifierError};
use crate::config::WorkerConfig;
use crate::gate::{GateDecision, GateError, ThresholdGate};
use crate::models::{Classification, Profile, QueueItem, WorkerType};
use crate::platform::{PlatformApi, PlatformError};
use crate::queue::QueueError;
use crate::repository::{Repository, RepositoryError};
use crate::status::StatusReporter;

pub use buffer::CandidateBuffer;
pub use friend::FriendCrawl;
pub use group::GroupCrawl;
pub use maintenance::{Maintenance, MaintenanceBatch};
pub use queue_consumer::QueueConsumer;

/// Errors that abort a cycle and send the worker down the recovery path.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Gate check failed: {0}")]
    Gate(#[from] GateError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Sleep for `duration` unless `cancel` fires first. Returns false when
/// cancelled.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Collaborators shared by every strategy.
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn Repository>,
    pub platform: Arc<dyn PlatformApi>,
    pub classifier: Arc<dyn Classifier>,
    pub cache: Cache,
}

/// Delay between cycles and after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub pace: Duration,
    pub recovery: Duration,
}

impl Pacing {
    pub fn for_worker(worker_type: WorkerType, config: &WorkerConfig) -> Self {
        match worker_type {
            WorkerType::Friend | WorkerType::Group => Self {
                pace: Duration::from_millis(config.crawl_pace_ms),
                recovery: Duration::from_secs(config.crawl_recovery_secs),
            },
            WorkerType::Queue => Self {
                pace: Duration::from_millis(config.queue_pace_ms),
                recovery: Duration::from_secs(config.queue_recovery_secs),
            },
            WorkerType::Maintenance => Self {
                pace: Duration::from_secs(config.maintenance_pace_secs),
                recovery: Duration::from_secs(config.maintenance_recovery_secs),
            },
        }
    }
}

/// A unit of work assembled for one cycle.
pub trait WorkBatch: Send + Sync {
    /// User ids in batch order.
    fn ids(&self) -> Vec<u64>;

    fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

impl WorkBatch for Vec<u64> {
    fn ids(&self) -> Vec<u64> {
        self.clone()
    }
}

impl WorkBatch for Vec<QueueItem> {
    fn ids(&self) -> Vec<u64> {
        self.iter().map(|item| item.user_id).collect()
    }
}

/// What happened to each id of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Classified, or had no profile left to classify.
    pub succeeded: Vec<u64>,
    /// Failed validation and should be tried again.
    pub failed: Vec<u64>,
    /// Subset of `succeeded` that was flagged.
    pub flagged: Vec<u64>,
    /// Whether persistence went through.
    pub persisted: bool,
}

impl Outcome {
    pub fn new(ids: &[u64], classification: &Classification, persisted: bool) -> Self {
        let failed: HashSet<u64> = classification.failed.iter().copied().collect();
        let flagged: HashSet<u64> = classification.flagged_ids().into_iter().collect();
        let succeeded: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| !failed.contains(id))
            .collect();
        Self {
            flagged: succeeded
                .iter()
                .copied()
                .filter(|id| flagged.contains(id))
                .collect(),
            failed: ids.iter().copied().filter(|id| failed.contains(id)).collect(),
            succeeded,
            persisted,
        }
    }

    /// Every id failed; used when a cycle breaks off after assembly.
    pub fn all_failed(ids: &[u64]) -> Self {
        Self {
            failed: ids.to_vec(),
            ..Default::default()
        }
    }

    /// Ids that must come back: failed validation, plus flagged ids whose
    /// verdict was not saved.
    pub fn retry_ids(&self) -> Vec<u64> {
        let mut ids = self.failed.clone();
        if !self.persisted {
            ids.extend(self.flagged.iter().copied());
        }
        ids
    }

    /// Ids that are finished for this dedup window.
    pub fn done_ids(&self) -> Vec<u64> {
        let unsaved: HashSet<u64> = if self.persisted {
            HashSet::new()
        } else {
            self.flagged.iter().copied().collect()
        };
        self.succeeded
            .iter()
            .copied()
            .filter(|id| !unsaved.contains(id))
            .collect()
    }
}

/// The variable parts of a worker cycle.
#[async_trait]
pub trait WorkerStrategy: Send + Sync {
    type Batch: WorkBatch;

    fn kind(&self) -> WorkerType;

    /// Whether the backlog gate applies before each cycle.
    fn uses_gate(&self) -> bool {
        false
    }

    async fn assemble(&mut self, services: &Services) -> Result<Self::Batch, WorkerError>;

    async fn enrich(
        &mut self,
        services: &Services,
        batch: &mut Self::Batch,
    ) -> Result<Vec<Profile>, WorkerError> {
        Ok(services.platform.fetch_profiles(&batch.ids()).await?)
    }

    /// Classify profiles. A classifier error fails the whole batch.
    async fn classify(&self, services: &Services, profiles: &[Profile]) -> Classification {
        if profiles.is_empty() {
            return Classification::default();
        }
        match services.classifier.classify(profiles).await {
            Ok(classification) => classification,
            Err(e) => {
                error!("Classification failed for {} profiles: {}", profiles.len(), e);
                let ids: Vec<u64> = profiles.iter().map(|p| p.id).collect();
                Classification::all_failed(&ids)
            }
        }
    }

    /// Save flagged users and record the rest as checked.
    async fn persist(
        &self,
        services: &Services,
        batch: &Self::Batch,
        classification: &Classification,
    ) -> Result<(), WorkerError> {
        services
            .repository
            .save_flagged(&classification.flagged)
            .await?;
        let failed: HashSet<u64> = classification.failed.iter().copied().collect();
        let checked: Vec<u64> = batch
            .ids()
            .into_iter()
            .filter(|id| !failed.contains(id))
            .collect();
        services.repository.mark_processed(&checked).await?;
        Ok(())
    }

    /// Fold retries back in, remove finished work.
    async fn complete(
        &mut self,
        services: &Services,
        batch: &Self::Batch,
        outcome: &Outcome,
    ) -> Result<(), WorkerError>;
}

/// Result of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Paused,
    Idle,
    Processed { count: usize },
}

/// Runs a strategy until cancelled.
pub struct Worker<S: WorkerStrategy> {
    strategy: S,
    services: Services,
    reporter: Arc<StatusReporter>,
    gate: Option<ThresholdGate>,
    pacing: Pacing,
}

impl<S: WorkerStrategy> Worker<S> {
    pub fn new(
        strategy: S,
        services: Services,
        reporter: Arc<StatusReporter>,
        pacing: Pacing,
    ) -> Self {
        Self {
            strategy,
            services,
            reporter,
            gate: None,
            pacing,
        }
    }

    pub fn with_gate(mut self, gate: ThresholdGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Loop until `cancel` fires, then publish a final status.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let kind = self.strategy.kind();
        self.reporter.start(&cancel).await;
        info!("{} worker started", kind.as_str());

        while !cancel.is_cancelled() {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_cycle(&cancel) => result,
            };

            match result {
                Ok(Cycle::Paused) => {}
                Ok(Cycle::Idle) => {
                    self.reporter.update_status("Idle", 0).await;
                    sleep_or_cancel(&cancel, self.pacing.pace).await;
                }
                Ok(Cycle::Processed { count }) => {
                    debug!("{} worker processed {} ids", kind.as_str(), count);
                    sleep_or_cancel(&cancel, self.pacing.pace).await;
                }
                Err(e) => {
                    error!("{} worker cycle failed: {}", kind.as_str(), e);
                    self.reporter.set_healthy(false).await;
                    self.reporter
                        .update_status(&format!("Error: {}", e), 0)
                        .await;
                    if !sleep_or_cancel(&cancel, self.pacing.recovery).await {
                        break;
                    }
                    self.reporter.set_healthy(true).await;
                }
            }
        }

        info!("{} worker stopping", kind.as_str());
        self.reporter.stop().await;
    }

    /// One pass through the cycle.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<Cycle, WorkerError> {
        if self.strategy.uses_gate() {
            if let Some(gate) = &self.gate {
                if gate.should_pause(cancel).await? == GateDecision::Paused {
                    return Ok(Cycle::Paused);
                }
            }
        }

        self.reporter.update_status("Assembling batch", 10).await;
        let mut batch = self.strategy.assemble(&self.services).await?;
        if batch.is_empty() {
            return Ok(Cycle::Idle);
        }
        let ids = batch.ids();

        self.reporter
            .update_status(&format!("Enriching {} ids", ids.len()), 30)
            .await;
        let profiles = match self.strategy.enrich(&self.services, &mut batch).await {
            Ok(profiles) => profiles,
            Err(e) => {
                let outcome = Outcome::all_failed(&ids);
                if let Err(complete_err) = self
                    .strategy
                    .complete(&self.services, &batch, &outcome)
                    .await
                {
                    warn!("Failed to return batch after enrich error: {}", complete_err);
                }
                return Err(e);
            }
        };

        self.reporter
            .update_status(&format!("Classifying {} profiles", profiles.len()), 50)
            .await;
        let classification = self.strategy.classify(&self.services, &profiles).await;

        self.reporter
            .update_status(
                &format!("Persisting {} flagged", classification.flagged.len()),
                70,
            )
            .await;
        let persisted = match self
            .strategy
            .persist(&self.services, &batch, &classification)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist results: {}", e);
                false
            }
        };

        let outcome = Outcome::new(&ids, &classification, persisted);
        self.reporter.update_status("Completing batch", 90).await;
        if let Err(e) = self
            .strategy
            .complete(&self.services, &batch, &outcome)
            .await
        {
            warn!("Failed to complete batch: {}", e);
        }

        let done = outcome.done_ids();
        if let Err(e) = self.services.cache.mark_processed(&done).await {
            warn!("{}", e);
        }

        info!(
            "{} cycle: {} ids, {} flagged, {} to retry",
            self.strategy.kind().as_str(),
            ids.len(),
            outcome.flagged.len(),
            outcome.retry_ids().len()
        );
        self.reporter
            .update_status(&format!("Processed {} ids", ids.len()), 100)
            .await;
        Ok(Cycle::Processed { count: ids.len() })
    }
}

/// Drop ids that are already buffered, recently processed, or known to the
/// repository, then append the rest. Returns how many were added.
pub(crate) async fn add_candidates(
    services: &Services,
    buffer: &mut CandidateBuffer,
    ids: Vec<u64>,
) -> Result<usize, WorkerError> {
    let mut seen = HashSet::new();
    let fresh: Vec<u64> = ids
        .into_iter()
        .filter(|id| !buffer.contains(*id) && seen.insert(*id))
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }
    let unprocessed = services.cache.filter_unprocessed(&fresh).await;
    let existing = services.repository.check_existing(&unprocessed).await?;
    let new_ids: Vec<u64> = unprocessed
        .into_iter()
        .filter(|id| !existing.contains_key(id))
        .collect();
    Ok(buffer.push_back(new_ids))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::repository::StoreRepository;
    use crate::store::{Keyspace, MemoryStore, SharedStore};
    use crate::test_support::{FakeClassifier, FakePlatform};

    pub struct Harness {
        pub store: SharedStore,
        pub keys: Keyspace,
        pub repo: Arc<StoreRepository>,
        pub platform: Arc<FakePlatform>,
        pub classifier: Arc<FakeClassifier>,
        pub services: Services,
    }

    pub fn harness(platform: FakePlatform, classifier: FakeClassifier) -> Harness {
        harness_on(Arc::new(MemoryStore::new()), platform, classifier)
    }

    pub fn harness_on(
        store: SharedStore,
        platform: FakePlatform,
        classifier: FakeClassifier,
    ) -> Harness {
        let keys = Keyspace::new("test");
        let repo = Arc::new(StoreRepository::new(store.clone(), keys.clone()));
        let platform = Arc::new(platform);
        let classifier = Arc::new(classifier);
        let cache = Cache::with_ttls(
            store.clone(),
            keys.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let services = Services {
            repository: repo.clone(),
            platform: platform.clone(),
            classifier: classifier.clone(),
            cache,
        };
        Harness {
            store,
            keys,
            repo,
            platform,
            classifier,
            services,
        }
    }

    pub fn reporter(harness: &Harness, worker_type: WorkerType) -> Arc<StatusReporter> {
        Arc::new(StatusReporter::new(
            harness.store.clone(),
            harness.keys.clone(),
            worker_type,
            Duration::from_secs(60),
        ))
    }

    pub fn fast_pacing() -> Pacing {
        Pacing {
            pace: Duration::from_millis(5),
            recovery: Duration::from_millis(5),
        }
    }
}
