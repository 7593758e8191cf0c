//! Maintenance pass over already-reviewed users.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Outcome, Services, WorkBatch, WorkerError, WorkerStrategy};
use crate::models::{Classification, Profile, WorkerType};

/// Users due for a re-check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceBatch {
    pub ids: Vec<u64>,
    /// Ids currently flagged in the repository.
    pub flagged: HashSet<u64>,
    /// Ids the platform reported as banned during enrichment.
    pub banned: Vec<u64>,
}

impl WorkBatch for MaintenanceBatch {
    fn ids(&self) -> Vec<u64> {
        self.ids.clone()
    }
}

/// Re-checks known users: records platform bans, re-classifies the rest and
/// clears flags that no longer hold. Also sweeps invalid cache entries and
/// frees expired ones.
pub struct Maintenance {
    batch_size: usize,
}

impl Maintenance {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl WorkerStrategy for Maintenance {
    type Batch = MaintenanceBatch;

    fn kind(&self) -> WorkerType {
        WorkerType::Maintenance
    }

    async fn assemble(&mut self, services: &Services) -> Result<MaintenanceBatch, WorkerError> {
        match services.cache.sweep_invalid().await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} invalid friend count entries", removed),
            Err(e) => warn!("Cache sweep failed: {}", e),
        }
        match services.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!("Purged {} expired entries", purged),
            Err(e) => warn!("Expiry purge failed: {}", e),
        }

        let (ids, flagged) = services
            .repository
            .get_items_needing_check(self.batch_size)
            .await?;
        Ok(MaintenanceBatch {
            ids,
            flagged: flagged.into_iter().collect(),
            banned: Vec::new(),
        })
    }

    async fn enrich(
        &mut self,
        services: &Services,
        batch: &mut MaintenanceBatch,
    ) -> Result<Vec<Profile>, WorkerError> {
        let banned = services.platform.fetch_banned_status(&batch.ids).await?;
        if !banned.is_empty() {
            services.repository.mark_banned(&banned).await?;
            info!("Recorded {} platform bans", banned.len());
        }
        let banned_set: HashSet<u64> = banned.iter().copied().collect();
        let remaining: Vec<u64> = batch
            .ids
            .iter()
            .copied()
            .filter(|id| !banned_set.contains(id))
            .collect();
        batch.banned = banned;

        if remaining.is_empty() {
            return Ok(Vec::new());
        }
        Ok(services.platform.fetch_profiles(&remaining).await?)
    }

    async fn persist(
        &self,
        services: &Services,
        batch: &MaintenanceBatch,
        classification: &Classification,
    ) -> Result<(), WorkerError> {
        services
            .repository
            .save_flagged(&classification.flagged)
            .await?;

        let still_flagged: HashSet<u64> = classification.flagged_ids().into_iter().collect();
        let failed: HashSet<u64> = classification.failed.iter().copied().collect();
        let banned: HashSet<u64> = batch.banned.iter().copied().collect();
        let cleared: Vec<u64> = batch
            .ids
            .iter()
            .copied()
            .filter(|id| {
                batch.flagged.contains(id)
                    && !still_flagged.contains(id)
                    && !failed.contains(id)
                    && !banned.contains(id)
            })
            .collect();
        if !cleared.is_empty() {
            services.repository.clear_flagged(&cleared).await?;
            info!("Cleared {} flags that no longer apply", cleared.len());
        }
        Ok(())
    }

    async fn complete(
        &mut self,
        _services: &Services,
        batch: &MaintenanceBatch,
        outcome: &Outcome,
    ) -> Result<(), WorkerError> {
        // Failed re-checks come back with the next rotation.
        debug!(
            "Maintenance pass: {} checked, {} banned, {} to re-check later",
            batch.ids.len(),
            batch.banned.len(),
            outcome.retry_ids().len()
        );
        Ok(())
    }
}
