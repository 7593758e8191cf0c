//! Repository layer for moderation records.
//!
//! Workers only ever talk to the [`Repository`] trait. Persistence must be
//! an idempotent upsert: two workers can race past the dedup cache and save
//! the same user twice, and the second write must be harmless.

mod store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{ExistingRecord, FlaggedResult};
use crate::store::StoreError;

pub use store::{StoreRepository, UserRecord};

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Moderation record storage consumed by the workers.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Number of users awaiting moderation review.
    async fn count_flagged_items(&self) -> Result<u64, RepositoryError>;

    /// Users whose friend lists should be crawled next.
    async fn get_candidate_batch(&self, limit: usize) -> Result<Vec<u64>, RepositoryError>;

    /// Groups whose rosters should be crawled next.
    async fn get_candidate_groups(&self, limit: usize) -> Result<Vec<u64>, RepositoryError>;

    /// Look up which of `ids` are already known.
    async fn check_existing(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, ExistingRecord>, RepositoryError>;

    /// Record that `ids` were checked.
    async fn mark_processed(&self, ids: &[u64]) -> Result<(), RepositoryError>;

    /// Upsert flagged users.
    async fn save_flagged(&self, items: &[FlaggedResult]) -> Result<(), RepositoryError>;

    /// Users due for a re-check, plus the subset currently flagged.
    async fn get_items_needing_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<u64>, Vec<u64>), RepositoryError>;

    /// Record platform bans.
    async fn mark_banned(&self, ids: &[u64]) -> Result<(), RepositoryError>;

    /// Clear flags on users that no longer violate policy.
    async fn clear_flagged(&self, ids: &[u64]) -> Result<(), RepositoryError>;
}
