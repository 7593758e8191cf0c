//! Repository kept in the shared key-value store.
//!
//! One JSON record per user under `record:user:<id>` and one per candidate
//! group under `record:group:<id>`. Aggregate queries walk the keys with a
//! cursor scan, which is fine for the record volumes a single deployment
//! reviews by hand.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Repository, RepositoryError};
use crate::models::{ExistingRecord, FlaggedResult, RecordStatus};
use crate::store::{scan_all, trailing_id, Keyspace, SharedStore};

/// Stored state for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub last_updated: DateTime<Utc>,
    /// Last time this user's friends were crawled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scanned: Option<DateTime<Utc>>,
    /// Last time maintenance re-checked this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(user_id: u64, status: RecordStatus) -> Self {
        Self {
            user_id,
            status,
            name: None,
            reason: None,
            confidence: None,
            last_updated: Utc::now(),
            last_scanned: None,
            last_checked: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupRecord {
    group_id: u64,
    #[serde(default)]
    last_scanned: Option<DateTime<Utc>>,
}

/// Repository backed by a [`KvStore`](crate::store::KvStore).
#[derive(Clone)]
pub struct StoreRepository {
    store: SharedStore,
    keys: Keyspace,
}

impl StoreRepository {
    pub fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub async fn get(&self, user_id: u64) -> Result<Option<UserRecord>, RepositoryError> {
        match self.store.get(&self.keys.user_record(user_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, record: &UserRecord) -> Result<(), RepositoryError> {
        let raw = serde_json::to_string(record)?;
        self.store
            .set(&self.keys.user_record(record.user_id), &raw)
            .await?;
        Ok(())
    }

    /// Register a confirmed user whose friends should be crawled.
    pub async fn add_seed_user(&self, user_id: u64) -> Result<(), RepositoryError> {
        let mut record = self
            .get(user_id)
            .await?
            .unwrap_or_else(|| UserRecord::new(user_id, RecordStatus::Confirmed));
        record.status = RecordStatus::Confirmed;
        record.last_updated = Utc::now();
        self.put(&record).await
    }

    /// Register a group whose members should be crawled.
    pub async fn add_candidate_group(&self, group_id: u64) -> Result<(), RepositoryError> {
        let record = GroupRecord {
            group_id,
            last_scanned: None,
        };
        self.store
            .set(
                &self.keys.candidate_group(group_id),
                &serde_json::to_string(&record)?,
            )
            .await?;
        Ok(())
    }

    /// Every user record. Unparseable records are skipped with a warning.
    async fn all_records(&self) -> Result<Vec<UserRecord>, RepositoryError> {
        let keys = scan_all(self.store.as_ref(), &self.keys.user_record_prefix()).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<UserRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping malformed record {}: {}", key, e),
            }
        }
        Ok(records)
    }

    async fn update_status(
        &self,
        ids: &[u64],
        status: RecordStatus,
        only_from: Option<RecordStatus>,
    ) -> Result<(), RepositoryError> {
        for &id in ids {
            let mut record = match self.get(id).await? {
                Some(record) => record,
                None if only_from.is_some() => continue,
                None => UserRecord::new(id, status),
            };
            if only_from.is_some_and(|from| record.status != from) {
                continue;
            }
            record.status = status;
            record.last_updated = Utc::now();
            self.put(&record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for StoreRepository {
    async fn count_flagged_items(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .all_records()
            .await?
            .iter()
            .filter(|r| r.status == RecordStatus::Flagged)
            .count() as u64)
    }

    async fn get_candidate_batch(&self, limit: usize) -> Result<Vec<u64>, RepositoryError> {
        let mut candidates: Vec<UserRecord> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| matches!(r.status, RecordStatus::Confirmed | RecordStatus::Flagged))
            .collect();
        // Never-scanned first, then least recently scanned.
        candidates.sort_by_key(|r| (r.last_scanned, r.user_id));
        candidates.truncate(limit);

        let now = Utc::now();
        let mut ids = Vec::with_capacity(candidates.len());
        for mut record in candidates {
            record.last_scanned = Some(now);
            self.put(&record).await?;
            ids.push(record.user_id);
        }
        Ok(ids)
    }

    async fn get_candidate_groups(&self, limit: usize) -> Result<Vec<u64>, RepositoryError> {
        let keys = scan_all(self.store.as_ref(), &self.keys.candidate_group_prefix()).await?;
        let mut groups = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<GroupRecord>(&raw) {
                Ok(group) => groups.push(group),
                Err(e) => {
                    tracing::warn!("Skipping malformed group record {}: {}", key, e);
                    if let Some(group_id) = trailing_id(&key) {
                        groups.push(GroupRecord {
                            group_id,
                            last_scanned: None,
                        });
                    }
                }
            }
        }
        groups.sort_by_key(|g| (g.last_scanned, g.group_id));
        groups.truncate(limit);

        let now = Utc::now();
        let mut ids = Vec::with_capacity(groups.len());
        for mut group in groups {
            group.last_scanned = Some(now);
            self.store
                .set(
                    &self.keys.candidate_group(group.group_id),
                    &serde_json::to_string(&group)?,
                )
                .await?;
            ids.push(group.group_id);
        }
        Ok(ids)
    }

    async fn check_existing(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, ExistingRecord>, RepositoryError> {
        let mut existing = HashMap::new();
        for &id in ids {
            if let Some(record) = self.get(id).await? {
                existing.insert(
                    id,
                    ExistingRecord {
                        status: record.status,
                        last_updated: record.last_updated,
                    },
                );
            }
        }
        Ok(existing)
    }

    async fn mark_processed(&self, ids: &[u64]) -> Result<(), RepositoryError> {
        let now = Utc::now();
        for &id in ids {
            let mut record = self
                .get(id)
                .await?
                .unwrap_or_else(|| UserRecord::new(id, RecordStatus::Cleared));
            record.last_updated = now;
            self.put(&record).await?;
        }
        Ok(())
    }

    async fn save_flagged(&self, items: &[FlaggedResult]) -> Result<(), RepositoryError> {
        for item in items {
            let mut record = self
                .get(item.user_id)
                .await?
                .unwrap_or_else(|| UserRecord::new(item.user_id, RecordStatus::Flagged));
            // A confirmed or banned verdict outranks a fresh flag.
            if matches!(record.status, RecordStatus::Cleared | RecordStatus::Flagged) {
                record.status = RecordStatus::Flagged;
            }
            record.name = Some(item.profile.name.clone());
            record.reason = Some(item.reason.clone());
            record.confidence = Some(item.confidence);
            record.last_updated = Utc::now();
            self.put(&record).await?;
        }
        Ok(())
    }

    async fn get_items_needing_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<u64>, Vec<u64>), RepositoryError> {
        let mut due: Vec<UserRecord> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.status != RecordStatus::Banned)
            .collect();
        due.sort_by_key(|r| (r.last_checked, r.user_id));
        due.truncate(limit);

        let now = Utc::now();
        let mut ids = Vec::with_capacity(due.len());
        let mut flagged = Vec::new();
        for mut record in due {
            if record.status == RecordStatus::Flagged {
                flagged.push(record.user_id);
            }
            ids.push(record.user_id);
            record.last_checked = Some(now);
            self.put(&record).await?;
        }
        Ok((ids, flagged))
    }

    async fn mark_banned(&self, ids: &[u64]) -> Result<(), RepositoryError> {
        self.update_status(ids, RecordStatus::Banned, None).await
    }

    async fn clear_flagged(&self, ids: &[u64]) -> Result<(), RepositoryError> {
        self.update_status(ids, RecordStatus::Cleared, Some(RecordStatus::Flagged))
            .await
    }
}
