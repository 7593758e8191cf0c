//! Fakes shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::classifier::{Classifier, ClassifierError};
use crate::models::{Classification, FlaggedResult, MemberPage, Profile};
use crate::platform::{PlatformApi, PlatformError};
use crate::store::{KvStore, MemoryStore, ScanPage, StoreError, StoreResult};

/// Memory store that fails any command touching a key containing one of the
/// configured fragments.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_keys_containing(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|f| key.contains(f.as_str())) {
            return Err(StoreError::Unavailable(format!("injected failure on {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check(key)?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check(key)?;
        self.inner.exists(key).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.check(key)?;
        self.inner.del(key).await
    }

    async fn scan_prefix(&self, prefix: &str, cursor: u64, count: usize) -> StoreResult<ScanPage> {
        self.check(prefix)?;
        self.inner.scan_prefix(prefix, cursor, count).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        self.check(key)?;
        self.inner.zadd(key, score, member).await
    }

    async fn zrange(&self, key: &str, offset: usize, count: usize) -> StoreResult<Vec<String>> {
        self.check(key)?;
        self.inner.zrange(key, offset, count).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check(key)?;
        self.inner.zrem(key, member).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check(key)?;
        self.inner.zcard(key).await
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.inner.purge_expired().await
    }
}

/// Scripted social graph.
#[derive(Default)]
pub struct FakePlatform {
    pub friends: HashMap<u64, Vec<u64>>,
    pub friend_counts: HashMap<u64, u64>,
    /// Group id to pages of member ids.
    pub group_pages: HashMap<u64, Vec<Vec<u64>>>,
    pub banned: HashSet<u64>,
    /// Ids with no profile (deleted accounts).
    pub missing: HashSet<u64>,
    pub fail_profiles: bool,
    pub friend_requests: Mutex<Vec<u64>>,
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn fetch_friend_ids(&self, user_id: u64) -> Result<Vec<u64>, PlatformError> {
        self.friend_requests.lock().unwrap().push(user_id);
        Ok(self.friends.get(&user_id).cloned().unwrap_or_default())
    }

    async fn fetch_friend_count(&self, user_id: u64) -> Result<u64, PlatformError> {
        if let Some(count) = self.friend_counts.get(&user_id) {
            return Ok(*count);
        }
        Ok(self.friends.get(&user_id).map(|f| f.len() as u64).unwrap_or(0))
    }

    async fn fetch_group_member_page(
        &self,
        group_id: u64,
        cursor: Option<&str>,
    ) -> Result<MemberPage, PlatformError> {
        let pages = self.group_pages.get(&group_id).cloned().unwrap_or_default();
        let index: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| PlatformError::Other(format!("bad cursor {}", c)))?,
            None => 0,
        };
        let ids = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(MemberPage { ids, next_cursor })
    }

    async fn fetch_profiles(&self, ids: &[u64]) -> Result<Vec<Profile>, PlatformError> {
        if self.fail_profiles {
            return Err(PlatformError::RateLimited);
        }
        Ok(ids
            .iter()
            .filter(|id| !self.missing.contains(*id))
            .map(|&id| Profile::new(id, &format!("user{}", id)))
            .collect())
    }

    async fn fetch_banned_status(&self, ids: &[u64]) -> Result<Vec<u64>, PlatformError> {
        Ok(ids
            .iter()
            .copied()
            .filter(|id| self.banned.contains(id))
            .collect())
    }
}

/// Classifier with fixed verdicts per id.
#[derive(Default)]
pub struct FakeClassifier {
    pub flag: HashSet<u64>,
    pub fail: HashSet<u64>,
    pub error: bool,
    pub seen: Mutex<Vec<u64>>,
}

impl FakeClassifier {
    pub fn flagging(ids: &[u64]) -> Self {
        Self {
            flag: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn failing(ids: &[u64]) -> Self {
        Self {
            fail: ids.iter().copied().collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, profiles: &[Profile]) -> Result<Classification, ClassifierError> {
        self.seen
            .lock()
            .unwrap()
            .extend(profiles.iter().map(|p| p.id));
        if self.error {
            return Err(ClassifierError::Status(503));
        }
        let mut result = Classification::default();
        for profile in profiles {
            if self.fail.contains(&profile.id) {
                result.failed.push(profile.id);
            } else if self.flag.contains(&profile.id) {
                result.flagged.push(FlaggedResult {
                    user_id: profile.id,
                    reason: "test".to_string(),
                    confidence: 0.9,
                    profile: profile.clone(),
                });
            }
        }
        Ok(result)
    }
}
