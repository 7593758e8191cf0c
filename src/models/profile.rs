//! Platform profile and moderation verdict models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile as returned by the platform API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend_count: Option<u64>,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// A profile the classifier flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedResult {
    pub user_id: u64,
    pub reason: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub profile: Profile,
}

/// Classifier output for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// IDs that failed validation and should be retried.
    #[serde(default)]
    pub failed: Vec<u64>,
    #[serde(default)]
    pub flagged: Vec<FlaggedResult>,
}

impl Classification {
    /// Treat a whole batch as failed validation.
    pub fn all_failed(ids: &[u64]) -> Self {
        Self {
            failed: ids.to_vec(),
            flagged: Vec::new(),
        }
    }

    pub fn flagged_ids(&self) -> Vec<u64> {
        self.flagged.iter().map(|f| f.user_id).collect()
    }
}

/// Moderation state of a user already known to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Flagged,
    Confirmed,
    Cleared,
    Banned,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flagged => "flagged",
            Self::Confirmed => "confirmed",
            Self::Cleared => "cleared",
            Self::Banned => "banned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "flagged" => Some(Self::Flagged),
            "confirmed" => Some(Self::Confirmed),
            "cleared" => Some(Self::Cleared),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

/// Repository view of a known user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRecord {
    pub status: RecordStatus,
    pub last_updated: DateTime<Utc>,
}

/// One page of group members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberPage {
    pub ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status_roundtrip() {
        for s in [
            RecordStatus::Flagged,
            RecordStatus::Confirmed,
            RecordStatus::Cleared,
            RecordStatus::Banned,
        ] {
            assert_eq!(RecordStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(RecordStatus::from_str("unknown"), None);
    }

    #[test]
    fn test_all_failed() {
        let c = Classification::all_failed(&[1, 2]);
        assert_eq!(c.failed, vec![1, 2]);
        assert!(c.flagged.is_empty());
    }

    #[test]
    fn test_profile_deserializes_sparse_payload() {
        let p: Profile = serde_json::from_str(r#"{"id": 9}"#).unwrap();
        assert_eq!(p.id, 9);
        assert!(!p.is_banned);
        assert_eq!(p.friend_count, None);
    }
}
