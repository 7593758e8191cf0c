//! Queue item and queue status models.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Priority lane an item is queued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Lanes in scan order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One unit of pending work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub user_id: u64,
    pub priority: Priority,
    /// Apply the freshness check before dispatch.
    #[serde(default)]
    pub check_exists: bool,
    pub enqueued_at: DateTime<Utc>,
    /// Exact lane member this item was read from. Submitters outside this
    /// crate may encode members differently, so removal must use it.
    #[serde(skip)]
    member: Option<String>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.priority == other.priority
            && self.check_exists == other.check_exists
            && self.enqueued_at == other.enqueued_at
    }
}

impl QueueItem {
    pub fn new(user_id: u64, priority: Priority) -> Self {
        Self::at(user_id, priority, Utc::now().trunc_subsecs(3))
    }

    /// Item with an explicit enqueue time.
    pub fn at(user_id: u64, priority: Priority, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            priority,
            check_exists: false,
            enqueued_at,
            member: None,
        }
    }

    /// Parse a lane member, remembering the raw string for removal.
    pub fn from_member(raw: &str) -> Result<Self, serde_json::Error> {
        let mut item: QueueItem = serde_json::from_str(raw)?;
        item.member = Some(raw.to_string());
        Ok(item)
    }

    pub fn with_check_exists(mut self, check_exists: bool) -> Self {
        self.check_exists = check_exists;
        self
    }

    /// Lane member for this item: the raw string it was read from, or its
    /// serialized form.
    pub fn to_member(&self) -> Result<String, serde_json::Error> {
        match &self.member {
            Some(raw) => Ok(raw.clone()),
            None => serde_json::to_string(self),
        }
    }

    /// Sorted-set score: enqueue time in milliseconds, so lanes are FIFO.
    pub fn score(&self) -> f64 {
        self.enqueued_at.timestamp_millis() as f64
    }
}

/// Processing state published for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Complete,
    Skipped,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Status side-channel for a queued user.
///
/// Best-effort projection; the lane contents are authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub user_id: u64,
    pub status: QueueStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// Depth of each lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneDepths {
    pub high: u64,
    pub normal: u64,
    pub low: u64,
}

impl LaneDepths {
    pub fn get(&self, priority: Priority) -> u64 {
        match priority {
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn set(&mut self, priority: Priority, depth: u64) {
        match priority {
            Priority::High => self.high = depth,
            Priority::Normal => self.normal = depth,
            Priority::Low => self.low = depth,
        }
    }

    pub fn total(&self) -> u64 {
        self.high + self.normal + self.low
    }

    /// Number of queued items in lanes ahead of `priority`.
    pub fn ahead_of(&self, priority: Priority) -> u64 {
        match priority {
            Priority::High => 0,
            Priority::Normal => self.high,
            Priority::Low => self.high + self.normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_roundtrip() {
        for p in Priority::ALL {
            assert_eq!(Priority::from_str(p.as_str()), Some(p));
        }
        assert_eq!(Priority::from_str("urgent"), None);
    }

    #[test]
    fn test_queue_status_roundtrip() {
        for s in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Complete,
            QueueStatus::Skipped,
        ] {
            assert_eq!(QueueStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(QueueStatus::from_str(""), None);
    }

    #[test]
    fn test_queue_item_defaults_check_exists() {
        let json = r#"{"user_id":5,"priority":"low","enqueued_at":"2024-01-01T00:00:00Z"}"#;
        let item: QueueItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.user_id, 5);
        assert_eq!(item.priority, Priority::Low);
        assert!(!item.check_exists);
    }

    #[test]
    fn test_member_read_from_lane_is_kept_verbatim() {
        let raw = r#"{"user_id":5,"priority":"high","enqueued_at":"2024-01-01T00:00:00Z"}"#;
        let item = QueueItem::from_member(raw).unwrap();
        assert_eq!(item.to_member().unwrap(), raw);

        let fresh = QueueItem::at(5, Priority::High, item.enqueued_at);
        assert_eq!(fresh, item);
        assert_ne!(fresh.to_member().unwrap(), raw);
    }

    #[test]
    fn test_lane_depths_ahead_of() {
        let depths = LaneDepths {
            high: 4,
            normal: 2,
            low: 9,
        };
        assert_eq!(depths.ahead_of(Priority::High), 0);
        assert_eq!(depths.ahead_of(Priority::Normal), 4);
        assert_eq!(depths.ahead_of(Priority::Low), 6);
        assert_eq!(depths.total(), 15);
    }
}
