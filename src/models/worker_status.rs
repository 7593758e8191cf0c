//! Worker status models for heartbeat reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// Walks friend lists of known users.
    Friend,
    /// Walks group member rosters.
    Group,
    /// Consumes the priority queue.
    Queue,
    /// Re-checks flagged users and sweeps caches.
    Maintenance,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Group => "group",
            Self::Queue => "queue",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "friend" => Some(Self::Friend),
            "group" => Some(Self::Group),
            "queue" => Some(Self::Queue),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// Heartbeat record for one running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Unique per worker process, generated at start.
    pub worker_id: String,
    pub worker_type: WorkerType,
    /// Human-readable current task description.
    pub current_task: String,
    /// Coarse milestone percentage, 0-100.
    pub progress: u8,
    pub is_healthy: bool,
    /// Container ID or hostname.
    pub host: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerStatus {
    pub fn new(worker_type: WorkerType) -> Self {
        let now = Utc::now();
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            worker_type,
            current_task: "Starting".to_string(),
            progress: 0,
            is_healthy: true,
            host: get_hostname(),
            started_at: now,
            last_heartbeat: now,
        }
    }

    /// Update the task and progress; progress is clamped to 100.
    pub fn set_task(&mut self, task: &str, progress: u8) {
        self.current_task = task.to_string();
        self.progress = progress.min(100);
    }

    /// Check if the worker is stale (no heartbeat for given duration).
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        let age = Utc::now() - self.last_heartbeat;
        age.num_seconds() > threshold_secs
    }
}

/// Get the current hostname.
fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
