//! Worker heartbeats.
//!
//! Each worker owns a [`StatusReporter`] that republishes its in-memory
//! [`WorkerStatus`] on a fixed tick under `worker:status:<type>:<id>` with a
//! TTL of three intervals, so a dead worker's record disappears on its own.
//! [`Monitor`] reads the records back for the `status` command.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{WorkerStatus, WorkerType};
use crate::store::{scan_all, Keyspace, SharedStore, StoreError};

/// Publishes one worker's status until stopped.
pub struct StatusReporter {
    status: Arc<Mutex<WorkerStatus>>,
    store: SharedStore,
    keys: Keyspace,
    interval: Duration,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl StatusReporter {
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        worker_type: WorkerType,
        interval: Duration,
    ) -> Self {
        Self {
            status: Arc::new(Mutex::new(WorkerStatus::new(worker_type))),
            store,
            keys,
            interval,
            ticker: Mutex::new(None),
        }
    }

    pub async fn worker_id(&self) -> String {
        self.status.lock().await.worker_id.clone()
    }

    /// Copy of the current status.
    pub async fn snapshot(&self) -> WorkerStatus {
        self.status.lock().await.clone()
    }

    /// Publish now, then on every tick until [`stop`](Self::stop) or `cancel`.
    pub async fn start(&self, cancel: &CancellationToken) {
        publish(&self.status, self.store.as_ref(), &self.keys, self.interval).await;

        let token = cancel.child_token();
        let tick_token = token.clone();
        let status = self.status.clone();
        let store = self.store.clone();
        let keys = self.keys.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        publish(&status, store.as_ref(), &keys, interval).await;
                    }
                }
            }
        });

        let mut ticker = self.ticker.lock().await;
        if let Some((old_token, _)) = ticker.replace((token, handle)) {
            old_token.cancel();
        }
    }

    /// Stop ticking and publish a final "Shutting down" record.
    pub async fn stop(&self) {
        if let Some((token, handle)) = self.ticker.lock().await.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
        self.status.lock().await.set_task("Shutting down", 0);
        publish(&self.status, self.store.as_ref(), &self.keys, self.interval).await;
    }

    pub async fn update_status(&self, task: &str, progress: u8) {
        let mut status = self.status.lock().await;
        status.set_task(task, progress);
        debug!("[{}] {} ({}%)", status.worker_type.as_str(), task, status.progress);
    }

    pub async fn set_healthy(&self, healthy: bool) {
        self.status.lock().await.is_healthy = healthy;
    }
}

async fn publish(
    status: &Mutex<WorkerStatus>,
    store: &dyn crate::store::KvStore,
    keys: &Keyspace,
    interval: Duration,
) {
    let (key, payload) = {
        let mut status = status.lock().await;
        status.last_heartbeat = Utc::now();
        let key = keys.worker_status(status.worker_type.as_str(), &status.worker_id);
        (key, serde_json::to_string(&*status))
    };
    let payload = match payload {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to serialize worker status: {}", e);
            return;
        }
    };
    if let Err(e) = store.set_ex(&key, &payload, interval * 3).await {
        warn!("Failed to publish worker status: {}", e);
    }
}

/// Reads every live heartbeat.
pub struct Monitor {
    store: SharedStore,
    keys: Keyspace,
}

impl Monitor {
    pub fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Live statuses sorted by worker type, then id. Unreadable records are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<WorkerStatus>, StoreError> {
        let keys = scan_all(self.store.as_ref(), &self.keys.worker_status_prefix()).await?;
        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<WorkerStatus>(&raw) {
                Ok(status) => statuses.push(status),
                Err(e) => warn!("Skipping unreadable status at {}: {}", key, e),
            }
        }
        statuses.sort_by(|a, b| {
            (a.worker_type.as_str(), &a.worker_id).cmp(&(b.worker_type.as_str(), &b.worker_id))
        });
        Ok(statuses)
    }
}
