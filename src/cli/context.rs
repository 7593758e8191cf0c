//! Wiring shared by the CLI commands.

use std::sync::Arc;

use tracing::warn;

use graphwarden::cache::Cache;
use graphwarden::config::Config;
use graphwarden::queue::PriorityQueue;
use graphwarden::repository::StoreRepository;
use graphwarden::store::{Keyspace, MemoryStore, SharedStore};

/// Loaded config plus an open store connection.
pub struct AppContext {
    pub config: Config,
    pub store: SharedStore,
    pub keys: Keyspace,
}

impl AppContext {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store: SharedStore = if config.redis.is_memory() {
            warn!("Using the in-memory store; state is lost on exit");
            Arc::new(MemoryStore::new())
        } else {
            open_redis(&config.redis.url).await?
        };
        let keys = Keyspace::new(&config.redis.namespace);
        Ok(Self {
            config,
            store,
            keys,
        })
    }

    pub fn repository(&self) -> Arc<StoreRepository> {
        Arc::new(StoreRepository::new(self.store.clone(), self.keys.clone()))
    }

    pub fn cache(&self) -> Cache {
        Cache::new(self.store.clone(), self.keys.clone(), &self.config.cache)
    }

    pub fn queue(&self) -> PriorityQueue {
        PriorityQueue::new(
            self.store.clone(),
            self.keys.clone(),
            self.config.queue.clone(),
            self.repository(),
        )
    }
}

#[cfg(feature = "redis-backend")]
async fn open_redis(url: &str) -> anyhow::Result<SharedStore> {
    use graphwarden::store::RedisStore;
    Ok(Arc::new(RedisStore::new(url).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn open_redis(url: &str) -> anyhow::Result<SharedStore> {
    anyhow::bail!(
        "Cannot connect to {}: built without the redis-backend feature (use memory://)",
        url
    )
}
