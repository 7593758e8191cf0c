//! Configuration management for graphwarden using the prefer crate.
//!
//! Every section has serde defaults so a partial (or missing) config file
//! still yields a runnable configuration. Environment variables override the
//! file for the settings deployments usually inject.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub status: StatusConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// Shared store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL. `memory://` selects the in-process store.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for every key written.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_namespace() -> String {
    "graphwarden".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

impl RedisConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

/// Priority queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_high_weight")]
    pub high_weight: f64,
    #[serde(default = "default_normal_weight")]
    pub normal_weight: f64,
    #[serde(default = "default_low_weight")]
    pub low_weight: f64,
    /// Items updated more recently than this are skipped when `check_exists` is set.
    #[serde(default = "default_freshness_grace_secs")]
    pub freshness_grace_secs: u64,
    /// Lifetime of published queue status records.
    #[serde(default = "default_info_ttl_secs")]
    pub info_ttl_secs: u64,
}

fn default_high_weight() -> f64 {
    0.6
}
fn default_normal_weight() -> f64 {
    0.3
}
fn default_low_weight() -> f64 {
    0.1
}
fn default_freshness_grace_secs() -> u64 {
    10 * 60
}
fn default_info_ttl_secs() -> u64 {
    60 * 60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_weight: default_high_weight(),
            normal_weight: default_normal_weight(),
            low_weight: default_low_weight(),
            freshness_grace_secs: default_freshness_grace_secs(),
            info_ttl_secs: default_info_ttl_secs(),
        }
    }
}

/// Cache lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_processed_ttl_secs")]
    pub processed_ttl_secs: u64,
    #[serde(default = "default_friend_count_ttl_secs")]
    pub friend_count_ttl_secs: u64,
}

fn default_processed_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_friend_count_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            processed_ttl_secs: default_processed_ttl_secs(),
            friend_count_ttl_secs: default_friend_count_ttl_secs(),
        }
    }
}

/// Backpressure gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Crawl workers pause while at least this many users await review.
    #[serde(default = "default_flagged_threshold")]
    pub flagged_threshold: u64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
}

fn default_flagged_threshold() -> u64 {
    10_000
}
fn default_pause_secs() -> u64 {
    5 * 60
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            flagged_threshold: default_flagged_threshold(),
            pause_secs: default_pause_secs(),
        }
    }
}

/// Polling loop pacing and batch sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seeds (users or groups) requested from the repository at a time.
    #[serde(default = "default_seed_batch_size")]
    pub seed_batch_size: usize,
    #[serde(default = "default_maintenance_batch_size")]
    pub maintenance_batch_size: usize,
    #[serde(default = "default_crawl_pace_ms")]
    pub crawl_pace_ms: u64,
    #[serde(default = "default_queue_pace_ms")]
    pub queue_pace_ms: u64,
    #[serde(default = "default_maintenance_pace_secs")]
    pub maintenance_pace_secs: u64,
    #[serde(default = "default_crawl_recovery_secs")]
    pub crawl_recovery_secs: u64,
    #[serde(default = "default_queue_recovery_secs")]
    pub queue_recovery_secs: u64,
    #[serde(default = "default_maintenance_recovery_secs")]
    pub maintenance_recovery_secs: u64,
    /// Drop an ID after it failed validation this many times. Unset retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn default_batch_size() -> usize {
    50
}
fn default_seed_batch_size() -> usize {
    10
}
fn default_maintenance_batch_size() -> usize {
    100
}
fn default_crawl_pace_ms() -> u64 {
    1_000
}
fn default_queue_pace_ms() -> u64 {
    1_000
}
fn default_maintenance_pace_secs() -> u64 {
    60 * 60
}
fn default_crawl_recovery_secs() -> u64 {
    5 * 60
}
fn default_queue_recovery_secs() -> u64 {
    30
}
fn default_maintenance_recovery_secs() -> u64 {
    5 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            seed_batch_size: default_seed_batch_size(),
            maintenance_batch_size: default_maintenance_batch_size(),
            crawl_pace_ms: default_crawl_pace_ms(),
            queue_pace_ms: default_queue_pace_ms(),
            maintenance_pace_secs: default_maintenance_pace_secs(),
            crawl_recovery_secs: default_crawl_recovery_secs(),
            queue_recovery_secs: default_queue_recovery_secs(),
            maintenance_recovery_secs: default_maintenance_recovery_secs(),
            max_retries: None,
        }
    }
}

/// External platform API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Profiles requested per API call; chunks are fetched concurrently.
    #[serde(default = "default_profile_chunk_size")]
    pub profile_chunk_size: usize,
}

fn default_platform_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_profile_chunk_size() -> usize {
    100
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            timeout_secs: default_timeout_secs(),
            profile_chunk_size: default_profile_chunk_size(),
        }
    }
}

/// Classification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_url")]
    pub endpoint: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_classifier_url() -> String {
    "http://localhost:8090".to_string()
}
fn default_classifier_timeout_secs() -> u64 {
    120
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_url(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

/// Heartbeat publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    5
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl StatusConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers graphwarden config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("graphwarden").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            // No config file found, use defaults with env overrides
            Err(_) => Self::default_with_env(),
        }
    }

    /// Create a default config with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse config text in the format implied by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(ns) = lookup("GRAPHWARDEN_NAMESPACE") {
            self.redis.namespace = ns;
        }
        if let Some(url) = lookup("GRAPHWARDEN_PLATFORM_URL") {
            self.platform.base_url = url;
        }
        if let Some(url) = lookup("GRAPHWARDEN_CLASSIFIER_URL") {
            self.classifier.endpoint = url;
        }
        if let Some(threshold) =
            lookup("GRAPHWARDEN_FLAGGED_THRESHOLD").and_then(|s| s.parse().ok())
        {
            self.gate.flagged_threshold = threshold;
        }
        self
    }

    /// Reject settings the workers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.batch_size == 0 {
            return Err(ConfigError::Invalid("worker.batch_size must be > 0".into()));
        }
        let weights = [
            self.queue.high_weight,
            self.queue.normal_weight,
            self.queue.low_weight,
        ];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(ConfigError::Invalid(
                "queue weights must be between 0 and 1".into(),
            ));
        }
        if weights.iter().sum::<f64>() > 1.0 + f64::EPSILON {
            return Err(ConfigError::Invalid(
                "queue weights must not sum to more than 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.processed_ttl_secs, 86_400);
        assert_eq!(config.cache.friend_count_ttl_secs, 604_800);
        assert_eq!(config.gate.pause_secs, 300);
        assert_eq!(config.worker.crawl_recovery_secs, 300);
        assert_eq!(config.worker.max_retries, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::parse(
            r#"
            [gate]
            flagged_threshold = 25

            [worker]
            batch_size = 5
            max_retries = 3
            "#,
            "toml",
        )
        .unwrap();

        assert_eq!(config.gate.flagged_threshold, 25);
        assert_eq!(config.gate.pause_secs, 300);
        assert_eq!(config.worker.batch_size, 5);
        assert_eq!(config.worker.max_retries, Some(3));
        assert_eq!(config.queue.high_weight, 0.6);
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = Config::parse("redis:\n  namespace: test\n", "yml").unwrap();
        assert_eq!(yaml.redis.namespace, "test");

        let json = Config::parse(r#"{"status": {"heartbeat_secs": 2}}"#, "json").unwrap();
        assert_eq!(json.status.heartbeat_secs, 2);
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = Config::parse("not = [valid", "toml").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6379"),
            ("GRAPHWARDEN_FLAGGED_THRESHOLD", "42"),
            ("GRAPHWARDEN_NAMESPACE", "staging"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::default().with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert_eq!(config.redis.namespace, "staging");
        assert_eq!(config.gate.flagged_threshold, 42);
    }

    #[test]
    fn test_invalid_threshold_env_is_ignored() {
        let config = Config::default().with_overrides_from(|k| {
            (k == "GRAPHWARDEN_FLAGGED_THRESHOLD").then(|| "lots".to_string())
        });
        assert_eq!(config.gate.flagged_threshold, 10_000);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = Config::default();
        config.queue.high_weight = 0.9;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphwarden.toml");
        std::fs::write(&path, "[worker]\nbatch_size = 7\n").unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.worker.batch_size, 7);
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_memory_url() {
        let mut config = RedisConfig::default();
        assert!(!config.is_memory());
        config.url = "memory://".to_string();
        assert!(config.is_memory());
    }
}
