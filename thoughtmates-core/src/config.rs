use crate::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "THOUGHTMATES_CONFIG";
pub const DATABASE_URL_ENV: &str = "THOUGHTMATES_DATABASE_URL";
pub const EMBEDDING_API_KEY_ENV: &str = "THOUGHTMATES_EMBEDDING_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub feed: FeedConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://thoughtmates.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an Azure OpenAI compatible endpoint
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key: Option<String>,
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            deployment: "text-embedding-3-small".to_string(),
            api_version: "2024-02-01".to_string(),
            api_key: None,
            dimensions: None,
            timeout_secs: 10,
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Scores must be strictly above this to be stored
    pub meaningful_threshold: f32,
    pub top_k: usize,
    pub max_candidates: usize,
    pub prune_stale: bool,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            meaningful_threshold: 0.25,
            top_k: DEFAULT_TOP_K,
            max_candidates: 10_000,
            prune_stale: false,
            workers: 2,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub trending_window_hours: u32,
    pub trending_page_size: usize,
    pub similar_threshold: f32,
    pub similar_limit: usize,
    pub thoughtmates_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            trending_window_hours: DEFAULT_WINDOW_HOURS,
            trending_page_size: DEFAULT_PAGE_SIZE,
            similar_threshold: 0.7,
            similar_limit: 20,
            thoughtmates_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, CoreError> {
        let config: AppConfig = toml::from_str(contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reads the file named by `THOUGHTMATES_CONFIG` (defaults when unset or
    /// missing), then applies environment overrides.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if Path::new(&path).exists() => Self::load(&path)?,
            Ok(path) => {
                tracing::warn!("Config file {} not found, using defaults", path);
                Self::default()
            }
            Err(_) => Self::default(),
        };

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database.url = url;
        }
        if let Ok(key) = std::env::var(EMBEDDING_API_KEY_ENV) {
            config.embedding.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let threshold = self.matching.meaningful_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(invalid("matching.meaningful_threshold", threshold));
        }
        if self.matching.top_k == 0 {
            return Err(invalid("matching.top_k", self.matching.top_k));
        }
        if self.matching.workers == 0 {
            return Err(invalid("matching.workers", self.matching.workers));
        }
        if self.matching.queue_capacity == 0 {
            return Err(invalid("matching.queue_capacity", self.matching.queue_capacity));
        }
        if !(-1.0..=1.0).contains(&self.feed.similar_threshold) {
            return Err(invalid("feed.similar_threshold", self.feed.similar_threshold));
        }
        if self.embedding.max_attempts == 0 {
            return Err(invalid("embedding.max_attempts", self.embedding.max_attempts));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(invalid("embedding.dimensions", 0));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", 0));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(invalid("broadcast.subscriber_buffer", 0));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> CoreError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
