use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::UpsertStrategy;
use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = "unsd-sync.json";
pub const DEFAULT_API_BASE_URL: &str = "https://data.un.org/ws/rest";
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE: &str = "UNSD";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_STALENESS_SECS: u64 = 3600;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_HTTP_RETRIES: u32 = 3;
pub const DEFAULT_HTTP_RETRY_DELAY_MS: u64 = 200;

pub const ENV_MONGO_URI: &str = "UNSD_SYNC_MONGO_URI";
pub const ENV_DATA_DIR: &str = "UNSD_SYNC_DATA_DIR";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub mongo_uri: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,
    #[serde(default)]
    pub staleness_secs: Option<u64>,
    #[serde(default)]
    pub strategy: Option<UpsertStrategy>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub http_retries: Option<u32>,
    #[serde(default)]
    pub http_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub store_timeout_secs: Option<u64>,
    #[serde(default)]
    pub insert_batch_size: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_secs: Option<u64>,
    #[serde(default)]
    pub escalate_after: Option<u32>,
}

/// Bounded retry inside one tick, per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Consecutive failed ticks of one class before logging switches to `error`.
    pub escalate_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            escalate_after: 5,
        }
    }
}

/// Per-request retries for transient HTTP failures, below the per-tick [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRetry {
    pub retries: u32,
    pub base_delay: Duration,
}

impl HttpRetry {
    /// Linear backoff: the n-th retry waits n times the base delay.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }
}

impl Default for HttpRetry {
    fn default() -> Self {
        Self {
            retries: DEFAULT_HTTP_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_HTTP_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mongo_uri: String,
    pub database: String,
    pub data_dir: Utf8PathBuf,
    pub log_file: Option<Utf8PathBuf>,
    pub api_base_url: String,
    pub tick_interval: Duration,
    pub staleness: Duration,
    pub strategy: UpsertStrategy,
    pub http_timeout: Duration,
    pub http_retry: HttpRetry,
    pub store_timeout: Duration,
    pub insert_batch_size: usize,
    pub retry: RetryPolicy,
}

impl ResolvedConfig {
    /// Opens `log_file` for appending, creating missing parent directories.
    pub fn open_log_file(&self) -> Result<Option<File>, SyncError> {
        let Some(path) = &self.log_file else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(format!("{parent}: {err}")))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map(Some)
            .map_err(|err| SyncError::Filesystem(format!("{path}: {err}")))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file, falling back to defaults when the default file is absent.
    /// An explicitly named file must exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config)?;
        Self::apply_env(&mut resolved, |key| std::env::var(key).ok());
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let retry_entry = config.retry.unwrap_or_default();
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: retry_entry.max_attempts.unwrap_or(defaults.max_attempts),
            backoff: retry_entry
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff),
            escalate_after: retry_entry
                .escalate_after
                .unwrap_or(defaults.escalate_after),
        };
        if retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let tick_interval_secs = config
            .tick_interval_secs
            .unwrap_or(DEFAULT_TICK_INTERVAL_SECS);
        let staleness_secs = config.staleness_secs.unwrap_or(DEFAULT_STALENESS_SECS);
        if tick_interval_secs == 0 || staleness_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "tick_interval_secs and staleness_secs must be positive".to_string(),
            ));
        }

        let insert_batch_size = config
            .insert_batch_size
            .unwrap_or(DEFAULT_INSERT_BATCH_SIZE);
        if insert_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "insert_batch_size must be positive".to_string(),
            ));
        }

        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_dir(),
        };

        Ok(ResolvedConfig {
            mongo_uri: config
                .mongo_uri
                .unwrap_or_else(|| DEFAULT_MONGO_URI.to_string()),
            database: config
                .database
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            data_dir,
            log_file: config.log_file.map(Utf8PathBuf::from),
            api_base_url: config
                .api_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            tick_interval: Duration::from_secs(tick_interval_secs),
            staleness: Duration::from_secs(staleness_secs),
            strategy: config.strategy.unwrap_or_default(),
            http_timeout: Duration::from_secs(
                config.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            http_retry: HttpRetry {
                retries: config.http_retries.unwrap_or(DEFAULT_HTTP_RETRIES),
                base_delay: Duration::from_millis(
                    config
                        .http_retry_delay_ms
                        .unwrap_or(DEFAULT_HTTP_RETRY_DELAY_MS),
                ),
            },
            store_timeout: Duration::from_secs(
                config
                    .store_timeout_secs
                    .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
            ),
            insert_batch_size,
            retry,
        })
    }

    pub fn apply_env<F>(resolved: &mut ResolvedConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(ENV_MONGO_URI).filter(|value| !value.trim().is_empty()) {
            resolved.mongo_uri = uri.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|value| !value.trim().is_empty()) {
            resolved.data_dir = Utf8PathBuf::from(dir.trim());
        }
    }
}

fn default_data_dir() -> Utf8PathBuf {
    ProjectDirs::from("org", "unsd", "unsd-sync")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("data_files"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.database, "UNSD");
        assert_eq!(resolved.tick_interval, Duration::from_secs(60));
        assert_eq!(resolved.staleness, Duration::from_secs(3600));
        assert_eq!(resolved.strategy, UpsertStrategy::FullReplace);
        assert_eq!(resolved.retry, RetryPolicy::default());
        assert!(resolved.log_file.is_none());
    }
}
