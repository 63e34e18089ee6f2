//! Service configuration
//!
//! Settings are read from a YAML file and fall back to built-in defaults for
//! anything the file leaves out. Command-line flags are applied on top in
//! [`crate::cli`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::CacheSettings;
use crate::data::upstream::{
    DEFAULT_BASE_URL, DEFAULT_MAX_PAGE_SIZE, DEFAULT_RESOURCE_ID, DEFAULT_TIMEOUT,
};
use crate::data::{RetryPolicy, UpstreamClient};
use crate::query::{FetchMode, QueryLimits, DEFAULT_NAME_FIELD};
use crate::refresh::RefreshConfig;

/// Name of the config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "treasury-proxy.yaml";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// The config file exists but could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`Config`]
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Values parsed but are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Cached snapshot or direct passthrough
    pub mode: FetchMode,
    /// Include the underlying failure message in error responses
    pub expose_error_details: bool,
    /// `s-maxage` for unfiltered listing responses
    pub listing_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            mode: FetchMode::Cached,
            expose_error_details: true,
            listing_max_age_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub resource_id: String,
    /// Deadline for each outbound attempt
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Ceiling on the `limit` sent upstream
    pub max_page_size: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            retry_attempts: retry.max_attempts,
            retry_backoff_ms: retry.backoff.as_millis() as u64,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl UpstreamConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff: StdDuration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Builds the catalog client described by this section
    pub fn client(&self) -> UpstreamClient {
        UpstreamClient::new(&self.base_url, &self.resource_id)
            .with_timeout(StdDuration::from_millis(self.timeout_ms))
            .with_retry(self.retry_policy())
            .with_max_page_size(self.max_page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Records per upstream page during a refill
    pub page_size: u64,
    /// Pages fetched concurrently during a refill
    pub concurrency: usize,
    pub max_records: usize,
    pub failure_cooldown_secs: u64,
    /// Fill the cache at startup instead of on the first request
    pub warm_on_start: bool,
    /// Proactive refill period; 0 disables background refresh
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            page_size: 1000,
            concurrency: 5,
            max_records: 50_000,
            failure_cooldown_secs: 30,
            warm_on_start: true,
            refresh_interval_secs: 3000,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::seconds(secs_i64(self.ttl_secs)),
            page_size: self.page_size,
            concurrency: self.concurrency,
            max_records: self.max_records,
            failure_cooldown: Duration::seconds(secs_i64(self.failure_cooldown_secs)),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            interval: StdDuration::from_secs(self.refresh_interval_secs),
            warm_on_start: self.warm_on_start,
            enabled: self.refresh_interval_secs > 0,
        }
    }
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Record field matched by searches
    pub name_field: String,
    pub default_limit: usize,
    pub max_limit: usize,
    pub display_ceiling: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let limits = QueryLimits::default();
        Self {
            name_field: DEFAULT_NAME_FIELD.to_string(),
            default_limit: limits.default_limit,
            max_limit: limits.max_limit,
            display_ceiling: limits.display_ceiling,
        }
    }
}

impl QueryConfig {
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            display_ceiling: self.display_ceiling,
        }
    }
}

impl Config {
    /// Load configuration from file.
    ///
    /// Search order:
    /// 1. Explicit path if provided (must exist)
    /// 2. ./treasury-proxy.yaml (current directory)
    /// 3. The platform config directory, e.g. ~/.config/treasury-proxy/config.yaml
    ///
    /// When no file is found the built-in defaults are used.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit_path {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => return Err(ConfigError::NotFound(p.to_path_buf())),
            None => Self::find_config_file(),
        };

        let config = match path {
            Some(p) => Self::load_from_path(&p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        let project_dirs = ProjectDirs::from("", "", "treasury-proxy")?;
        let xdg_path = project_dirs.config_dir().join("config.yaml");
        xdg_path.exists().then_some(xdg_path)
    }

    /// Parses a config file without validating it
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        // An empty file means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.upstream.base_url.trim().is_empty() {
            return invalid("upstream.base_url must not be empty");
        }
        if self.upstream.resource_id.trim().is_empty() {
            return invalid("upstream.resource_id must not be empty");
        }
        if self.upstream.timeout_ms == 0 {
            return invalid("upstream.timeout_ms must be positive");
        }
        if self.upstream.max_page_size == 0 {
            return invalid("upstream.max_page_size must be positive");
        }
        if self.cache.page_size == 0 || self.cache.page_size > self.upstream.max_page_size {
            return invalid("cache.page_size must be between 1 and upstream.max_page_size");
        }
        if self.cache.concurrency == 0 {
            return invalid("cache.concurrency must be at least 1");
        }
        // Zero disables background refresh
        let refresh = self.cache.refresh_interval_secs;
        if refresh > 0 && refresh >= self.cache.ttl_secs {
            return invalid("cache.refresh_interval_secs must be below cache.ttl_secs, or 0 to disable");
        }
        if self.query.max_limit == 0 {
            return invalid("query.max_limit must be at least 1");
        }
        if self.query.default_limit == 0 || self.query.default_limit > self.query.max_limit {
            return invalid("query.default_limit must be between 1 and query.max_limit");
        }
        if self.query.name_field.trim().is_empty() {
            return invalid("query.name_field must not be empty");
        }
        Ok(())
    }
}
