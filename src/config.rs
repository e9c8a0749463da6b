//! Configuration types for modcache

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

/// Environment variable that overrides every other cache directory setting
pub const CACHE_DIR_ENV: &str = "MODCACHE_DIR";

/// Directory created under the system temp dir when no cache root is configured
pub const TEMP_CACHE_SUBDIR: &str = "modcache_modules";

static CACHE_DIR_ANNOUNCED: Once = Once::new();

/// Lock file protocol timing
///
/// `timeout` and `poll_interval` are independent: waiters poll the lock every
/// `poll_interval`, and compare the holder's progress once per `timeout` window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Inactivity window after which a held lock is considered abandoned (default: 600 seconds)
    #[serde(default = "default_lock_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Delay between two checks of a lock held by another task (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Log the "waiting for download" message once every this many polls (default: 10)
    #[serde(default = "default_log_every_n")]
    pub log_every_n: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
            poll_interval: default_poll_interval(),
            log_every_n: default_log_every_n(),
        }
    }
}

/// Retry configuration for transient download failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Query parameter appended to HTTP module URLs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    /// Parameter name
    pub key: String,
    /// Parameter value
    pub value: String,
}

/// HTTP download settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for a whole module request, body included (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Query parameter asking the server for the compressed module format
    /// (default: `tf-hub-format=compressed`, None = send the URL unchanged)
    #[serde(default = "default_format_query")]
    pub format_query: Option<QueryParam>,

    /// Retry behavior for the initial request
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            format_query: default_format_query(),
            retry: RetryConfig::default(),
        }
    }
}

/// Main configuration for the module cache
///
/// The cache root is resolved explicitly through [`Config::resolve_cache_dir`]
/// and handed to resolvers at construction; nothing reads it from global state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Cache root directory (overridden by the `MODCACHE_DIR` environment variable)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Fall back to `<temp>/modcache_modules` when no cache root is set (default: true)
    #[serde(default = "default_true")]
    pub use_temp: bool,

    /// Lock file protocol timing
    #[serde(default)]
    pub lock: LockConfig,

    /// HTTP download settings
    #[serde(default)]
    pub http: HttpConfig,

    /// List the supported handle formats in unsupported-handle errors (default: true)
    #[serde(default = "default_true")]
    pub descriptive_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            use_temp: true,
            lock: LockConfig::default(),
            http: HttpConfig::default(),
            descriptive_errors: true,
        }
    }
}

impl Config {
    /// Parse a configuration from JSON, filling unset fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::storage("read config", path, e))?;
        Self::from_json_str(&json)
    }

    /// Check settings that would make the lock protocol misbehave
    pub fn validate(&self) -> Result<()> {
        if self.lock.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "lock poll interval must be greater than zero".to_string(),
                key: Some("lock.poll_interval".to_string()),
            });
        }
        if self.lock.log_every_n == 0 {
            return Err(Error::Config {
                message: "log_every_n must be at least 1".to_string(),
                key: Some("lock.log_every_n".to_string()),
            });
        }
        let multiplier = self.http.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!("backoff multiplier must be a finite number >= 1.0, got {multiplier}"),
                key: Some("http.retry.backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }

    /// Resolve the cache root directory
    ///
    /// Precedence: non-empty `MODCACHE_DIR` environment variable, then
    /// [`Config::cache_dir`], then `<temp>/modcache_modules` when `use_temp` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when none of the sources yields a directory.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        let from_env = std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|value| !value.is_empty());
        let dir = self.resolve_cache_dir_with(from_env)?;

        CACHE_DIR_ANNOUNCED.call_once(|| {
            tracing::info!(cache_dir = %dir.display(), "Using cache directory for modules");
        });

        Ok(dir)
    }

    fn resolve_cache_dir_with(&self, from_env: Option<String>) -> Result<PathBuf> {
        if let Some(dir) = from_env {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.cache_dir
            && !dir.as_os_str().is_empty()
        {
            return Ok(dir.clone());
        }
        if self.use_temp {
            return Ok(std::env::temp_dir().join(TEMP_CACHE_SUBDIR));
        }
        Err(Error::Config {
            message: format!(
                "no cache directory configured: set {} or cache_dir, or enable use_temp",
                CACHE_DIR_ENV
            ),
            key: Some("cache_dir".to_string()),
        })
    }
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_log_every_n() -> u32 {
    10
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_format_query() -> Option<QueryParam> {
    Some(QueryParam {
        key: "tf-hub-format".to_string(),
        value: "compressed".to_string(),
    })
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.lock.timeout, Duration::from_secs(600));
        assert_eq!(config.lock.poll_interval, Duration::from_secs(5));
        assert_eq!(config.lock.log_every_n, 10);
        assert!(config.use_temp);
        assert!(config.descriptive_errors);
        let query = config.http.format_query.unwrap();
        assert_eq!(query.key, "tf-hub-format");
        assert_eq!(query.value, "compressed");
    }

    #[test]
    fn test_env_value_wins_over_config() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/configured")),
            ..Default::default()
        };
        let dir = config
            .resolve_cache_dir_with(Some("/from-env".to_string()))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/from-env"));
    }

    #[test]
    fn test_configured_dir_used_without_env() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/configured")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_cache_dir_with(None).unwrap(),
            PathBuf::from("/configured")
        );
    }

    #[test]
    fn test_temp_fallback() {
        let dir = Config::default().resolve_cache_dir_with(None).unwrap();
        assert_eq!(dir, std::env::temp_dir().join(TEMP_CACHE_SUBDIR));
    }

    #[test]
    fn test_no_source_is_config_error() {
        let config = Config {
            use_temp: false,
            ..Default::default()
        };
        match config.resolve_cache_dir_with(None) {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("cache_dir")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_fills_defaults() {
        let config =
            Config::from_json_str(r#"{"cache_dir": "/data/modules", "lock": {"timeout": 30}}"#)
                .unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/data/modules")));
        assert_eq!(config.lock.timeout, Duration::from_secs(30));
        assert_eq!(config.lock.poll_interval, Duration::from_secs(5));
        assert_eq!(config.http.retry.max_attempts, 5);
    }

    #[test]
    fn test_json_can_disable_format_query() {
        let config = Config::from_json_str(r#"{"http": {"format_query": null}}"#).unwrap();
        assert!(config.http.format_query.is_none());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Config::from_json_str(r#"{"lock": {"poll_interval": 0}}"#).unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("lock.poll_interval")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        for multiplier in ["-1.0", "0.5"] {
            let json = format!(r#"{{"http": {{"retry": {{"backoff_multiplier": {multiplier}}}}}}}"#);
            match Config::from_json_str(&json) {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("http.retry.backoff_multiplier"))
                }
                other => panic!("expected config error for {multiplier}, got {:?}", other),
            }
        }

        let mut config = Config::default();
        config.http.retry.backoff_multiplier = f64::INFINITY;
        assert!(config.validate().is_err());
        config.http.retry.backoff_multiplier = f64::NAN;
        assert!(config.validate().is_err());
        config.http.retry.backoff_multiplier = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_reports_missing_path() {
        let err = Config::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.is_not_found());
    }
}
