//! Test configuration helpers with fast lock timings

use modcache::{Config, DownloadCoordinator, LockConfig, RetryConfig};
use std::path::Path;
use std::time::Duration;

/// Lock timings short enough for tests that wait on other tasks
pub fn fast_lock_config() -> LockConfig {
    LockConfig {
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(20),
        log_every_n: 10,
    }
}

/// Retry settings that fail fast
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config caching under `cache_dir` with fast lock and retry timings
pub fn test_config(cache_dir: &Path) -> Config {
    let mut config = Config {
        cache_dir: Some(cache_dir.to_path_buf()),
        use_temp: false,
        lock: fast_lock_config(),
        ..Default::default()
    };
    config.http.retry = fast_retry_config();
    config
}

/// Local-filesystem coordinator with fast lock timings
pub fn test_coordinator() -> DownloadCoordinator {
    DownloadCoordinator::local(fast_lock_config())
}
