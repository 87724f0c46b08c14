//! Service configuration loaded from the environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ccbuilder_core::defaults::{
    CACHE_PROMOTION_THRESHOLD, DATABASE_URL, ENGINE_COMMAND, POLL_INTERVAL_SECS,
    STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF_MS, WORKERS_DEVELOPMENT, WORKERS_PRODUCTION,
};
use ccbuilder_core::{Error, Result};
use ccbuilder_jobs::WorkerConfig;

/// Deployment profile selected by `CCBUILDER_CONFIG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }

    /// Worker count used when `OPT_PROCS` is unset.
    pub fn workers(self) -> usize {
        match self {
            Profile::Development => WORKERS_DEVELOPMENT,
            Profile::Production => WORKERS_PRODUCTION,
        }
    }

    /// Log level for the CCBuilder crates when `RUST_LOG` is unset.
    pub fn log_level(self) -> &'static str {
        match self {
            Profile::Development => "debug",
            Profile::Production => "info",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            other => Err(Error::Config(format!(
                "unknown CCBUILDER_CONFIG profile {:?} (expected development or production)",
                other
            ))),
        }
    }
}

/// Everything the daemon and services need to start.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub profile: Profile,
    pub database_url: String,
    pub poll_interval: Duration,
    pub engine_command: String,
    pub cache_promotion_threshold: i32,
    pub worker: WorkerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let profile = Profile::default();
        Self {
            profile,
            database_url: DATABASE_URL.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            engine_command: ENGINE_COMMAND.to_string(),
            cache_promotion_threshold: CACHE_PROMOTION_THRESHOLD,
            worker: WorkerConfig::default().with_workers(profile.workers()),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CCBUILDER_CONFIG` | `development` | Profile: `development` or `production` |
    /// | `OPT_PROCS` | profile (2 / 4) | Number of optimisation workers |
    /// | `OPT_WORKER_ENABLED` | `true` | Enable/disable the worker pool |
    /// | `DATABASE_URL` | `postgres://localhost/ccbuilder` | Store URL |
    /// | `POLL_INTERVAL_SECS` | `10` | Poller tick |
    /// | `ENGINE_COMMAND` | `ccbuilder-engine` | Modeling executable |
    /// | `CACHE_PROMOTION_THRESHOLD` | `5` | Identical builds before caching |
    /// | `STORE_RETRY_ATTEMPTS` | `3` | Attempts per store step |
    /// | `STORE_RETRY_BACKOFF_MS` | `500` | Initial retry backoff |
    ///
    /// Only an unknown profile is an error; unparsable numbers fall back to
    /// their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = match lookup("CCBUILDER_CONFIG") {
            Some(value) => value.parse::<Profile>()?,
            None => Profile::default(),
        };

        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let workers = parsed("OPT_PROCS")
            .map(|n| n as usize)
            .unwrap_or_else(|| profile.workers());

        let enabled = lookup("OPT_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let retry_attempts = parsed("STORE_RETRY_ATTEMPTS")
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(STORE_RETRY_ATTEMPTS);

        let retry_backoff_ms = parsed("STORE_RETRY_BACKOFF_MS").unwrap_or(STORE_RETRY_BACKOFF_MS);

        let poll_interval_secs = parsed("POLL_INTERVAL_SECS")
            .filter(|&secs| secs > 0)
            .unwrap_or(POLL_INTERVAL_SECS);

        let cache_promotion_threshold = lookup("CACHE_PROMOTION_THRESHOLD")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(CACHE_PROMOTION_THRESHOLD);

        Ok(Self {
            profile,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DATABASE_URL.to_string()),
            poll_interval: Duration::from_secs(poll_interval_secs),
            engine_command: lookup("ENGINE_COMMAND").unwrap_or_else(|| ENGINE_COMMAND.to_string()),
            cache_promotion_threshold,
            worker: WorkerConfig::default()
                .with_workers(workers)
                .with_retry_attempts(retry_attempts)
                .with_retry_backoff_ms(retry_backoff_ms)
                .with_enabled(enabled),
        })
    }

    /// Default `EnvFilter` directives for this profile.
    pub fn default_log_filter(&self) -> String {
        let level = self.profile.log_level();
        ["ccbuilder_core", "ccbuilder_db", "ccbuilder_jobs", "ccbuilder_service", "ccbuilder_optd"]
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }
}
