//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of comments requested per producer cycle.
pub const DEFAULT_FETCH_SIZE: usize = 2;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Base URL of the comment search API.
    pub source_url: String,
    /// How many recent comments to request per cycle.
    pub fetch_size: usize,
    /// Upper bound on waiting for publish acknowledgements.
    pub publish_timeout: Duration,
    /// Interval between producer cycles in `run` mode.
    pub cycle_interval: Duration,
    /// Deliveries of one message before it is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mention-pipeline.db"),
            source_url: "https://api.pushshift.io".to_string(),
            fetch_size: DEFAULT_FETCH_SIZE,
            publish_timeout: Duration::from_secs(30),
            cycle_interval: Duration::from_secs(60),
            max_delivery_attempts: 5,
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Build from `MENTION_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("MENTION_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let source_url = lookup("MENTION_SOURCE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.source_url);

        let fetch_size = parse_var(&lookup, "MENTION_FETCH_SIZE")?.unwrap_or(defaults.fetch_size);
        if fetch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MENTION_FETCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        let publish_timeout = parse_var::<u64, _>(&lookup, "MENTION_PUBLISH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.publish_timeout);

        let cycle_interval = parse_var::<u64, _>(&lookup, "MENTION_CYCLE_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cycle_interval);

        let max_delivery_attempts = parse_var(&lookup, "MENTION_MAX_DELIVERY_ATTEMPTS")?
            .unwrap_or(defaults.max_delivery_attempts);

        let log_dir = lookup("MENTION_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            db_path,
            source_url,
            fetch_size,
            publish_timeout,
            cycle_interval,
            max_delivery_attempts,
            log_dir,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
