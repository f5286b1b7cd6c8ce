//! Runtime configuration
//!
//! Settings come from environment variables, with command-line flags
//! layered on top by the binary.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::{Database, DEFAULT_BUSY_TIMEOUT};
use crate::reconcile::{MergeStrategy, Reconciler, RetryPolicy};

// Environment variable names
pub const ENV_DB_PATH: &str = "CONTACTLINK_DB";
pub const ENV_PORT: &str = "CONTACTLINK_PORT";
pub const ENV_MAX_RETRIES: &str = "CONTACTLINK_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "CONTACTLINK_RETRY_BACKOFF_MS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CONTACTLINK_BUSY_TIMEOUT_MS";
pub const ENV_MERGE_STRATEGY: &str = "CONTACTLINK_MERGE_STRATEGY";

/// Default port for the identify endpoint.
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
    pub merge_strategy: MergeStrategy,
}

impl Config {
    /// `db_path` is the `--db` flag; it wins over `CONTACTLINK_DB` and the
    /// platform default.
    pub fn from_env(db_path: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), db_path)
    }

    /// Build from an arbitrary key lookup. Unset keys take defaults; set but
    /// unparseable values are errors. The default database path is only
    /// resolved when neither `db_path` nor the lookup supplies one.
    pub fn from_lookup<F>(lookup: F, db_path: Option<PathBuf>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match db_path {
            Some(path) => path,
            None => match lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
                Some(path) => PathBuf::from(path),
                None => Database::default_path()?,
            },
        };

        let defaults = RetryPolicy::default();
        let port = parse_var(&lookup, ENV_PORT)?.unwrap_or(DEFAULT_PORT);
        let max_retries = parse_var(&lookup, ENV_MAX_RETRIES)?.unwrap_or(defaults.max_retries);
        let backoff = parse_var::<u64, _>(&lookup, ENV_RETRY_BACKOFF_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff);
        let busy_timeout = parse_var::<u64, _>(&lookup, ENV_BUSY_TIMEOUT_MS)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BUSY_TIMEOUT);
        let merge_strategy = match lookup(ENV_MERGE_STRATEGY) {
            Some(value) => value
                .parse::<MergeStrategy>()
                .map_err(|e: String| anyhow!("{}: {}", ENV_MERGE_STRATEGY, e))?,
            None => MergeStrategy::default(),
        };

        Ok(Self {
            db_path,
            port,
            busy_timeout,
            retry: RetryPolicy {
                max_retries,
                backoff,
            },
            merge_strategy,
        })
    }

    /// Open the configured database with the configured lock timeout.
    pub fn open_database(&self) -> Result<Database> {
        let db = Database::open_at(&self.db_path)
            .with_context(|| format!("opening {}", self.db_path.display()))?;
        db.set_busy_timeout(self.busy_timeout)?;
        Ok(db)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.merge_strategy, self.retry)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{}: invalid value '{}': {}", key, raw, e)),
        None => Ok(None),
    }
}
