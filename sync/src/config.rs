//! Configuration management for the sync runtime.

use shelf_engine::{OwnerId, DEFAULT_MAX_RECENT_ERRORS, DEFAULT_SOFT_LIMIT};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Owner whose library is synchronized
    pub owner_id: OwnerId,
    /// Directory holding the local entity documents and the sync snapshot
    pub data_dir: PathBuf,
    /// Base URL of the canonical service
    pub remote_url: String,
    /// Bearer token sent to the canonical service
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    /// When set, the binary re-triggers sync on this interval
    pub sync_interval: Option<Duration>,
    pub max_recent_errors: usize,
    pub queue_soft_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let owner_id = lookup("SHELF_OWNER_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SHELF_OWNER_ID"))?;

        let remote_url = lookup("SHELF_REMOTE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SHELF_REMOTE_URL"))?;

        let data_dir = lookup("SHELF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./shelf-data"));

        let auth_token = lookup("SHELF_AUTH_TOKEN").filter(|v| !v.is_empty());

        let request_timeout = Duration::from_secs(parse_or(
            &lookup,
            "SHELF_REQUEST_TIMEOUT_SECS",
            15u64,
        )?);

        let sync_interval = match lookup("SHELF_SYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid("SHELF_SYNC_INTERVAL_SECS"))?;
                if secs == 0 {
                    return Err(ConfigError::Invalid("SHELF_SYNC_INTERVAL_SECS"));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let max_recent_errors =
            parse_or(&lookup, "SHELF_MAX_RECENT_ERRORS", DEFAULT_MAX_RECENT_ERRORS)?;
        let queue_soft_limit = parse_or(&lookup, "SHELF_QUEUE_SOFT_LIMIT", DEFAULT_SOFT_LIMIT)?;

        Ok(Self {
            owner_id,
            data_dir,
            remote_url: remote_url.trim_end_matches('/').to_string(),
            auth_token,
            request_timeout,
            sync_interval,
            max_recent_errors,
            queue_soft_limit,
        })
    }

    /// The subset the orchestrator needs.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            owner_id: self.owner_id.clone(),
            max_recent_errors: self.max_recent_errors,
            queue_soft_limit: self.queue_soft_limit,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("sync-state.json")
    }

    pub fn entities_dir(&self) -> PathBuf {
        self.data_dir.join("entities")
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub owner_id: OwnerId,
    pub max_recent_errors: usize,
    pub queue_soft_limit: usize,
}

impl SyncConfig {
    pub fn new(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            max_recent_errors: DEFAULT_MAX_RECENT_ERRORS,
            queue_soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

/// Configuration errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {0} value")]
    Invalid(&'static str),

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}
