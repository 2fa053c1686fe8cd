use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checks::CheckTime;
use crate::error::{Error, Result};

pub const LOCK_TIMEOUT_MILLIS: u64 = 1000;
pub const PERIODIC_COMMIT_MILLIS: u64 = 500;
pub const PERIODIC_COMMIT_BYTES: usize = 100_000;

/// Tunables shared by every back end. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// When pending checks resolve; `None` picks the back end's default.
    pub check_time: Option<CheckTime>,
    pub lock_timeout_ms: u64,
    pub periodic_commit_after_ms: u64,
    pub periodic_commit_after_bytes: usize,
    pub max_retries: u32,
    /// Embedded back end: commits between checkpoints of the data file.
    pub checkpoint_interval: u32,
    /// Loopback network transport: artificial latency per request.
    pub network_latency_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            check_time: None,
            lock_timeout_ms: LOCK_TIMEOUT_MILLIS,
            periodic_commit_after_ms: PERIODIC_COMMIT_MILLIS,
            periodic_commit_after_bytes: PERIODIC_COMMIT_BYTES,
            max_retries: 10,
            checkpoint_interval: 1,
            network_latency_ms: 0,
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config("lock_timeout_ms must be positive".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint_interval must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn check_time_or(&self, backend_default: CheckTime) -> CheckTime {
        self.check_time.unwrap_or(backend_default)
    }

    pub fn with_check_time(mut self, check_time: CheckTime) -> Self {
        self.check_time = Some(check_time);
        self
    }

    pub fn with_lock_timeout_ms(mut self, millis: u64) -> Self {
        self.lock_timeout_ms = millis;
        self
    }
}
