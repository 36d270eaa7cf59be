//! Run configuration
//!
//! A [`DrainConfig`] is built once per run (defaults, then an optional TOML
//! file, then command-line overrides) and is immutable afterwards.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of nodes drained at the same time
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Default eviction grace period handed to every evicted pod
pub const DEFAULT_GRACE_PERIOD_SECONDS: u32 = 60;

/// Run-scoped drain parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrainConfig {
    /// Max number of nodes drained concurrently (>= 1)
    pub batch_size: usize,

    /// Max seconds a pod gets to terminate after eviction
    pub grace_period_seconds: u32,

    /// Label selector restricting which nodes are drained
    pub node_selector: Option<String>,

    /// How long one node's evictions may take, deletion wait included; 0 waits forever
    pub eviction_timeout_seconds: u64,

    /// Deadline for one node's cordon and drain
    pub task_timeout_seconds: Option<u64>,

    /// Also evict pods that are not managed by a controller
    pub force: bool,

    /// List the nodes that would be drained without touching them
    pub dry_run: bool,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            node_selector: None,
            eviction_timeout_seconds: 0,
            task_timeout_seconds: None,
            force: false,
            dry_run: false,
        }
    }
}

impl DrainConfig {
    /// Load a configuration file. Keys left out keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: DrainConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants every run relies on
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ValidationError(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.task_timeout_seconds == Some(0) {
            return Err(Error::ValidationError(
                "task_timeout_seconds must be positive when set".to_string(),
            ));
        }
        if let Some(selector) = &self.node_selector {
            if selector.trim().is_empty() {
                return Err(Error::ValidationError(
                    "node_selector must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Eviction wait budget; `None` means wait forever
    pub fn eviction_timeout(&self) -> Option<Duration> {
        match self.eviction_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_seconds.map(Duration::from_secs)
    }
}
