//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use vaultkeeper_common::{Error, Result};

/// Upper bound on the default worker count.
const DEFAULT_WORKER_CAP: usize = 4;

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    60
}

/// Tunables for a vault session.
///
/// Missing keys in a serialized config take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle seconds before the session locks itself. 0 disables auto-lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Consecutive failed unlocks before a lockout. 0 disables throttling.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    /// Lockout length in seconds.
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    /// Maximum concurrent key derivations. Defaults to the number of
    /// cores, capped at 4.
    #[serde(default)]
    pub worker_limit: Option<usize>,
}

impl SessionConfig {
    /// Idle timeout, or `None` when auto-lock is disabled.
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_secs > 0).then(|| Duration::from_secs(self.lock_timeout_secs))
    }

    /// Lockout length after too many failed unlocks.
    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    /// Effective worker count, always at least 1.
    pub fn workers(&self) -> usize {
        match self.worker_limit {
            Some(limit) => limit.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(DEFAULT_WORKER_CAP),
        }
    }

    /// Serialize config to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
            max_failed_attempts: default_max_failed_attempts(),
            lockout_secs: default_lockout_secs(),
            worker_limit: None,
        }
    }
}
