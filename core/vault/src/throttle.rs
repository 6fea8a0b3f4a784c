//! Failed-unlock throttling.

use std::time::{Duration, Instant};

use vaultkeeper_common::{Error, Result};

/// Counts consecutive failed unlocks and enforces a lockout window.
#[derive(Debug, Clone)]
pub struct UnlockThrottle {
    max_attempts: u32,
    lockout: Duration,
    failed: u32,
    locked_until: Option<Instant>,
}

impl UnlockThrottle {
    /// Create a throttle. `max_attempts == 0` never locks out.
    pub fn new(max_attempts: u32, lockout: Duration) -> Self {
        Self {
            max_attempts,
            lockout,
            failed: 0,
            locked_until: None,
        }
    }

    /// Fail with `LockedOut` while a lockout is in force.
    pub fn check(&mut self, now: Instant) -> Result<()> {
        if let Some(until) = self.locked_until {
            if now < until {
                let remaining = until - now;
                let retry_after_secs =
                    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                return Err(Error::LockedOut { retry_after_secs });
            }
            self.locked_until = None;
        }
        Ok(())
    }

    /// Count a failed attempt. Returns true if this failure started a lockout.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        if self.max_attempts == 0 {
            return false;
        }
        self.failed += 1;
        if self.failed >= self.max_attempts {
            self.failed = 0;
            self.locked_until = Some(now + self.lockout);
            return true;
        }
        false
    }

    /// Reset the failure count.
    pub fn record_success(&mut self) {
        self.failed = 0;
    }

    /// Consecutive failures since the last success or lockout.
    pub fn failed_attempts(&self) -> u32 {
        self.failed
    }
}
