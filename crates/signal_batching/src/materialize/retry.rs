use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Exponential-backoff policy for transient materialization failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error; used where the caller handles recovery.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Runs `op`, retrying only transient errors up to the policy's limit.
///
/// `ChannelClosed` aborts immediately: it is the cancellation signal, and
/// retrying a cancelled operation only delays teardown. All other errors
/// propagate on first occurrence.
pub fn retry_transient<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut retry = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_closed() => return Err(e),
            Err(e) if e.is_transient() && retry < policy.max_retries => {
                retry += 1;
                debug!(retry, error = %e, "retrying transient materialization failure");
                thread::sleep(policy.delay_for(retry));
            }
            Err(e) => return Err(e),
        }
    }
}
