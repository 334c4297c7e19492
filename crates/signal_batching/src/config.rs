//! Configuration for the batching service.
//!
//! Example:
//! ```ignore
//! let config = BatcherConfig::builder()
//!     .buffer(8)
//!     .retry(RetryPolicy::default())
//!     .start_state(IterationState::seed(1338))
//!     .build()?;
//! ```

use std::time::Duration;

use crate::error::{BatchError, Result};
use crate::materialize::RetryPolicy;
use crate::state::IterationState;

/// Configuration for a [`Batcher`](crate::service::Batcher).
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherConfig {
    /// Output channel capacity. Defaults to `2 * workers + 1`, which
    /// bounds in-flight work to roughly one pool of futures plus the
    /// buffered deliveries.
    pub buffer: Option<usize>,
    /// Backoff policy applied around every batch materialization.
    pub retry: RetryPolicy,
    /// How long `stop` waits for the manager to acknowledge shutdown
    /// before reporting `Status::Unknown`.
    pub stop_timeout: Duration,
    /// When set, the service starts from this state on construction.
    pub start_state: Option<IterationState>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            buffer: None,
            retry: RetryPolicy::default(),
            stop_timeout: Duration::from_secs(60),
            start_state: None,
        }
    }
}

impl BatcherConfig {
    pub fn builder() -> BatcherConfigBuilder {
        BatcherConfigBuilder::default()
    }

    /// Effective output capacity for a pool of `workers`.
    pub fn buffer_for(&self, workers: usize) -> usize {
        self.buffer.unwrap_or(2 * workers + 1).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer == Some(0) {
            return Err(BatchError::invalid(
                "buffer must be > 0; a zero-capacity output channel deadlocks the loop",
            ));
        }
        if self.stop_timeout.is_zero() {
            return Err(BatchError::invalid("stop_timeout must be > 0"));
        }
        Ok(())
    }
}

/// Builder for [`BatcherConfig`] with method chaining.
#[derive(Debug, Default)]
pub struct BatcherConfigBuilder {
    config: BatcherConfig,
}

impl BatcherConfigBuilder {
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.config.buffer = Some(buffer);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Start the service from this state as soon as it is constructed.
    pub fn start_state(mut self, state: IterationState) -> Self {
        self.config.start_state = Some(state);
        self
    }

    pub fn build(self) -> Result<BatcherConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
