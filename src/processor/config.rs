use std::time::Duration;

use crate::error::{BatchError, Result};

/// Configuration for the batch processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Maximum concurrent dispatches (worker pool size)
    pub max_concurrency: usize,
    /// Deadline for a single attempt; every retry gets a fresh one
    pub timeout: Duration,
    /// Extra attempts after the first one fails
    pub retry_count: u32,
    /// Pause between a failed attempt and the next
    pub retry_delay: Duration,
    /// Record invalid input entries as skipped instead of aborting
    pub skip_invalid: bool,
    /// Abort before dispatch when the input has invalid entries
    pub validate_input: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            timeout: Duration::from_secs(60),
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            skip_invalid: false,
            validate_input: true,
        }
    }
}

impl ProcessorConfig {
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_skip_invalid(mut self, skip_invalid: bool) -> Self {
        self.skip_invalid = skip_invalid;
        self
    }

    pub fn with_validate_input(mut self, validate_input: bool) -> Self {
        self.validate_input = validate_input;
        self
    }

    /// Attempts made per item before giving up
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(BatchError::InvalidConfig("max_concurrency must be > 0".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(BatchError::InvalidConfig("timeout must be > 0".to_string()));
        }
        Ok(())
    }
}
