//! Batching options
//!
//! Every field is required: the processing section has no defaults and must
//! come from configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{ProcessingError, ProcessingResult};

/// Batch windowing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Smallest batch a size-triggered flush produces
    pub min_batch_size: usize,

    /// A batch is flushed as soon as it reaches this size
    pub max_batch_size: usize,

    /// Seconds since the first unflushed record before a timer flush
    pub delay_interval_seconds: u64,
}

impl ProcessingOptions {
    pub fn new(min_batch_size: usize, max_batch_size: usize, delay_interval_seconds: u64) -> Self {
        Self {
            min_batch_size,
            max_batch_size,
            delay_interval_seconds,
        }
    }

    /// Check `1 <= min <= max` and a non-zero delay
    pub fn validate(&self) -> ProcessingResult<()> {
        if self.min_batch_size == 0 {
            return Err(ProcessingError::InvalidOptions(
                "min_batch_size must be at least 1".to_string(),
            ));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(ProcessingError::InvalidOptions(format!(
                "min_batch_size ({}) exceeds max_batch_size ({})",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.delay_interval_seconds == 0 {
            return Err(ProcessingError::InvalidOptions(
                "delay_interval_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_interval_seconds)
    }
}
