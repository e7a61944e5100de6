//! Error types for the scheduler module

use std::fmt;
use uuid::Uuid;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// Cron expression could not be parsed
    InvalidCron {
        expression: String,
        reason: String,
    },

    /// A schedule could not be evaluated during a tick
    EvaluationFailed {
        schedule_id: Uuid,
        reason: String,
    },

    /// The collection dispatcher rejected the job
    DispatchRejected {
        job_id: Uuid,
        reason: String,
    },

    /// Dispatch retries were exhausted
    DispatchFailed {
        job_id: Uuid,
        attempts: u32,
        reason: String,
    },

    /// Dispatch retries stopped because the tick was cancelled
    DispatchCancelled {
        job_id: Uuid,
    },

    /// The job is already queued or running
    JobAlreadyActive {
        job_id: Uuid,
    },

    /// The dispatcher queue is closed
    DispatcherClosed,

    /// Loop configuration error
    TriggerConfigError {
        field: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCron { expression, reason } => {
                write!(f, "Invalid cron expression '{}': {}", expression, reason)
            }
            Self::EvaluationFailed {
                schedule_id,
                reason,
            } => {
                write!(f, "Failed to evaluate schedule {}: {}", schedule_id, reason)
            }
            Self::DispatchRejected { job_id, reason } => {
                write!(f, "Dispatch of job {} rejected: {}", job_id, reason)
            }
            Self::DispatchFailed {
                job_id,
                attempts,
                reason,
            } => {
                write!(
                    f,
                    "Dispatch of job {} failed after {} attempts: {}",
                    job_id, attempts, reason
                )
            }
            Self::DispatchCancelled { job_id } => {
                write!(f, "Dispatch of job {} cancelled, job left pending", job_id)
            }
            Self::JobAlreadyActive { job_id } => {
                write!(f, "Job {} is already queued or running", job_id)
            }
            Self::DispatcherClosed => {
                write!(f, "Collection dispatcher is not accepting jobs")
            }
            Self::TriggerConfigError { field, reason } => {
                write!(f, "Trigger config error in '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid cron error
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation_failed(schedule_id: Uuid, reason: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            schedule_id,
            reason: reason.into(),
        }
    }

    /// Create a trigger config error
    pub fn trigger_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TriggerConfigError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DispatchRejected { .. } | Self::DispatcherClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::invalid_cron("* *", "too few fields");
        assert_eq!(
            err.to_string(),
            "Invalid cron expression '* *': too few fields"
        );

        let job_id = Uuid::nil();
        let err = SchedulerError::DispatchFailed {
            job_id,
            attempts: 3,
            reason: "queue closed".to_string(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SchedulerError::DispatcherClosed.is_recoverable());
        assert!(!SchedulerError::JobAlreadyActive { job_id: Uuid::nil() }.is_recoverable());
        assert!(!SchedulerError::invalid_cron("x", "bad").is_recoverable());
    }
}
