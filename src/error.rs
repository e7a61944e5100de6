//! Unified error handling for the punchup crate
//!
//! Domain modules keep their own error enums ([`SchedulerError`],
//! [`CollectionError`], [`ProcessingError`]); this module folds them into a
//! single [`Error`] used across module boundaries, together with the
//! validation/conflict/not-found errors every command surface shares.
//!
//! # Architecture
//!
//! - [`PunchupErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use punchup::error::{Error, PunchupErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::collection::error::CollectionError;
pub use crate::processing::error::ProcessingError;
pub use crate::scheduler::error::SchedulerError;

/// Common trait for all punchup error types
pub trait PunchupErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed command input
    Validation,
    /// Uniqueness violation on create
    Conflict,
    /// Referenced entity does not exist
    NotFound,
    /// Scheduling and dispatch errors
    Scheduler,
    /// Scraper and network errors
    Collection,
    /// Batch processing errors
    Processing,
    /// Storage and I/O errors
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short stable label, used for metrics and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Scheduler => "scheduler",
            Self::Collection => "collection",
            Self::Processing => "processing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the punchup crate
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed command input, rejected before any persistence
    #[error("Validation error on '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// Uniqueness violation on create
    #[error("{kind} '{name}' already exists")]
    Conflict { kind: &'static str, name: String },

    /// Entity lookup failed where presence is required
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Scheduling and dispatch errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Scraper and network errors
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    /// Batch processing errors
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Operation stopped by a cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PunchupErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::Conflict { .. } | Self::NotFound { .. } => false,
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Collection(e) => e.is_recoverable(),
            Self::Processing(e) => e.is_recoverable(),
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Cancelled => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Collection(_) | Self::Http(_) => ErrorCategory::Collection,
            Self::Processing(_) => ErrorCategory::Processing,
            Self::Database(_) | Self::Io(_) | Self::Json(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Cancelled | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_category() {
        let err = Error::validation("cron_expression", "bad syntax");
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = Error::conflict("source", "Comedy Cellar");
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(err.to_string(), "source 'Comedy Cellar' already exists");
    }

    #[test]
    fn test_is_recoverable() {
        let timeout: Error = CollectionError::Timeout {
            url: "https://example.com".to_string(),
        }
        .into();
        assert!(timeout.is_recoverable());

        let invalid: Error = ProcessingError::InvalidEntityType {
            batch_id: Uuid::nil(),
            entity_type: "podcast".to_string(),
        }
        .into();
        assert!(!invalid.is_recoverable());
        assert_eq!(invalid.category(), ErrorCategory::Processing);
    }

    #[test]
    fn test_error_conversion() {
        let scheduler_err = SchedulerError::DispatcherClosed;
        let unified: Error = scheduler_err.into();
        assert!(matches!(unified, Error::Scheduler(_)));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("processing section missing");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(ErrorCategory::NotFound.as_str(), "not_found");
        assert_eq!(ErrorCategory::Storage.as_str(), "storage");
    }
}
