//! Error types for the collection module

use thiserror::Error;

/// Result type for collection operations
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Scraper and network errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    /// Request failed before a response arrived
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Navigation exceeded the configured timeout
    #[error("Navigation to {url} timed out")]
    Timeout { url: String },

    /// Non-success HTTP status
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    /// Target is not an absolute http(s) URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Page body could not be read or interpreted
    #[error("Failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },

    /// A scraper context could not be created
    #[error("Failed to create scraper context: {0}")]
    ContextCreation(String),

    /// The scraper was used after `close`
    #[error("Scraper context already closed")]
    ContextClosed,

    /// Job has nothing to collect
    #[error("No sitemap URLs to collect for job")]
    NoTargets,

    /// The scraper panicked mid-run
    #[error("Scraper crashed: {0}")]
    Crashed(String),

    /// Run was cancelled
    #[error("Collection cancelled")]
    Cancelled,
}

impl CollectionError {
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same URL can help
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Navigation { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_recoverability() {
        let url = "https://punchup.live".to_string();
        assert!(CollectionError::Status { url: url.clone(), status: 503 }.is_recoverable());
        assert!(CollectionError::Status { url: url.clone(), status: 429 }.is_recoverable());
        assert!(!CollectionError::Status { url, status: 404 }.is_recoverable());
        assert!(!CollectionError::ContextClosed.is_recoverable());
        assert!(!CollectionError::Cancelled.is_recoverable());
    }
}
