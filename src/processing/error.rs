//! Error types for the processing module

use thiserror::Error;
use uuid::Uuid;

use super::entities::ProcessingState;

/// Result type for processing operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Batch processing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// A record's tag is unknown or its payload does not match the tagged kind
    #[error("Batch {batch_id}: invalid entity type '{entity_type}'")]
    InvalidEntityType { batch_id: Uuid, entity_type: String },

    /// A batch tried to move backwards (or repeat) a stage
    #[error("Batch {batch_id}: cannot move from {from} to {to}")]
    StateRegression {
        batch_id: Uuid,
        from: ProcessingState,
        to: ProcessingState,
    },

    /// Invalid batching options
    #[error("Invalid processing options: {0}")]
    InvalidOptions(String),

    /// Persisting a batch failed
    #[error("Batch {batch_id}: persistence failed: {reason}")]
    PersistenceFailed { batch_id: Uuid, reason: String },

    /// The pipeline was cancelled before the batch finished
    #[error("Processing cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn invalid_entity_type(batch_id: Uuid, entity_type: impl Into<String>) -> Self {
        Self::InvalidEntityType {
            batch_id,
            entity_type: entity_type.into(),
        }
    }

    /// Batch id the error belongs to, when there is one
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            Self::InvalidEntityType { batch_id, .. }
            | Self::StateRegression { batch_id, .. }
            | Self::PersistenceFailed { batch_id, .. } => Some(*batch_id),
            Self::InvalidOptions(_) | Self::Cancelled => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PersistenceFailed { .. })
    }
}
