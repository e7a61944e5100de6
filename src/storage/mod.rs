//! Persistence port: entities, repositories and unit-of-work sessions
//!
//! Business logic talks to [`Repository`] views obtained from a
//! [`DataSession`]; the session buffers every change and hands them to a
//! [`Store`] backend in one atomic [`Store::apply`] call on commit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Scheduler / Collection / Processing / API          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │     SessionFactory ──▶ DataSession ──▶ Repository<T>        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ commit: Store::apply(changes)
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!      ┌─────────────────┐           ┌─────────────────┐
//!      │   SqliteStore   │           │   MemoryStore   │
//!      └─────────────────┘           └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use punchup::storage::{Repository, SessionFactory};
//! use punchup::models::Source;
//!
//! let sessions = SessionFactory::sqlite("data/punchup.db")?;
//! let mut session = sessions.begin();
//! session.repository::<Source>().add(source)?;
//! session.commit()?;
//! ```

pub mod memory;
pub mod repository;
pub mod session;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

pub use memory::MemoryStore;
pub use repository::{Repository, SessionRepository};
pub use session::{DataSession, SessionFactory};
pub use sqlite::SqliteStore;

/// A persisted record type
///
/// `KIND` namespaces the entity inside a store, so one generic storage port
/// serves every entity without runtime type inspection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable storage tag for this entity type
    const KIND: &'static str;

    /// Primary key
    fn id(&self) -> Uuid;
}

/// A single staged modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Insert or replace the serialized body for `(kind, id)`
    Put {
        kind: &'static str,
        id: String,
        body: String,
    },
    /// Delete `(kind, id)` if present
    Delete { kind: &'static str, id: String },
}

impl Change {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { kind, .. } | Self::Delete { kind, .. } => kind,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Put { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Storage backend behind the session abstraction
pub trait Store: Send + Sync {
    /// Read one serialized entity
    fn get(&self, kind: &str, id: &str) -> Result<Option<String>>;

    /// Read every serialized entity of a kind as `(id, body)` pairs
    fn list(&self, kind: &str) -> Result<Vec<(String, String)>>;

    /// Apply all changes atomically: either every change lands or none does
    fn apply(&self, changes: &[Change]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_accessors() {
        let put = Change::Put {
            kind: "source",
            id: "1".to_string(),
            body: "{}".to_string(),
        };
        assert_eq!(put.kind(), "source");
        assert_eq!(put.id(), "1");

        let delete = Change::Delete {
            kind: "job",
            id: "2".to_string(),
        };
        assert_eq!(delete.kind(), "job");
        assert_eq!(delete.id(), "2");
    }
}
