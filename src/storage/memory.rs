//! In-memory storage backend
//!
//! Useful for tests and for running the service without a database file.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Error, Result};

use super::{Change, Store};

/// In-memory implementation of [`Store`]
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across every kind
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, kind: &str, id: &str) -> Result<Option<String>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| Error::other("memory store lock poisoned"))?;
        Ok(rows.get(&(kind.to_string(), id.to_string())).cloned())
    }

    fn list(&self, kind: &str) -> Result<Vec<(String, String)>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| Error::other("memory store lock poisoned"))?;
        Ok(rows
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, id), body)| (id.clone(), body.clone()))
            .collect())
    }

    fn apply(&self, changes: &[Change]) -> Result<()> {
        // One write guard for the whole batch keeps the apply atomic for readers
        let mut rows = self
            .rows
            .write()
            .map_err(|_| Error::other("memory store lock poisoned"))?;

        for change in changes {
            match change {
                Change::Put { kind, id, body } => {
                    rows.insert((kind.to_string(), id.clone()), body.clone());
                }
                Change::Delete { kind, id } => {
                    rows.remove(&(kind.to_string(), id.clone()));
                }
            }
        }

        Ok(())
    }
}
