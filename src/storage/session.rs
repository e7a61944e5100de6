//! Unit-of-work sessions
//!
//! A [`DataSession`] is exclusively owned by one logical operation (a command,
//! a job run, a batch flush). Changes made through its repositories are
//! buffered; reads see the committed store overlaid with the session's own
//! pending changes. `commit` applies the buffer atomically, dropping the
//! session without committing discards it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

use super::repository::SessionRepository;
use super::{Change, Entity, MemoryStore, SqliteStore, Store};

/// Buffered unit of work over a [`Store`]
pub struct DataSession {
    store: Arc<dyn Store>,
    pending: Vec<Change>,
    overlay: HashMap<(&'static str, String), Option<String>>,
    finished: bool,
}

impl DataSession {
    fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            pending: Vec::new(),
            overlay: HashMap::new(),
            finished: false,
        }
    }

    /// Typed repository view over this session
    pub fn repository<T: Entity>(&mut self) -> SessionRepository<'_, T> {
        SessionRepository::new(self)
    }

    /// Whether any change is waiting for commit
    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply every staged change atomically
    pub fn commit(mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.store.apply(&self.pending)?;
            tracing::debug!(changes = self.pending.len(), "Session committed");
        }
        self.pending.clear();
        self.finished = true;
        Ok(())
    }

    /// Discard every staged change
    pub fn rollback(mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(changes = self.pending.len(), "Session rolled back");
        }
        self.pending.clear();
        self.overlay.clear();
        self.finished = true;
    }

    pub(crate) fn read(&self, kind: &'static str, id: &str) -> Result<Option<String>> {
        if let Some(staged) = self.overlay.get(&(kind, id.to_string())) {
            return Ok(staged.clone());
        }
        self.store.get(kind, id)
    }

    pub(crate) fn read_all(&self, kind: &'static str) -> Result<Vec<String>> {
        let mut rows: BTreeMap<String, String> = self.store.list(kind)?.into_iter().collect();

        for ((staged_kind, id), body) in &self.overlay {
            if *staged_kind != kind {
                continue;
            }
            match body {
                Some(body) => {
                    rows.insert(id.clone(), body.clone());
                }
                None => {
                    rows.remove(id);
                }
            }
        }

        Ok(rows.into_values().collect())
    }

    pub(crate) fn stage(&mut self, change: Change) {
        let key = (change.kind(), change.id().to_string());
        let value = match &change {
            Change::Put { body, .. } => Some(body.clone()),
            Change::Delete { .. } => None,
        };
        self.overlay.insert(key, value);
        self.pending.push(change);
    }
}

impl Drop for DataSession {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            tracing::debug!(
                changes = self.pending.len(),
                "Session dropped without commit, rolling back"
            );
        }
    }
}

/// Hands out sessions over a shared store
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn Store>,
}

impl SessionFactory {
    /// Wrap an existing store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Sessions over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Sessions over a SQLite database file
    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteStore::new(path)?)))
    }

    /// Open a new unit of work
    pub fn begin(&self) -> DataSession {
        DataSession::new(Arc::clone(&self.store))
    }

    /// Run `f` inside a session: commit on `Ok`, roll back on `Err`
    pub fn scope<R>(&self, f: impl FnOnce(&mut DataSession) -> Result<R>) -> Result<R> {
        let mut session = self.begin();
        match f(&mut session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(e) => {
                session.rollback();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory").finish_non_exhaustive()
    }
}
