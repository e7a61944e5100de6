//! Repository pattern for entity access
//!
//! [`Repository`] is the generic CRUD + query contract; [`SessionRepository`]
//! is its implementation over a [`DataSession`], so every write joins the
//! session's unit of work. Reads never fail on absence: `get_by_id` returns
//! `None` and `query` returns an empty list.

use std::marker::PhantomData;

use uuid::Uuid;

use crate::error::{Error, Result};

use super::{Change, DataSession, Entity};

/// Generic persistence contract for one entity type
pub trait Repository<T: Entity> {
    /// Insert a new entity; fails with `Conflict` if the id already exists
    fn add(&mut self, entity: T) -> Result<()>;

    /// Replace an existing entity; fails with `NotFound` if it is absent
    fn update(&mut self, entity: T) -> Result<()>;

    /// Insert or replace
    fn upsert(&mut self, entity: T) -> Result<()>;

    /// Delete by id, returning whether anything was removed
    fn remove(&mut self, id: Uuid) -> Result<bool>;

    /// Fetch by id
    fn get_by_id(&self, id: Uuid) -> Result<Option<T>>;

    /// Every entity matching the predicate
    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> Result<Vec<T>>;

    /// First entity matching the predicate
    fn find_one(&self, predicate: &dyn Fn(&T) -> bool) -> Result<Option<T>> {
        Ok(self.query(predicate)?.into_iter().next())
    }

    /// Every entity of this type
    fn all(&self) -> Result<Vec<T>> {
        self.query(&|_| true)
    }

    /// Whether an entity with this id exists
    fn exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.get_by_id(id)?.is_some())
    }
}

/// Typed view over a [`DataSession`]
pub struct SessionRepository<'s, T: Entity> {
    session: &'s mut DataSession,
    _entity: PhantomData<T>,
}

impl<'s, T: Entity> SessionRepository<'s, T> {
    pub(crate) fn new(session: &'s mut DataSession) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    fn put(&mut self, entity: &T) -> Result<()> {
        let body = serde_json::to_string(entity)?;
        self.session.stage(Change::Put {
            kind: T::KIND,
            id: entity.id().to_string(),
            body,
        });
        Ok(())
    }
}

impl<T: Entity> Repository<T> for SessionRepository<'_, T> {
    fn add(&mut self, entity: T) -> Result<()> {
        if self.exists(entity.id())? {
            return Err(Error::conflict(T::KIND, entity.id().to_string()));
        }
        self.put(&entity)
    }

    fn update(&mut self, entity: T) -> Result<()> {
        if !self.exists(entity.id())? {
            return Err(Error::not_found(T::KIND, entity.id()));
        }
        self.put(&entity)
    }

    fn upsert(&mut self, entity: T) -> Result<()> {
        self.put(&entity)
    }

    fn remove(&mut self, id: Uuid) -> Result<bool> {
        if !self.exists(id)? {
            return Ok(false);
        }
        self.session.stage(Change::Delete {
            kind: T::KIND,
            id: id.to_string(),
        });
        Ok(true)
    }

    fn get_by_id(&self, id: Uuid) -> Result<Option<T>> {
        match self.session.read(T::KIND, &id.to_string())? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> Result<Vec<T>> {
        let mut matches = Vec::new();
        for body in self.session.read_all(T::KIND)? {
            let entity: T = serde_json::from_str(&body)?;
            if predicate(&entity) {
                matches.push(entity);
            }
        }
        Ok(matches)
    }
}
