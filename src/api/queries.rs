//! Read-side queries over processed entities

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::processing::{Act, Event, EventAct, Venue};
use crate::storage::{Repository, SessionFactory};

/// Public lookups over events, venues and acts
#[async_trait]
pub trait EventQueries: Send + Sync {
    /// Event by its slug; absence is `None`, never an error
    async fn get_event_by_slug(&self, slug: &str) -> Result<Option<Event>>;

    /// Acts appearing at an event, ordered by name
    async fn acts_for_event(&self, event_id: Uuid) -> Result<Vec<Act>>;

    async fn venue(&self, id: Uuid) -> Result<Option<Venue>>;
}

/// [`EventQueries`] over the entity store
#[derive(Clone)]
pub struct StoreEventQueries {
    sessions: SessionFactory,
}

impl StoreEventQueries {
    pub fn new(sessions: SessionFactory) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl EventQueries for StoreEventQueries {
    async fn get_event_by_slug(&self, slug: &str) -> Result<Option<Event>> {
        let slug = slug.trim().to_lowercase();
        if slug.is_empty() {
            return Ok(None);
        }
        let mut session = self.sessions.begin();
        session.repository::<Event>().find_one(&|e| e.slug == slug)
    }

    async fn acts_for_event(&self, event_id: Uuid) -> Result<Vec<Act>> {
        let mut session = self.sessions.begin();
        let links = session
            .repository::<EventAct>()
            .query(&|link| link.event_id == event_id)?;

        let repo = session.repository::<Act>();
        let mut acts = Vec::with_capacity(links.len());
        for link in links {
            if let Some(act) = repo.get_by_id(link.act_id)? {
                acts.push(act);
            }
        }
        acts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(acts)
    }

    async fn venue(&self, id: Uuid) -> Result<Option<Venue>> {
        let mut session = self.sessions.begin();
        session.repository::<Venue>().get_by_id(id)
    }
}
