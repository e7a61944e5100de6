//! Record classification and normalization
//!
//! `validate` turns tagged raw records into typed payloads, `normalize`
//! maps payloads to domain entities, deduplicated by id within the batch.
//! Any record whose tag is unknown, or whose payload does not fit its tag,
//! fails the whole batch with `InvalidEntityType`.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::RawRecord;
use crate::storage::Entity;

use super::entities::{
    Act, ActPayload, EntityType, Event, EventAct, EventActPayload, EventPayload, Venue,
    VenuePayload,
};
use super::error::{ProcessingError, ProcessingResult};

/// A raw record after classification
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    Act(ActPayload),
    Venue(VenuePayload),
    Event(EventPayload),
    EventAct(EventActPayload),
}

impl TypedPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Act(_) => EntityType::Act,
            Self::Venue(_) => EntityType::Venue,
            Self::Event(_) => EntityType::Event,
            Self::EventAct(_) => EntityType::EventAct,
        }
    }
}

/// Domain entities produced from one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub acts: Vec<Act>,
    pub venues: Vec<Venue>,
    pub events: Vec<Event>,
    pub event_acts: Vec<EventAct>,
}

impl NormalizedBatch {
    pub fn entity_count(&self) -> usize {
        self.acts.len() + self.venues.len() + self.events.len() + self.event_acts.len()
    }
}

/// Stateless batch transformer
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer;

impl Transformer {
    /// Classify every record of a batch
    pub fn validate(&self, batch_id: Uuid, records: &[RawRecord]) -> ProcessingResult<Vec<TypedPayload>> {
        records
            .iter()
            .map(|record| classify(batch_id, record))
            .collect()
    }

    /// Map payloads to entities, keeping the first occurrence of each id
    pub fn normalize(&self, payloads: Vec<TypedPayload>) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut seen: HashSet<Uuid> = HashSet::new();

        for payload in payloads {
            match payload {
                TypedPayload::Act(p) => push_unique(&mut batch.acts, &mut seen, Act::from_payload(p)),
                TypedPayload::Venue(p) => {
                    push_unique(&mut batch.venues, &mut seen, Venue::from_payload(p))
                }
                TypedPayload::Event(p) => {
                    push_unique(&mut batch.events, &mut seen, Event::from_payload(p))
                }
                TypedPayload::EventAct(p) => {
                    push_unique(&mut batch.event_acts, &mut seen, EventAct::from_payload(p))
                }
            }
        }

        batch
    }
}

fn classify(batch_id: Uuid, record: &RawRecord) -> ProcessingResult<TypedPayload> {
    let invalid = || ProcessingError::invalid_entity_type(batch_id, record.entity_type.clone());

    let entity_type = EntityType::parse(&record.entity_type).ok_or_else(invalid)?;
    let payload = record.payload.clone();

    let typed = match entity_type {
        EntityType::Act => serde_json::from_value(payload).map(TypedPayload::Act),
        EntityType::Venue => serde_json::from_value(payload).map(TypedPayload::Venue),
        EntityType::Event => serde_json::from_value(payload).map(TypedPayload::Event),
        EntityType::EventAct => serde_json::from_value(payload).map(TypedPayload::EventAct),
    };

    typed.map_err(|e| {
        tracing::warn!(
            batch_id = %batch_id,
            record_id = %record.id,
            entity_type = %record.entity_type,
            error = %e,
            "Payload does not match its entity type"
        );
        invalid()
    })
}

fn push_unique<T: Entity>(items: &mut Vec<T>, seen: &mut HashSet<Uuid>, entity: T) {
    if seen.insert(entity.id()) {
        items.push(entity);
    }
}
