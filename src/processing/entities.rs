//! Normalized domain entities and the tagged payloads they are built from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storage::Entity;
use crate::utils::slugify;

/// Namespace for deterministic entity ids
pub const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x3b9e_71c4_0d5a_4f62_8e13_a6c0_95f2_d84e);

/// Deterministic id for a normalized entity: same kind and slug, same id
pub fn entity_id(kind: &str, slug: &str) -> Uuid {
    Uuid::new_v5(&ENTITY_NAMESPACE, format!("{kind}:{slug}").as_bytes())
}

/// Slug identifying one show: venue plus start time to the minute
pub fn event_slug(venue: &str, start_time: DateTime<Utc>) -> String {
    slugify(&format!("{} {}", venue, start_time.format("%Y-%m-%d %H%M")))
}

// ============================================================================
// Classification
// ============================================================================

/// Known record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Act,
    Venue,
    Event,
    EventAct,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Act => "act",
            Self::Venue => "venue",
            Self::Event => "event",
            Self::EventAct => "event_act",
        }
    }

    /// Parse a record tag, ignoring case and `-`/`_` separators
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "act" => Some(Self::Act),
            "venue" => Some(Self::Venue),
            "event" => Some(Self::Event),
            "eventact" => Some(Self::EventAct),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of the transformation pipeline, strictly increasing per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Raw,
    Validated,
    Normalized,
    Persisted,
}

impl ProcessingState {
    pub const ALL: [ProcessingState; 4] = [
        Self::Raw,
        Self::Validated,
        Self::Normalized,
        Self::Persisted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Validated => "validated",
            Self::Normalized => "normalized",
            Self::Persisted => "persisted",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// `act` record body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActPayload {
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

/// `venue` record body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VenuePayload {
    pub name: String,
    pub location: String,
}

/// `event` record body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventPayload {
    pub venue: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub ticket_link: Option<String>,
}

/// `event_act` record body: which act plays which show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventActPayload {
    pub act: String,
    pub venue: String,
    pub start_time: DateTime<Utc>,
}

// ============================================================================
// Entities
// ============================================================================

/// A performer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Act {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
}

impl Act {
    pub fn from_payload(payload: ActPayload) -> Self {
        let slug = slugify(&payload.name);
        Self {
            id: entity_id(Self::KIND, &slug),
            slug,
            name: payload.name.trim().to_string(),
            bio: payload.bio.filter(|b| !b.trim().is_empty()),
        }
    }
}

impl Entity for Act {
    const KIND: &'static str = "act";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A room where shows happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub location: String,
}

impl Venue {
    pub fn from_payload(payload: VenuePayload) -> Self {
        let slug = slugify(&payload.name);
        Self {
            id: entity_id(Self::KIND, &slug),
            slug,
            name: payload.name.trim().to_string(),
            location: payload.location.trim().to_string(),
        }
    }
}

impl Entity for Venue {
    const KIND: &'static str = "venue";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A show at a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub slug: String,
    pub venue_id: Uuid,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub location: String,
    pub ticket_link: Option<String>,
}

impl Event {
    pub fn from_payload(payload: EventPayload) -> Self {
        let slug = event_slug(&payload.venue, payload.start_time);
        let venue_slug = slugify(&payload.venue);
        Self {
            id: entity_id(Self::KIND, &slug),
            title: format!(
                "{} - {}",
                payload.venue.trim(),
                payload.start_time.format("%Y-%m-%d %H:%M")
            ),
            slug,
            venue_id: entity_id(Venue::KIND, &venue_slug),
            start_time: payload.start_time,
            location: payload.location.trim().to_string(),
            ticket_link: payload.ticket_link.filter(|l| !l.trim().is_empty()),
        }
    }
}

impl Entity for Event {
    const KIND: &'static str = "event";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// An act's appearance at an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAct {
    pub id: Uuid,
    pub event_id: Uuid,
    pub act_id: Uuid,
}

impl EventAct {
    pub fn from_payload(payload: EventActPayload) -> Self {
        let event_slug = event_slug(&payload.venue, payload.start_time);
        let act_slug = slugify(&payload.act);
        Self {
            id: entity_id(Self::KIND, &format!("{event_slug}/{act_slug}")),
            event_id: entity_id(Event::KIND, &event_slug),
            act_id: entity_id(Act::KIND, &act_slug),
        }
    }
}

impl Entity for EventAct {
    const KIND: &'static str = "event_act";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("act"), Some(EntityType::Act));
        assert_eq!(EntityType::parse("Venue"), Some(EntityType::Venue));
        assert_eq!(EntityType::parse("event-act"), Some(EntityType::EventAct));
        assert_eq!(EntityType::parse("EventAct"), Some(EntityType::EventAct));
        assert_eq!(EntityType::parse("podcast"), None);
        assert_eq!(EntityType::parse(""), None);
    }

    #[test]
    fn test_processing_state_order() {
        assert!(ProcessingState::Raw < ProcessingState::Validated);
        assert!(ProcessingState::Validated < ProcessingState::Normalized);
        assert!(ProcessingState::Normalized < ProcessingState::Persisted);
    }

    #[test]
    fn test_payloads_reject_foreign_fields() {
        let venue_as_act = serde_json::json!({"name": "Comedy Cellar", "location": "NYC"});
        assert!(serde_json::from_value::<ActPayload>(venue_as_act).is_err());
    }

    #[test]
    fn test_ids_are_deterministic_across_batches() {
        let start = Utc.with_ymd_and_hms(2026, 11, 1, 20, 0, 0).unwrap();
        let event = Event::from_payload(EventPayload {
            venue: "Comedy Cellar".into(),
            location: "New York".into(),
            start_time: start,
            ticket_link: Some(String::new()),
        });
        let venue = Venue::from_payload(VenuePayload {
            name: "Comedy Cellar".into(),
            location: "New York".into(),
        });
        let link = EventAct::from_payload(EventActPayload {
            act: "Sam Morril".into(),
            venue: "Comedy Cellar".into(),
            start_time: start,
        });
        let act = Act::from_payload(ActPayload {
            name: "Sam Morril".into(),
            bio: None,
        });

        assert_eq!(event.venue_id, venue.id);
        assert_eq!(link.event_id, event.id);
        assert_eq!(link.act_id, act.id);
        assert_eq!(event.slug, "comedy-cellar-2026-11-01-2000");
        assert!(event.ticket_link.is_none());
    }
}
