//! Batch processing of collected records
//!
//! Raw records tagged with an entity type are routed to one windowed batcher
//! per type, checked against their tag, normalized into [`Act`], [`Venue`],
//! [`Event`] and [`EventAct`] entities and upserted in one session per batch.
//!
//! # Architecture
//!
//! ```text
//!              ┌─▶ Batcher(act) ───┐
//! RawRecord ───┼─▶ Batcher(venue) ─┼─▶ Transformer ──▶ SessionFactory::scope
//!  (by tag)    ├─▶ Batcher(...) ───┤   (validate,        (upserts)
//!              └─▶ Batcher(other) ─┘    normalize)           │
//!                 size / timer               │               │
//!                                            ▼               ▼
//!                               EventBus: StateCompletedEvent per stage
//! ```

pub mod batcher;
pub mod entities;
pub mod error;
pub mod events;
pub mod options;
pub mod pipeline;
pub mod transform;

pub use batcher::{Batch, Batcher, BatcherSummary, FlushTrigger};
pub use entities::{Act, EntityType, Event, EventAct, ProcessingState, Venue};
pub use error::{ProcessingError, ProcessingResult};
pub use events::{EventBus, StateCompletedEvent};
pub use options::ProcessingOptions;
pub use pipeline::{BatchReport, BatchTracker, PipelineStatsSnapshot, ProcessingPipeline};
pub use transform::{NormalizedBatch, Transformer, TypedPayload};
