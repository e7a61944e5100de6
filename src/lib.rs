//! punchup - Comedy event aggregator
//!
//! Scheduled collection of performer pages, batch processing of the
//! collected records into events, venues and acts, and a public query API.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scheduler`] - Cron schedules, idempotent ticks and job dispatch
//! - [`collection`] - Worker pool of isolated scraper contexts
//! - [`processing`] - Windowed batching, validation, normalization and persistence
//! - [`storage`] - Repositories and unit-of-work sessions over SQLite or memory
//! - [`api`] - Event queries and the HTTP router
//! - [`models`] - Core data structures and types
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry with backoff and text helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use punchup::collection::{CollectionDispatcher, DispatcherSettings, HttpScraperFactory};
//! use punchup::scheduler::{SchedulingOptions, SchedulingService};
//! use punchup::storage::SessionFactory;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sessions = SessionFactory::sqlite("data/punchup.db")?;
//!     let dispatcher = Arc::new(CollectionDispatcher::start(
//!         DispatcherSettings::default(),
//!         sessions.clone(),
//!         Arc::new(HttpScraperFactory::new(5)),
//!         None,
//!         CancellationToken::new(),
//!     ));
//!     let service = SchedulingService::new(sessions, dispatcher, SchedulingOptions::default());
//!     let report = service.tick(chrono::Utc::now(), &CancellationToken::new()).await?;
//!     println!("{} jobs created", report.jobs_created.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod collection;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod processing;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{EventQueries, StoreEventQueries};
    pub use crate::collection::{CollectionDispatcher, Scraper, ScraperFactory};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, PunchupErrorTrait, Result};
    pub use crate::models::{Execution, Job, JobStatus, RawRecord, Schedule, Sku, Source};
    pub use crate::processing::{ProcessingOptions, ProcessingPipeline};
    pub use crate::scheduler::{JobDispatcher, SchedulingService};
    pub use crate::storage::{DataSession, Repository, SessionFactory};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
