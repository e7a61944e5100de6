//! Data collection
//!
//! Executes dispatched jobs: a worker pool of isolated scraper contexts
//! collects every sitemap URL of a job, records the execution, and forwards
//! the raw records to processing.
//!
//! # Components
//!
//! - [`dispatcher`] - `CollectionDispatcher`: bounded queue and worker pool
//! - [`scraper`] - `Scraper`/`ScraperFactory` seam and the HTTP implementation
//! - [`page`] - Performer page parsing
//! - [`options`] - Global and per-context settings

pub mod dispatcher;
pub mod error;
pub mod options;
pub mod page;
pub mod scraper;

pub use dispatcher::{
    CollectionDispatcher, DispatcherSettings, DispatcherStatsSnapshot, ScraperMonitor,
};
pub use error::{CollectionError, CollectionResult};
pub use options::{BrowserContextOptions, CollectionOptions, DEFAULT_USER_AGENT};
pub use page::parse_performer_page;
pub use scraper::{HttpScraper, HttpScraperFactory, Scraper, ScraperFactory};
