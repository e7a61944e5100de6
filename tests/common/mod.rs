//! Common test utilities
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use punchup::collection::{
    BrowserContextOptions, CollectionError, CollectionResult, Scraper, ScraperFactory,
};
use punchup::models::{PunchupEvent, PunchupRecord, SkuType};
use punchup::scheduler::{
    CreateJobCommand, CreateSkuCommand, CreateSourceCommand, JobDispatcher, SchedulerError,
    SchedulerResult, SchedulingService, StartSpaCollectionJobCommand,
};

pub const SOURCE_NAME: &str = "Punchup";
pub const SKU_NAME: &str = "comics";

/// Register the default source and SKU
pub fn seed_catalog(service: &SchedulingService) -> (Uuid, Uuid) {
    let source_id = service
        .create_source(CreateSourceCommand {
            name: SOURCE_NAME.to_string(),
            website: "https://punchup.live".to_string(),
        })
        .unwrap();
    let sku_id = service
        .create_sku(CreateSkuCommand {
            source_id,
            name: SKU_NAME.to_string(),
            sku_type: SkuType::FullCrawl,
        })
        .unwrap();
    (source_id, sku_id)
}

/// Create a manual job over the given URLs
pub fn create_job(service: &SchedulingService, name: &str, urls: &[&str]) -> Uuid {
    service
        .create_job(CreateJobCommand {
            source: SOURCE_NAME.to_string(),
            sku: SKU_NAME.to_string(),
            name: name.to_string(),
            cron_expression: None,
            sitemaps: Some(urls.iter().map(|u| u.to_string()).collect()),
        })
        .unwrap()
}

/// One performer with one show
pub fn performer(name: &str, venue: &str, start_time: DateTime<Utc>) -> PunchupRecord {
    PunchupRecord {
        name: name.to_string(),
        bio: Some(format!("{name} is a comedian")),
        events: vec![PunchupEvent {
            start_time,
            location: "New York, NY".to_string(),
            venue: venue.to_string(),
            ticket_link: Some("https://tickets.example/show".to_string()),
        }],
    }
}

/// Performer page with a JSON-LD event block
pub fn performer_page(name: &str, venue: &str, start_date: &str) -> String {
    format!(
        r#"<html>
          <head>
            <meta name="description" content="{name} tours the country">
            <script type="application/ld+json">
              {{"@context": "https://schema.org", "@type": "ComedyEvent",
                "startDate": "{start_date}",
                "location": {{"@type": "Place", "name": "{venue}", "address": "New York, NY"}},
                "offers": {{"url": "https://tickets.example/{venue}"}}}}
            </script>
          </head>
          <body><h1>{name}</h1></body>
        </html>"#
    )
}

/// Poll until `condition` holds or five seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Fake scrapers
// ============================================================================

/// Scraper factory whose scrapers block until the gate opens
///
/// URLs containing `broken` fail with a non-recoverable 404.
pub struct GatedScraperFactory {
    gate: watch::Receiver<bool>,
    pub created: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl GatedScraperFactory {
    pub fn new(gate: watch::Receiver<bool>) -> Self {
        Self {
            gate,
            created: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            visited: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A factory whose gate is already open
    pub fn open() -> Self {
        let (tx, rx) = watch::channel(true);
        // Keep the sender alive for the life of the process
        std::mem::forget(tx);
        Self::new(rx)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScraperFactory for GatedScraperFactory {
    async fn create_scraper(
        &self,
        _options: &BrowserContextOptions,
    ) -> CollectionResult<Box<dyn Scraper>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GatedScraper {
            gate: self.gate.clone(),
            closed: Arc::clone(&self.closed),
            visited: Arc::clone(&self.visited),
        }))
    }
}

struct GatedScraper {
    gate: watch::Receiver<bool>,
    closed: Arc<AtomicUsize>,
    visited: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Scraper for GatedScraper {
    async fn collect(&self, url: &str) -> CollectionResult<Vec<PunchupRecord>> {
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| CollectionError::ContextClosed)?;

        self.visited.lock().unwrap().push(url.to_string());
        if url.contains("broken") {
            return Err(CollectionError::Status {
                url: url.to_string(),
                status: 404,
            });
        }

        let name = url.rsplit('/').next().unwrap_or("anonymous");
        let start = "2026-11-01T20:00:00Z".parse().unwrap();
        Ok(vec![performer(name, "Comedy Cellar", start)])
    }

    async fn close(&self) -> CollectionResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fake dispatchers
// ============================================================================

/// Records every command and never fails
#[derive(Default)]
pub struct RecordingDispatcher {
    pub commands: Mutex<Vec<StartSpaCollectionJobCommand>>,
}

impl RecordingDispatcher {
    pub fn job_ids(&self) -> HashSet<Uuid> {
        self.commands.lock().unwrap().iter().map(|c| c.job_id).collect()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, command: StartSpaCollectionJobCommand) -> SchedulerResult<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

/// Rejects every dispatch as transiently unavailable
#[derive(Default)]
pub struct RejectingDispatcher {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl JobDispatcher for RejectingDispatcher {
    async fn dispatch(&self, command: StartSpaCollectionJobCommand) -> SchedulerResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SchedulerError::DispatchRejected {
            job_id: command.job_id,
            reason: "queue unavailable".to_string(),
        })
    }
}
