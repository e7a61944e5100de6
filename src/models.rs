// Core data structures for the punchup scheduler and collectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::entities::{
    ActPayload, EntityType, EventActPayload, EventPayload, VenuePayload,
};
use crate::storage::Entity;
use crate::utils::truncate_text;

/// Longest error message kept on a job
const MAX_ERROR_LEN: usize = 2000;

/// Namespace for ids derived from natural keys (occurrences, per-source configs)
const MODEL_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_3c2a_8b44_4e0f_9a57_2c8e_41d3_b7a9);

// ============================================================================
// Sources and SKUs
// ============================================================================

/// A comedy-content provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub website: String,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(name: impl Into<String>, website: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            website: website.into(),
            created_at: Utc::now(),
        }
    }
}

impl Entity for Source {
    const KIND: &'static str = "source";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Kind of work a SKU performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuType {
    /// Visit every sitemap URL
    FullCrawl,
    /// Only pages changed since the last run
    Incremental,
}

impl SkuType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullCrawl => "full_crawl",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SkuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkuType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "full_crawl" | "fullcrawl" | "full" => Ok(Self::FullCrawl),
            "incremental" | "inc" => Ok(Self::Incremental),
            other => Err(Error::validation(
                "sku_type",
                format!("unknown SKU type '{other}' (expected full_crawl or incremental)"),
            )),
        }
    }
}

/// A unit of schedulable work under a [`Source`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sku {
    pub id: Uuid,
    pub source_id: Uuid,
    pub name: String,
    pub sku_type: SkuType,
    pub created_at: DateTime<Utc>,
}

impl Sku {
    pub fn new(source_id: Uuid, name: impl Into<String>, sku_type: SkuType) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            name: name.into(),
            sku_type,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Sku {
    const KIND: &'static str = "sku";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ============================================================================
// Schedules, jobs and executions
// ============================================================================

/// Cron-bound recurrence rule producing [`Job`]s
///
/// A schedule without a cron expression is inert: it exists for manual
/// triggering and is never fired by a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub source_id: Uuid,
    pub sku_id: Uuid,
    pub name: String,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    /// Most recent occurrence a job was created for
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        source_id: Uuid,
        sku_id: Uuid,
        name: impl Into<String>,
        cron_expression: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            sku_id,
            name: name.into(),
            cron_expression,
            enabled: true,
            last_fired_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether ticks should evaluate this schedule
    pub fn is_active(&self) -> bool {
        self.enabled && self.cron_expression.is_some()
    }
}

impl Entity for Schedule {
    const KIND: &'static str = "schedule";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a successful dispatch
    Pending,
    /// Accepted by the collection dispatcher
    Dispatched,
    /// A worker is executing it
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete unit of scheduled work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_id: Uuid,
    pub sku_id: Uuid,
    pub name: String,
    pub cron_expression: Option<String>,
    /// Sitemaps to collect; empty means every sitemap of the source
    pub sitemap_ids: Vec<Uuid>,
    /// Schedule that produced this job, `None` for manual jobs
    pub schedule_id: Option<Uuid>,
    /// Cron occurrence this job was created for
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub dispatch_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Manually created job
    pub fn new(
        source_id: Uuid,
        sku_id: Uuid,
        name: impl Into<String>,
        cron_expression: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id,
            sku_id,
            name: name.into(),
            cron_expression,
            sitemap_ids: Vec::new(),
            schedule_id: None,
            scheduled_for: None,
            status: JobStatus::Pending,
            dispatch_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Job for one cron occurrence of a schedule
    ///
    /// The id is derived from the schedule id and the occurrence timestamp
    /// (second precision), so the same occurrence always maps to the same job.
    pub fn for_occurrence(schedule: &Schedule, occurrence: DateTime<Utc>) -> Self {
        let mut job = Self::new(
            schedule.source_id,
            schedule.sku_id,
            schedule.name.clone(),
            schedule.cron_expression.clone(),
        );
        job.id = Self::occurrence_id(schedule.id, occurrence);
        job.schedule_id = Some(schedule.id);
        job.scheduled_for = Some(occurrence);
        job
    }

    /// Dedupe key of a schedule occurrence
    pub fn occurrence_id(schedule_id: Uuid, occurrence: DateTime<Utc>) -> Uuid {
        let key = format!("{}@{}", schedule_id, occurrence.timestamp());
        Uuid::new_v5(&MODEL_NAMESPACE, key.as_bytes())
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(truncate_text(&error.into(), MAX_ERROR_LEN));
        self.set_status(JobStatus::Failed);
    }
}

impl Entity for Job {
    const KIND: &'static str = "job";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Outcome of a single job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded run of a [`Job`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub records_collected: usize,
    pub error: Option<String>,
}

impl Execution {
    pub fn start(job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            records_collected: 0,
            error: None,
        }
    }

    /// Move to a terminal status; a finished execution never changes again
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        records_collected: usize,
        error: Option<String>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::validation(
                "execution.status",
                format!("execution {} is already {}", self.id, self.status),
            ));
        }
        if !status.is_terminal() {
            return Err(Error::validation(
                "execution.status",
                "an execution can only finish in a terminal status",
            ));
        }

        self.status = status;
        self.records_collected = records_collected;
        self.error = error;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

impl Entity for Execution {
    const KIND: &'static str = "execution";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ============================================================================
// Collection targets and configuration
// ============================================================================

/// URL target list for collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sitemap {
    pub id: Uuid,
    pub source_id: Uuid,
    pub name: String,
    pub urls: Vec<String>,
}

impl Sitemap {
    pub fn new(source_id: Uuid, name: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            name: name.into(),
            urls,
        }
    }
}

impl Entity for Sitemap {
    const KIND: &'static str = "sitemap";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Per-source scraping configuration
///
/// At most one per source; the id is derived from the source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub id: Uuid,
    pub source_id: Uuid,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    /// Cap on concurrent jobs of this source, below the global pool size
    pub max_concurrency: Option<usize>,
}

impl CollectionConfig {
    pub fn for_source(source_id: Uuid) -> Self {
        Self {
            id: Self::id_for_source(source_id),
            source_id,
            viewport_width: 1280,
            viewport_height: 800,
            user_agent: None,
            max_concurrency: None,
        }
    }

    pub fn id_for_source(source_id: Uuid) -> Uuid {
        Uuid::new_v5(&MODEL_NAMESPACE, format!("collection-config:{source_id}").as_bytes())
    }
}

impl Entity for CollectionConfig {
    const KIND: &'static str = "collection_config";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ============================================================================
// Collected records
// ============================================================================

/// A performer page as scraped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PunchupRecord {
    pub name: String,
    pub bio: Option<String>,
    pub events: Vec<PunchupEvent>,
}

/// One upcoming appearance listed on a performer page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchupEvent {
    pub start_time: DateTime<Utc>,
    pub location: String,
    pub venue: String,
    pub ticket_link: Option<String>,
}

impl PunchupRecord {
    /// Split into tagged raw records: one act, then a venue, event and
    /// event_act per listed event
    pub fn into_raw_records(self, source_id: Uuid, execution_id: Uuid) -> Result<Vec<RawRecord>> {
        let mut records = Vec::with_capacity(1 + self.events.len() * 3);
        let raw = |entity_type: EntityType, payload: serde_json::Value| {
            RawRecord::new(source_id, execution_id, entity_type.as_str(), payload)
        };

        records.push(raw(
            EntityType::Act,
            serde_json::to_value(ActPayload {
                name: self.name.clone(),
                bio: self.bio,
            })?,
        ));

        for event in self.events {
            records.push(raw(
                EntityType::Venue,
                serde_json::to_value(VenuePayload {
                    name: event.venue.clone(),
                    location: event.location.clone(),
                })?,
            ));
            records.push(raw(
                EntityType::Event,
                serde_json::to_value(EventPayload {
                    venue: event.venue.clone(),
                    location: event.location,
                    start_time: event.start_time,
                    ticket_link: event.ticket_link,
                })?,
            ));
            records.push(raw(
                EntityType::EventAct,
                serde_json::to_value(EventActPayload {
                    act: self.name.clone(),
                    venue: event.venue,
                    start_time: event.start_time,
                })?,
            ));
        }

        Ok(records)
    }
}

/// Tagged unit of collected data entering processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Uuid,
    pub source_id: Uuid,
    pub execution_id: Uuid,
    /// Entity kind tag, validated during processing
    pub entity_type: String,
    pub payload: serde_json::Value,
    pub collected_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(
        source_id: Uuid,
        execution_id: Uuid,
        entity_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            execution_id,
            entity_type: entity_type.into(),
            payload,
            collected_at: Utc::now(),
        }
    }
}

impl Entity for RawRecord {
    const KIND: &'static str = "raw_record";

    fn id(&self) -> Uuid {
        self.id
    }
}
