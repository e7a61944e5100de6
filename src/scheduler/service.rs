//! Scheduling service
//!
//! Owns the command surface for sources, SKUs, schedules, sitemaps and jobs,
//! and the periodic `tick` that turns due cron occurrences into jobs.
//!
//! # Tick semantics
//!
//! For every enabled schedule with a cron expression, the occurrences in
//! `(last_fired_at or created_at, now]` are coalesced into the most recent
//! one. The job for that occurrence has an id derived from
//! `(schedule_id, occurrence)`, so a second tick over the same window finds
//! it and creates nothing. Job creation and `last_fired_at` updates commit in
//! one session; dispatch happens after the commit with bounded backoff.
//! Cancelling a tick cuts the backoff short and leaves undispatched jobs
//! `Pending`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    CollectionConfig, Execution, Job, JobStatus, Schedule, Sitemap, Sku, Source,
};
use crate::storage::{DataSession, Repository, SessionFactory};
use crate::utils::is_http_url;
use crate::utils::retry::{with_retry_until, RetryPolicy};

use super::commands::{
    CreateJobCommand, CreateScheduleCommand, CreateSitemapCommand, CreateSkuCommand,
    CreateSourceCommand, SetCollectionConfigCommand, StartSpaCollectionJobCommand,
};
use super::cron::CronSchedule;
use super::dispatch::JobDispatcher;
use super::error::SchedulerError;

/// A schedule a tick could not evaluate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleFailure {
    pub schedule_id: Uuid,
    pub reason: String,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub now: Option<DateTime<Utc>>,
    /// Another tick was in progress; nothing was evaluated
    pub skipped: bool,
    /// Active schedules looked at
    pub evaluated: usize,
    /// Jobs created by this tick
    pub jobs_created: Vec<Uuid>,
    /// Occurrences folded into a later one
    pub coalesced: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    /// The tick was cancelled before every created job was dispatched
    pub cancelled: bool,
    /// Created jobs left `Pending` by cancellation
    pub undispatched: usize,
    pub schedule_errors: Vec<ScheduleFailure>,
}

impl TickReport {
    fn skipped(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            skipped: true,
            ..Default::default()
        }
    }
}

/// Settings the service needs from configuration
#[derive(Debug, Clone)]
pub struct SchedulingOptions {
    /// Backoff policy for dispatch retries
    pub dispatch_retry: RetryPolicy,
    /// How far back a tick looks for missed occurrences
    pub max_catch_up: Duration,
}

impl Default for SchedulingOptions {
    fn default() -> Self {
        Self {
            dispatch_retry: RetryPolicy::default(),
            max_catch_up: Duration::hours(24),
        }
    }
}

/// Core scheduling orchestrator
pub struct SchedulingService {
    sessions: SessionFactory,
    dispatcher: Arc<dyn JobDispatcher>,
    options: SchedulingOptions,
    tick_lock: Mutex<()>,
    /// Serializes name uniqueness checks with their commit
    unique_names: StdMutex<()>,
}

impl SchedulingService {
    pub fn new(
        sessions: SessionFactory,
        dispatcher: Arc<dyn JobDispatcher>,
        options: SchedulingOptions,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            options,
            tick_lock: Mutex::new(()),
            unique_names: StdMutex::new(()),
        }
    }

    pub fn sessions(&self) -> &SessionFactory {
        &self.sessions
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Register a source; names are unique regardless of case
    pub fn create_source(&self, command: CreateSourceCommand) -> Result<Uuid> {
        let name = required("name", &command.name)?;
        let website = command.website.trim();
        if !is_http_url(website) {
            return Err(Error::validation(
                "website",
                format!("'{website}' is not an http(s) URL"),
            ));
        }

        let source = Source::new(name, website);
        let id = source.id;

        let _unique = self.lock_unique_names();
        self.sessions.scope(|session| {
            let mut repo = session.repository::<Source>();
            if repo
                .find_one(&|s| s.name.eq_ignore_ascii_case(name))?
                .is_some()
            {
                return Err(Error::conflict("source", name));
            }
            repo.add(source)
        })?;

        tracing::info!(source_id = %id, name, "Source created");
        Ok(id)
    }

    /// Register a SKU; names are unique within their source
    pub fn create_sku(&self, command: CreateSkuCommand) -> Result<Uuid> {
        let name = required("name", &command.name)?;
        let sku = Sku::new(command.source_id, name, command.sku_type);
        let id = sku.id;

        let _unique = self.lock_unique_names();
        self.sessions.scope(|session| {
            require_source(session, command.source_id)?;

            let mut repo = session.repository::<Sku>();
            let duplicate = repo.find_one(&|s| {
                s.source_id == command.source_id && s.name.eq_ignore_ascii_case(name)
            })?;
            if duplicate.is_some() {
                return Err(Error::conflict("sku", name));
            }
            repo.add(sku)
        })?;

        tracing::info!(sku_id = %id, source_id = %command.source_id, name, "SKU created");
        Ok(id)
    }

    /// Create a schedule; without a cron expression it never fires on its own
    pub fn create_schedule(&self, command: CreateScheduleCommand) -> Result<Uuid> {
        let name = required("name", &command.name)?;
        let cron_expression = parse_optional_cron(command.cron_expression.as_deref())?;

        let schedule = Schedule::new(command.source_id, command.sku_id, name, cron_expression);
        let id = schedule.id;

        self.sessions.scope(|session| {
            require_source(session, command.source_id)?;
            let sku = session
                .repository::<Sku>()
                .get_by_id(command.sku_id)?
                .ok_or_else(|| {
                    Error::validation("sku_id", format!("SKU {} does not exist", command.sku_id))
                })?;
            if sku.source_id != command.source_id {
                return Err(Error::validation(
                    "sku_id",
                    format!(
                        "SKU {} does not belong to source {}",
                        command.sku_id, command.source_id
                    ),
                ));
            }
            session.repository::<Schedule>().add(schedule)
        })?;

        tracing::info!(schedule_id = %id, name, "Schedule created");
        Ok(id)
    }

    fn lock_unique_names(&self) -> std::sync::MutexGuard<'_, ()> {
        self.unique_names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>> {
        let mut session = self.sessions.begin();
        session.repository::<Schedule>().get_by_id(id)
    }

    /// Register a URL target list for a source
    pub fn create_sitemap(&self, command: CreateSitemapCommand) -> Result<Uuid> {
        let name = required("name", &command.name)?;
        let urls = validate_urls(&command.urls)?;
        let sitemap = Sitemap::new(command.source_id, name, urls);
        let id = sitemap.id;

        self.sessions.scope(|session| {
            require_source(session, command.source_id)?;
            session.repository::<Sitemap>().add(sitemap)
        })?;

        tracing::info!(sitemap_id = %id, source_id = %command.source_id, "Sitemap created");
        Ok(id)
    }

    /// Create or replace the scraping configuration of a source
    pub fn set_collection_config(&self, command: SetCollectionConfigCommand) -> Result<Uuid> {
        if command.viewport_width == Some(0) || command.viewport_height == Some(0) {
            return Err(Error::validation("viewport", "dimensions must be positive"));
        }
        if command.max_concurrency == Some(0) {
            return Err(Error::validation("max_concurrency", "must be at least 1"));
        }

        self.sessions.scope(|session| {
            require_source(session, command.source_id)?;

            let mut repo = session.repository::<CollectionConfig>();
            let mut config = repo
                .get_by_id(CollectionConfig::id_for_source(command.source_id))?
                .unwrap_or_else(|| CollectionConfig::for_source(command.source_id));

            if let Some(width) = command.viewport_width {
                config.viewport_width = width;
            }
            if let Some(height) = command.viewport_height {
                config.viewport_height = height;
            }
            if command.user_agent.is_some() {
                config.user_agent = command.user_agent.clone();
            }
            if command.max_concurrency.is_some() {
                config.max_concurrency = command.max_concurrency;
            }

            let id = config.id;
            repo.upsert(config)?;
            Ok(id)
        })
    }

    /// Create a pending job, resolving source and SKU by name
    ///
    /// A provided sitemap URL list becomes a new sitemap bound to the job.
    /// The job is not dispatched until [`run_job`](Self::run_job).
    pub fn create_job(&self, command: CreateJobCommand) -> Result<Uuid> {
        let name = required("name", &command.name)?;
        let cron_expression = parse_optional_cron(command.cron_expression.as_deref())?;
        let urls = command
            .sitemaps
            .as_deref()
            .map(validate_urls)
            .transpose()?;

        let id = self.sessions.scope(|session| {
            let source = session
                .repository::<Source>()
                .find_one(&|s| s.name.eq_ignore_ascii_case(command.source.trim()))?
                .ok_or_else(|| {
                    Error::validation("source", format!("unknown source '{}'", command.source))
                })?;
            let sku = session
                .repository::<Sku>()
                .find_one(&|s| {
                    s.source_id == source.id && s.name.eq_ignore_ascii_case(command.sku.trim())
                })?
                .ok_or_else(|| {
                    Error::validation(
                        "sku",
                        format!("unknown SKU '{}' for source '{}'", command.sku, source.name),
                    )
                })?;

            let mut job = Job::new(source.id, sku.id, name, cron_expression.clone());

            if let Some(urls) = urls.clone() {
                let sitemap = Sitemap::new(source.id, format!("{name} sitemap"), urls);
                job.sitemap_ids.push(sitemap.id);
                session.repository::<Sitemap>().add(sitemap)?;
            }

            let id = job.id;
            session.repository::<Job>().add(job)?;
            Ok(id)
        })?;

        tracing::info!(job_id = %id, name, "Job created");
        Ok(id)
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let mut session = self.sessions.begin();
        session.repository::<Job>().get_by_id(id)
    }

    /// Executions of a job, oldest first
    pub fn list_executions(&self, job_id: Uuid) -> Result<Vec<Execution>> {
        let mut session = self.sessions.begin();
        if !session.repository::<Job>().exists(job_id)? {
            return Err(Error::not_found("job", job_id));
        }
        let mut executions = session
            .repository::<Execution>()
            .query(&|e| e.job_id == job_id)?;
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    /// Manually dispatch a job that is not already queued or running
    ///
    /// If the dispatcher still holds the job, the job is put back exactly as
    /// it was and `JobAlreadyActive` is returned.
    pub async fn run_job(&self, job_id: Uuid) -> Result<Job> {
        let (command, previous) = self.sessions.scope(|session| {
            let mut job = session
                .repository::<Job>()
                .get_by_id(job_id)?
                .ok_or_else(|| Error::not_found("job", job_id))?;

            if matches!(job.status, JobStatus::Dispatched | JobStatus::Running) {
                return Err(SchedulerError::JobAlreadyActive { job_id }.into());
            }

            let previous = job.clone();
            let command = start_command(session, &job)?;
            job.last_error = None;
            job.dispatch_attempts = 0;
            job.set_status(JobStatus::Pending);
            session.repository::<Job>().update(job)?;
            Ok((command, previous))
        })?;

        let never = CancellationToken::new();
        match self.dispatch_with_retry(command, &never).await {
            Ok(()) => {}
            Err(e @ SchedulerError::JobAlreadyActive { .. }) => {
                self.restore_job(previous)?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        self.get_job(job_id)?
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// Put back a job reset by `run_job`, unless something moved it since
    fn restore_job(&self, previous: Job) -> Result<()> {
        self.sessions.scope(|session| {
            let mut repo = session.repository::<Job>();
            match repo.get_by_id(previous.id)? {
                Some(job) if job.status == JobStatus::Pending => repo.update(previous),
                _ => Ok(()),
            }
        })
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Evaluate every active schedule at `now`
    ///
    /// Returns a skipped report when another tick is still running. Failing
    /// to open or commit the session is returned as an error; a schedule
    /// that cannot be evaluated is reported and the others proceed. Once
    /// `cancel` fires no further dispatch is started and pending backoff
    /// ends early; the remaining jobs stay `Pending`.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<TickReport> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::debug!(%now, "Tick already in progress, skipping");
            metrics::record_tick("skipped", 0);
            return Ok(TickReport::skipped(now));
        };

        let mut report = TickReport {
            now: Some(now),
            ..Default::default()
        };

        let commands = match self.create_due_jobs(now, &mut report) {
            Ok(commands) => commands,
            Err(e) => {
                metrics::record_tick("failed", 0);
                tracing::error!(%now, error = %e, "Tick failed");
                return Err(e);
            }
        };

        for command in commands {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.undispatched += 1;
                continue;
            }
            match self.dispatch_with_retry(command, cancel).await {
                Ok(()) => report.dispatched += 1,
                Err(SchedulerError::DispatchCancelled { .. }) => {
                    report.cancelled = true;
                    report.undispatched += 1;
                }
                Err(_) => report.dispatch_failures += 1,
            }
        }

        if report.cancelled {
            metrics::record_tick("cancelled", report.jobs_created.len());
            tracing::warn!(
                %now,
                dispatched = report.dispatched,
                undispatched = report.undispatched,
                "Tick cancelled, remaining jobs left pending"
            );
            return Ok(report);
        }

        metrics::record_tick("completed", report.jobs_created.len());
        tracing::info!(
            %now,
            evaluated = report.evaluated,
            jobs_created = report.jobs_created.len(),
            dispatched = report.dispatched,
            dispatch_failures = report.dispatch_failures,
            schedule_errors = report.schedule_errors.len(),
            "Tick completed"
        );
        Ok(report)
    }

    fn create_due_jobs(
        &self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Vec<StartSpaCollectionJobCommand>> {
        let mut session = self.sessions.begin();
        let schedules = session.repository::<Schedule>().query(&|s| s.is_active())?;
        let mut commands = Vec::new();

        for mut schedule in schedules {
            report.evaluated += 1;

            let occurrence = match self.due_occurrence(&schedule, now) {
                Ok(Some(due)) => due,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "Schedule evaluation failed");
                    report.schedule_errors.push(ScheduleFailure {
                        schedule_id: schedule.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.coalesced += occurrence.coalesced;

            let job = Job::for_occurrence(&schedule, occurrence.at);
            if !session.repository::<Job>().exists(job.id)? {
                let command = match start_command(&mut session, &job) {
                    Ok(command) => command,
                    Err(e) => {
                        tracing::warn!(schedule_id = %schedule.id, error = %e, "Schedule references a missing SKU");
                        report.schedule_errors.push(ScheduleFailure {
                            schedule_id: schedule.id,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                tracing::debug!(
                    schedule_id = %schedule.id,
                    job_id = %job.id,
                    occurrence = %occurrence.at,
                    "Creating job for occurrence"
                );
                report.jobs_created.push(job.id);
                commands.push(command);
                session.repository::<Job>().add(job)?;
            }

            schedule.last_fired_at = Some(occurrence.at);
            session.repository::<Schedule>().update(schedule)?;
        }

        session.commit()?;
        Ok(commands)
    }

    fn due_occurrence(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<DueOccurrence>, SchedulerError> {
        let Some(expression) = schedule.cron_expression.as_deref() else {
            return Ok(None);
        };
        let cron = CronSchedule::parse(expression)
            .map_err(|e| SchedulerError::evaluation_failed(schedule.id, e.to_string()))?;

        let since = schedule.last_fired_at.unwrap_or(schedule.created_at);
        let floor = now - self.options.max_catch_up;
        let since = since.max(floor);

        Ok(cron.latest_in(since, now).map(|at| DueOccurrence {
            at,
            coalesced: cron.count_in(since, now).saturating_sub(1),
        }))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch with bounded backoff, then record the outcome on the job
    ///
    /// Every attempt is counted on the job before it is made, while no worker
    /// owns it yet. Success moves the job to `Dispatched` only if it is still
    /// `Pending`; exhaustion marks it `Failed` with the last error. A job the
    /// dispatcher already holds, or a dispatch cut short by `cancel`, is left
    /// untouched.
    async fn dispatch_with_retry(
        &self,
        command: StartSpaCollectionJobCommand,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SchedulerError> {
        let job_id = command.job_id;
        let attempts = AtomicU32::new(0);
        let dispatcher = Arc::clone(&self.dispatcher);

        let result = with_retry_until(
            &self.options.dispatch_retry,
            cancel,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.count_dispatch_attempt(job_id);
                let dispatcher = Arc::clone(&dispatcher);
                let command = command.clone();
                async move { dispatcher.dispatch(command).await }
            },
            SchedulerError::is_recoverable,
        )
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        metrics::record_dispatch(result.is_ok());

        let error = match result {
            Ok(()) => {
                tracing::info!(job_id = %job_id, sku = %command.sku_name, attempts, "Job dispatched");
                self.record_job(job_id, |job| {
                    // Otherwise a worker owns the job now
                    if job.status != JobStatus::Pending {
                        return false;
                    }
                    job.set_status(JobStatus::Dispatched);
                    true
                });
                return Ok(());
            }
            Err(e @ SchedulerError::JobAlreadyActive { .. }) => {
                tracing::warn!(job_id = %job_id, "Job is still held by the dispatcher");
                return Err(e);
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::info!(job_id = %job_id, attempts, error = %e, "Dispatch cancelled, job left pending");
                return Err(SchedulerError::DispatchCancelled { job_id });
            }
            Err(e) => e,
        };

        tracing::error!(job_id = %job_id, attempts, error = %error, "Job dispatch failed");
        self.record_job(job_id, |job| {
            job.fail(error.to_string());
            true
        });
        Err(SchedulerError::DispatchFailed {
            job_id,
            attempts,
            reason: error.to_string(),
        })
    }

    fn count_dispatch_attempt(&self, job_id: Uuid) {
        self.record_job(job_id, |job| {
            job.dispatch_attempts += 1;
            true
        });
    }

    /// Apply `change` to the stored job, writing it back only when `change`
    /// returns true; failures are logged
    fn record_job(&self, job_id: Uuid, change: impl FnOnce(&mut Job) -> bool) {
        let recorded = self.sessions.scope(|session| {
            let mut repo = session.repository::<Job>();
            let Some(mut job) = repo.get_by_id(job_id)? else {
                return Ok(());
            };
            if !change(&mut job) {
                return Ok(());
            }
            repo.update(job)
        });
        if let Err(e) = recorded {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record dispatch outcome");
        }
    }
}

struct DueOccurrence {
    at: DateTime<Utc>,
    coalesced: usize,
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(trimmed)
}

fn parse_optional_cron(expression: Option<&str>) -> Result<Option<String>> {
    match expression.map(str::trim) {
        None => Ok(None),
        Some("") => Err(Error::validation(
            "cron_expression",
            "must not be empty when provided",
        )),
        Some(expr) => {
            let cron = CronSchedule::parse(expr)
                .map_err(|e| Error::validation("cron_expression", e.to_string()))?;
            Ok(Some(cron.expression().to_string()))
        }
    }
}

fn validate_urls(urls: &[String]) -> Result<Vec<String>> {
    if urls.is_empty() {
        return Err(Error::validation("urls", "at least one URL is required"));
    }
    urls.iter()
        .map(|url| {
            let url = url.trim();
            if is_http_url(url) {
                Ok(url.to_string())
            } else {
                Err(Error::validation("urls", format!("'{url}' is not an http(s) URL")))
            }
        })
        .collect()
}

fn require_source(session: &mut DataSession, source_id: Uuid) -> Result<Source> {
    session
        .repository::<Source>()
        .get_by_id(source_id)?
        .ok_or_else(|| Error::validation("source_id", format!("source {source_id} does not exist")))
}

fn start_command(session: &mut DataSession, job: &Job) -> Result<StartSpaCollectionJobCommand> {
    let sku = session
        .repository::<Sku>()
        .get_by_id(job.sku_id)?
        .ok_or_else(|| Error::not_found("sku", job.sku_id))?;

    Ok(StartSpaCollectionJobCommand {
        job_id: job.id,
        sku_id: sku.id,
        sku_name: sku.name,
    })
}
