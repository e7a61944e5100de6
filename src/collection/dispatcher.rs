//! Collection dispatcher
//!
//! A fixed pool of workers pulls [`StartSpaCollectionJobCommand`]s from one
//! bounded FIFO queue. Each worker runs one job at a time inside its own
//! scraper context, so the number of open contexts never exceeds the pool
//! size. `dispatch` waits for queue space instead of dropping work.
//!
//! # Job lifecycle
//!
//! 1. `dispatch` marks the job `Dispatched` and enqueues it
//! 2. A worker moves it to `Running` and opens an [`Execution`]
//! 3. Every sitemap URL is collected with retry; the scraper is closed afterwards
//! 4. One session finishes the execution, updates the job and stores raw records
//! 5. The job is released, so it can be dispatched again
//! 6. Raw records are forwarded to processing

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    CollectionConfig, Execution, ExecutionStatus, Job, JobStatus, PunchupRecord, RawRecord,
    Sitemap,
};
use crate::scheduler::{JobDispatcher, SchedulerError, SchedulerResult, StartSpaCollectionJobCommand};
use crate::storage::{Repository, SessionFactory};
use crate::utils::retry::{with_retry_if, RetryPolicy};

use super::error::{CollectionError, CollectionResult};
use super::options::{BrowserContextOptions, CollectionOptions};
use super::scraper::{Scraper, ScraperFactory};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Settings
// ============================================================================

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub collection: CollectionOptions,
    /// Per-navigation timeout handed to every scraper context
    pub navigation_timeout: Duration,
    /// Retry policy for a single URL
    pub url_retry: RetryPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            collection: CollectionOptions::default(),
            navigation_timeout: Duration::from_secs(30),
            url_retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Tracks open scraper contexts
#[derive(Debug, Default)]
pub struct ScraperMonitor {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: StdMutex<Vec<Uuid>>,
}

impl ScraperMonitor {
    fn opened(&self, job_id: Uuid) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        lock(&self.started).push(job_id);
        metrics::set_active_scrapers(active);
    }

    fn closed(&self) {
        let active = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_scrapers(active);
    }

    /// Contexts open right now
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open contexts
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Job ids in the order their scrapers were opened
    pub fn started_order(&self) -> Vec<Uuid> {
        lock(&self.started).clone()
    }
}

/// Execution counters
#[derive(Debug, Default)]
pub struct DispatcherStats {
    executions_succeeded: AtomicU64,
    executions_failed: AtomicU64,
    executions_cancelled: AtomicU64,
    records_collected: AtomicU64,
}

impl DispatcherStats {
    fn record(&self, status: ExecutionStatus, records: usize) {
        let counter = match status {
            ExecutionStatus::Succeeded => &self.executions_succeeded,
            ExecutionStatus::Cancelled => &self.executions_cancelled,
            _ => &self.executions_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.records_collected
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            executions_succeeded: self.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            executions_cancelled: self.executions_cancelled.load(Ordering::Relaxed),
            records_collected: self.records_collected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_cancelled: u64,
    pub records_collected: u64,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Worker pool executing collection jobs
pub struct CollectionDispatcher {
    queue: StdMutex<Option<mpsc::Sender<StartSpaCollectionJobCommand>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

struct Shared {
    settings: DispatcherSettings,
    sessions: SessionFactory,
    factory: Arc<dyn ScraperFactory>,
    records_tx: Option<mpsc::Sender<RawRecord>>,
    cancel: CancellationToken,
    in_flight: StdMutex<HashSet<Uuid>>,
    source_limits: StdMutex<HashMap<Uuid, (usize, Arc<Semaphore>)>>,
    monitor: ScraperMonitor,
    stats: DispatcherStats,
}

/// Everything a worker loads before scraping
struct StartedJob {
    job: Job,
    execution: Execution,
    urls: Vec<String>,
    context: BrowserContextOptions,
    max_concurrency: Option<usize>,
    sku_name: String,
}

impl CollectionDispatcher {
    /// Spawn the worker pool
    ///
    /// Raw records of successful executions are sent to `records_tx` when
    /// provided. Must be called from within a tokio runtime.
    pub fn start(
        settings: DispatcherSettings,
        sessions: SessionFactory,
        factory: Arc<dyn ScraperFactory>,
        records_tx: Option<mpsc::Sender<RawRecord>>,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = settings.collection.concurrency.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(settings.collection.queue_capacity.max(1));

        let shared = Arc::new(Shared {
            settings,
            sessions,
            factory,
            records_tx,
            cancel,
            in_flight: StdMutex::new(HashSet::new()),
            source_limits: StdMutex::new(HashMap::new()),
            monitor: ScraperMonitor::default(),
            stats: DispatcherStats::default(),
        });

        let workers = spawn_workers(concurrency, queue_rx, &shared);
        tracing::info!(workers = concurrency, "Collection dispatcher started");

        Self {
            queue: StdMutex::new(Some(queue_tx)),
            workers: Mutex::new(workers),
            shared,
        }
    }

    pub fn monitor(&self) -> &ScraperMonitor {
        &self.shared.monitor
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for them
    pub async fn close(&self) {
        lock(&self.queue).take();
        self.join_workers().await;
    }

    /// Cancel running jobs and wait for the workers to exit
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        lock(&self.queue).take();
        self.join_workers().await;
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Collection worker terminated abnormally");
            }
        }
        tracing::info!(stats = ?self.stats(), "Collection dispatcher stopped");
    }
}

#[async_trait]
impl JobDispatcher for CollectionDispatcher {
    async fn dispatch(&self, command: StartSpaCollectionJobCommand) -> SchedulerResult<()> {
        let job_id = command.job_id;
        let Some(queue) = lock(&self.queue).clone() else {
            return Err(SchedulerError::DispatcherClosed);
        };
        if self.shared.cancel.is_cancelled() {
            return Err(SchedulerError::DispatcherClosed);
        }

        if !lock(&self.shared.in_flight).insert(job_id) {
            return Err(SchedulerError::JobAlreadyActive { job_id });
        }

        // Marked before enqueueing so a worker never races this write
        if let Err(e) = self.shared.set_job_status(job_id, JobStatus::Dispatched) {
            self.shared.release(job_id);
            return Err(SchedulerError::DispatchRejected {
                job_id,
                reason: e.to_string(),
            });
        }

        let sent = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => false,
            result = queue.send(command) => result.is_ok(),
        };

        if !sent {
            if let Err(e) = self.shared.set_job_status(job_id, JobStatus::Pending) {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to revert job after closed queue");
            }
            self.shared.release(job_id);
            return Err(SchedulerError::DispatcherClosed);
        }

        tracing::debug!(job_id = %job_id, "Job queued for collection");
        Ok(())
    }
}

fn spawn_workers(
    concurrency: usize,
    queue_rx: mpsc::Receiver<StartSpaCollectionJobCommand>,
    shared: &Arc<Shared>,
) -> Vec<JoinHandle<()>> {
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    let mut handles = Vec::with_capacity(concurrency);

    for worker_id in 0..concurrency {
        let queue_rx = Arc::clone(&queue_rx);
        let shared = Arc::clone(shared);

        let handle = tokio::spawn(async move {
            loop {
                let command = {
                    let mut rx = queue_rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = shared.cancel.cancelled() => None,
                        command = rx.recv() => command,
                    }
                };

                let Some(command) = command else {
                    break;
                };
                let job_id = command.job_id;

                let run = AssertUnwindSafe(shared.execute(worker_id, command)).catch_unwind();
                let raw = match run.await {
                    Ok(raw) => raw,
                    Err(_) => {
                        tracing::error!(worker_id, job_id = %job_id, "Collection job panicked");
                        if let Err(e) = shared.fail_job(job_id, "collection worker panicked") {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to record panicked job");
                        }
                        Vec::new()
                    }
                };

                // The outcome is committed; forwarding may block on processing
                shared.release(job_id);
                shared.forward(job_id, raw).await;
            }

            tracing::debug!(worker_id, "Collection worker stopped");
        });

        handles.push(handle);
    }

    handles
}

impl Shared {
    fn release(&self, job_id: Uuid) {
        lock(&self.in_flight).remove(&job_id);
    }

    fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        self.sessions.scope(|session| {
            let mut repo = session.repository::<Job>();
            let mut job = repo
                .get_by_id(job_id)?
                .ok_or_else(|| Error::not_found("job", job_id))?;
            job.set_status(status);
            repo.update(job)
        })
    }

    fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<()> {
        self.sessions.scope(|session| {
            let mut repo = session.repository::<Job>();
            if let Some(mut job) = repo.get_by_id(job_id)? {
                job.fail(reason);
                repo.update(job)?;
            }
            Ok(())
        })
    }

    /// Run one job to its committed outcome; returns the raw records to forward
    async fn execute(
        &self,
        worker_id: usize,
        command: StartSpaCollectionJobCommand,
    ) -> Vec<RawRecord> {
        let job_id = command.job_id;
        let started = match self.begin(command) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(worker_id, job_id = %job_id, error = %e, "Failed to start execution");
                if let Err(e) = self.fail_job(job_id, &e.to_string()) {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
                }
                return Vec::new();
            }
        };

        tracing::info!(
            worker_id,
            job_id = %job_id,
            execution_id = %started.execution.id,
            sku = %started.sku_name,
            urls = started.urls.len(),
            "Execution started"
        );

        let _timer = metrics::start_scrape_timer(&started.sku_name);
        let outcome = match self.source_permit(&started).await {
            Some(_permit) => self.collect(&started).await,
            None => Err(CollectionError::Cancelled),
        };

        self.finish(started, outcome)
    }

    /// Move the job to `Running`, open its execution and resolve its targets
    fn begin(&self, command: StartSpaCollectionJobCommand) -> Result<StartedJob> {
        self.sessions.scope(|session| {
            let mut job = session
                .repository::<Job>()
                .get_by_id(command.job_id)?
                .ok_or_else(|| Error::not_found("job", command.job_id))?;

            let sitemaps = if job.sitemap_ids.is_empty() {
                session
                    .repository::<Sitemap>()
                    .query(&|s| s.source_id == job.source_id)?
            } else {
                let mut repo = session.repository::<Sitemap>();
                let mut found = Vec::with_capacity(job.sitemap_ids.len());
                for id in &job.sitemap_ids {
                    match repo.get_by_id(*id)? {
                        Some(sitemap) => found.push(sitemap),
                        None => tracing::warn!(job_id = %job.id, sitemap_id = %id, "Job references a missing sitemap"),
                    }
                }
                found
            };

            let mut urls: Vec<String> = Vec::new();
            for url in sitemaps.into_iter().flat_map(|s| s.urls) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }

            let config = session
                .repository::<CollectionConfig>()
                .get_by_id(CollectionConfig::id_for_source(job.source_id))?;
            let context = BrowserContextOptions::resolve(
                &self.settings.collection,
                config.as_ref(),
                self.settings.navigation_timeout,
            );

            let execution = Execution::start(job.id);
            session.repository::<Execution>().add(execution.clone())?;

            job.set_status(JobStatus::Running);
            session.repository::<Job>().update(job.clone())?;

            Ok(StartedJob {
                job,
                execution,
                urls,
                context,
                max_concurrency: config.and_then(|c| c.max_concurrency),
                sku_name: command.sku_name,
            })
        })
    }

    /// Wait for a slot under the source's own concurrency cap
    ///
    /// `None` means the dispatcher was cancelled while waiting.
    async fn source_permit(&self, started: &StartedJob) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(limit) = started.max_concurrency else {
            return Some(None);
        };

        let semaphore = {
            let mut limits = lock(&self.source_limits);
            let entry = limits
                .entry(started.job.source_id)
                .or_insert_with(|| (limit, Arc::new(Semaphore::new(limit))));
            resize_source_limit(entry, limit);
            Arc::clone(&entry.1)
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok().map(Some),
        }
    }

    async fn collect(&self, started: &StartedJob) -> CollectionResult<Vec<PunchupRecord>> {
        if started.urls.is_empty() {
            return Err(CollectionError::NoTargets);
        }

        let scraper = self.factory.create_scraper(&started.context).await?;
        self.monitor.opened(started.job.id);

        let scraping = AssertUnwindSafe(self.collect_urls(scraper.as_ref(), &started.urls))
            .catch_unwind();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CollectionError::Cancelled),
            result = scraping => result
                .unwrap_or_else(|_| Err(CollectionError::Crashed("panic while collecting".into()))),
        };

        if let Err(e) = scraper.close().await {
            tracing::warn!(job_id = %started.job.id, error = %e, "Failed to close scraper");
        }
        self.monitor.closed();

        result
    }

    async fn collect_urls(
        &self,
        scraper: &dyn Scraper,
        urls: &[String],
    ) -> CollectionResult<Vec<PunchupRecord>> {
        let mut records = Vec::new();
        for url in urls {
            let found = with_retry_if(
                &self.settings.url_retry,
                || scraper.collect(url),
                CollectionError::is_recoverable,
            )
            .await?;
            tracing::debug!(url = %url, records = found.len(), "URL collected");
            records.extend(found);
        }
        Ok(records)
    }

    /// Record the outcome in one session; returns the raw records to forward
    fn finish(
        &self,
        started: StartedJob,
        outcome: CollectionResult<Vec<PunchupRecord>>,
    ) -> Vec<RawRecord> {
        let StartedJob {
            mut job,
            mut execution,
            ..
        } = started;
        let job_id = job.id;

        let outcome = outcome.map_err(Error::from).and_then(|records| {
            let mut raw = Vec::new();
            for record in records {
                raw.extend(record.into_raw_records(job.source_id, execution.id)?);
            }
            Ok(raw)
        });

        let (status, error, raw) = match outcome {
            Ok(raw) => (ExecutionStatus::Succeeded, None, raw),
            Err(Error::Collection(CollectionError::Cancelled)) => (
                ExecutionStatus::Cancelled,
                Some(CollectionError::Cancelled.to_string()),
                Vec::new(),
            ),
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string()), Vec::new()),
        };

        let committed = self.sessions.scope(|session| {
            execution.finish(status, raw.len(), error.clone())?;
            session.repository::<Execution>().update(execution.clone())?;

            match &error {
                None => job.set_status(JobStatus::Completed),
                Some(reason) => job.fail(reason.clone()),
            }
            session.repository::<Job>().update(job.clone())?;

            let mut records = session.repository::<RawRecord>();
            for record in &raw {
                records.add(record.clone())?;
            }
            Ok(())
        });

        if let Err(e) = committed {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record execution outcome");
            self.stats.record(ExecutionStatus::Failed, 0);
            metrics::record_execution(ExecutionStatus::Failed.as_str(), 0);
            if let Err(e) = self.fail_job(job_id, &e.to_string()) {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
            }
            return Vec::new();
        }

        self.stats.record(status, raw.len());
        metrics::record_execution(status.as_str(), raw.len());

        match &error {
            None => tracing::info!(
                job_id = %job_id,
                execution_id = %execution.id,
                records = raw.len(),
                duration_ms = execution.duration_ms(),
                "Execution succeeded"
            ),
            Some(reason) => tracing::warn!(
                job_id = %job_id,
                execution_id = %execution.id,
                status = %status,
                error = %reason,
                "Execution did not succeed"
            ),
        }

        raw
    }

    async fn forward(&self, job_id: Uuid, raw: Vec<RawRecord>) {
        let Some(tx) = &self.records_tx else {
            return;
        };
        for record in raw {
            if tx.send(record).await.is_err() {
                tracing::warn!(job_id = %job_id, "Processing channel closed, raw records stay stored only");
                break;
            }
        }
    }
}

/// Bring a source's semaphore to `limit` without replacing it
///
/// Growth adds permits at once. Shrinking takes the surplus permits out of
/// circulation as running jobs return them, so the new cap holds once they
/// do and is never exceeded by jobs started after the change.
fn resize_source_limit(entry: &mut (usize, Arc<Semaphore>), limit: usize) {
    let (current, semaphore) = entry;
    if *current == limit {
        return;
    }

    if limit > *current {
        semaphore.add_permits(limit - *current);
    } else {
        let surplus = (*current - limit) as u32;
        let semaphore = Arc::clone(semaphore);
        tokio::spawn(async move {
            if let Ok(permits) = semaphore.acquire_many_owned(surplus).await {
                permits.forget();
            }
        });
    }
    *current = limit;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sku, SkuType, Source};
    use std::sync::atomic::AtomicU32;

    struct FlakyScraper {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl Scraper for FlakyScraper {
        async fn collect(&self, url: &str) -> CollectionResult<Vec<PunchupRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CollectionError::Timeout { url: url.to_string() });
            }
            Ok(vec![PunchupRecord {
                name: "Taylor Tomlinson".into(),
                bio: None,
                events: Vec::new(),
            }])
        }

        async fn close(&self) -> CollectionResult<()> {
            Ok(())
        }
    }

    struct FlakyFactory {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl ScraperFactory for FlakyFactory {
        async fn create_scraper(
            &self,
            _options: &BrowserContextOptions,
        ) -> CollectionResult<Box<dyn Scraper>> {
            Ok(Box::new(FlakyScraper {
                calls: Arc::clone(&self.calls),
                failures: self.failures,
            }))
        }
    }

    fn seed_job(sessions: &SessionFactory, urls: Vec<String>) -> StartSpaCollectionJobCommand {
        sessions
            .scope(|session| {
                let source = Source::new("Punchup", "https://punchup.live");
                let sku = Sku::new(source.id, "comics", SkuType::FullCrawl);
                let sitemap = Sitemap::new(source.id, "comics", urls);
                let job = Job::new(source.id, sku.id, "manual", None);
                let command = StartSpaCollectionJobCommand {
                    job_id: job.id,
                    sku_id: sku.id,
                    sku_name: sku.name.clone(),
                };
                session.repository::<Source>().add(source)?;
                session.repository::<Sku>().add(sku)?;
                session.repository::<Sitemap>().add(sitemap)?;
                session.repository::<Job>().add(job)?;
                Ok(command)
            })
            .unwrap()
    }

    fn settings(retries: u32) -> DispatcherSettings {
        DispatcherSettings {
            collection: CollectionOptions {
                concurrency: 1,
                ..Default::default()
            },
            navigation_timeout: Duration::from_secs(1),
            url_retry: RetryPolicy::immediate(retries),
        }
    }

    #[tokio::test]
    async fn test_recoverable_errors_are_retried() {
        let sessions = SessionFactory::in_memory();
        let command = seed_job(&sessions, vec!["https://punchup.live/taylor".into()]);
        let calls = Arc::new(AtomicU32::new(0));
        let factory = Arc::new(FlakyFactory {
            calls: Arc::clone(&calls),
            failures: 2,
        });

        let dispatcher = CollectionDispatcher::start(
            settings(3),
            sessions.clone(),
            factory,
            None,
            CancellationToken::new(),
        );
        dispatcher.dispatch(command.clone()).await.unwrap();
        dispatcher.close().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let job = sessions
            .begin()
            .repository::<Job>()
            .get_by_id(command.job_id)
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(dispatcher.stats().records_collected, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_execution() {
        let sessions = SessionFactory::in_memory();
        let command = seed_job(&sessions, vec!["https://punchup.live/taylor".into()]);
        let factory = Arc::new(FlakyFactory {
            calls: Arc::new(AtomicU32::new(0)),
            failures: 10,
        });

        let dispatcher = CollectionDispatcher::start(
            settings(2),
            sessions.clone(),
            factory,
            None,
            CancellationToken::new(),
        );
        dispatcher.dispatch(command.clone()).await.unwrap();
        dispatcher.close().await;

        let mut session = sessions.begin();
        let executions = session
            .repository::<Execution>()
            .query(&|e| e.job_id == command.job_id)
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error.as_deref().unwrap().contains("timed out"));
        assert!(session.repository::<RawRecord>().all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_without_targets_fails() {
        let sessions = SessionFactory::in_memory();
        let command = seed_job(&sessions, Vec::new());
        let factory = Arc::new(FlakyFactory {
            calls: Arc::new(AtomicU32::new(0)),
            failures: 0,
        });

        let dispatcher = CollectionDispatcher::start(
            settings(1),
            sessions.clone(),
            factory,
            None,
            CancellationToken::new(),
        );
        dispatcher.dispatch(command.clone()).await.unwrap();
        dispatcher.close().await;

        let job = sessions
            .begin()
            .repository::<Job>()
            .get_by_id(command.job_id)
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(dispatcher.monitor().peak(), 0);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_jobs() {
        let sessions = SessionFactory::in_memory();
        let command = seed_job(&sessions, vec!["https://punchup.live/a".into()]);
        let factory = Arc::new(FlakyFactory {
            calls: Arc::new(AtomicU32::new(0)),
            failures: 0,
        });

        let dispatcher = CollectionDispatcher::start(
            settings(1),
            sessions,
            factory,
            None,
            CancellationToken::new(),
        );
        dispatcher.close().await;

        let err = dispatcher.dispatch(command).await.unwrap_err();
        assert_eq!(err, SchedulerError::DispatcherClosed);
    }

    #[tokio::test]
    async fn test_source_limit_shrinks_in_place() {
        let semaphore = Arc::new(Semaphore::new(3));
        let mut entry = (3, Arc::clone(&semaphore));
        let running = Arc::clone(&semaphore).acquire_many_owned(3).await.unwrap();

        resize_source_limit(&mut entry, 1);
        assert!(Arc::ptr_eq(&entry.1, &semaphore));
        assert_eq!(semaphore.available_permits(), 0);

        drop(running);
        for _ in 0..100 {
            if semaphore.available_permits() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(semaphore.available_permits(), 1);

        resize_source_limit(&mut entry, 4);
        assert_eq!(entry.0, 4);
        assert_eq!(semaphore.available_permits(), 4);
    }
}
