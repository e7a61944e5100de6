//! Integration tests for the collection dispatcher
//!
//! These tests verify:
//! - The worker pool bounds simultaneously open scraper contexts
//! - A failing job does not affect its siblings
//! - A finished job can be rerun while its records are still being forwarded
//! - Collected records flow through processing into queryable events

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use punchup::api::{EventQueries, StoreEventQueries};
use punchup::error::Error;
use punchup::collection::{CollectionDispatcher, CollectionOptions, DispatcherSettings};
use punchup::models::{Execution, ExecutionStatus, Job, JobStatus, RawRecord};
use punchup::processing::entities::event_slug;
use punchup::processing::{EventBus, ProcessingOptions, ProcessingPipeline};
use punchup::scheduler::{JobDispatcher, SchedulerError, SchedulingOptions, SchedulingService};
use punchup::storage::{Repository, SessionFactory};
use punchup::utils::retry::RetryPolicy;

use common::{create_job, seed_catalog, wait_until, GatedScraperFactory};

fn settings(concurrency: usize) -> DispatcherSettings {
    DispatcherSettings {
        collection: CollectionOptions {
            concurrency,
            ..Default::default()
        },
        navigation_timeout: Duration::from_secs(5),
        url_retry: RetryPolicy::immediate(2),
    }
}

fn scheduling(sessions: &SessionFactory, dispatcher: &Arc<CollectionDispatcher>) -> SchedulingService {
    let dispatcher: Arc<dyn JobDispatcher> = Arc::<CollectionDispatcher>::clone(dispatcher);
    SchedulingService::new(
        sessions.clone(),
        dispatcher,
        SchedulingOptions {
            dispatch_retry: RetryPolicy::immediate(1),
            ..Default::default()
        },
    )
}

fn job_status(sessions: &SessionFactory, id: Uuid) -> JobStatus {
    sessions
        .begin()
        .repository::<Job>()
        .get_by_id(id)
        .unwrap()
        .unwrap()
        .status
}

fn executions(sessions: &SessionFactory, job_id: Uuid) -> Vec<Execution> {
    sessions
        .begin()
        .repository::<Execution>()
        .query(&|e| e.job_id == job_id)
        .unwrap()
}

// ============================================================================
// Concurrency Bound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_exceeds_concurrency() {
    let sessions = SessionFactory::in_memory();
    let (gate_tx, gate_rx) = watch::channel(false);
    let factory = Arc::new(GatedScraperFactory::new(gate_rx));
    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(2),
        sessions.clone(),
        factory.clone(),
        None,
        CancellationToken::new(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let comics = ["ali-wong", "hasan-minhaj", "nate-bargatze", "atsuko-okatsuka", "sam-morril"];
    let mut job_ids = Vec::new();
    for comic in comics {
        let url = format!("https://punchup.live/{comic}");
        job_ids.push(create_job(&service, comic, &[url.as_str()]));
    }
    for id in &job_ids {
        service.run_job(*id).await.unwrap();
    }

    assert!(wait_until(|| dispatcher.monitor().active() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dispatcher.monitor().active(), 2);
    assert_eq!(factory.created(), 2);

    gate_tx.send(true).unwrap();
    dispatcher.close().await;

    assert_eq!(dispatcher.monitor().peak(), 2);
    assert_eq!(dispatcher.monitor().active(), 0);
    assert_eq!(factory.created(), 5);
    assert_eq!(factory.closed(), 5);

    for id in &job_ids {
        assert_eq!(job_status(&sessions, *id), JobStatus::Completed);
    }

    let started = dispatcher.monitor().started_order();
    assert_eq!(started.len(), 5);
    let first_two: HashSet<Uuid> = started[..2].iter().copied().collect();
    let expected: HashSet<Uuid> = job_ids[..2].iter().copied().collect();
    assert_eq!(first_two, expected);
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[tokio::test]
async fn test_failed_job_does_not_affect_siblings() {
    let sessions = SessionFactory::in_memory();
    let factory = Arc::new(GatedScraperFactory::open());
    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(2),
        sessions.clone(),
        factory.clone(),
        None,
        CancellationToken::new(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let good = create_job(&service, "good", &["https://punchup.live/jerrod-carmichael"]);
    let bad = create_job(&service, "bad", &["https://punchup.live/broken-page"]);
    service.run_job(good).await.unwrap();
    service.run_job(bad).await.unwrap();
    dispatcher.close().await;

    assert_eq!(job_status(&sessions, good), JobStatus::Completed);
    assert_eq!(job_status(&sessions, bad), JobStatus::Failed);

    let failed = executions(&sessions, bad);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, ExecutionStatus::Failed);
    assert_eq!(failed[0].records_collected, 0);
    assert!(failed[0].error.as_deref().unwrap().contains("404"));

    let succeeded = executions(&sessions, good);
    assert_eq!(succeeded[0].status, ExecutionStatus::Succeeded);
    assert_eq!(succeeded[0].records_collected, 4);

    let stats = dispatcher.stats();
    assert_eq!(stats.executions_succeeded, 1);
    assert_eq!(stats.executions_failed, 1);
    assert_eq!(factory.created(), factory.closed());
}

#[tokio::test]
async fn test_running_job_rejects_second_run() {
    let sessions = SessionFactory::in_memory();
    let (gate_tx, gate_rx) = watch::channel(false);
    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(1),
        sessions.clone(),
        Arc::new(GatedScraperFactory::new(gate_rx)),
        None,
        CancellationToken::new(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let id = create_job(&service, "once", &["https://punchup.live/mark-normand"]);
    service.run_job(id).await.unwrap();
    assert!(service.run_job(id).await.is_err());

    gate_tx.send(true).unwrap();
    dispatcher.close().await;

    assert_eq!(executions(&sessions, id).len(), 1);
    assert_eq!(job_status(&sessions, id), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rerun_while_records_drain_keeps_job_completed() {
    let sessions = SessionFactory::in_memory();
    // Never drained, so forwarding blocks right after the outcome commits
    let (records_tx, records_rx) = mpsc::channel::<RawRecord>(1);
    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(2),
        sessions.clone(),
        Arc::new(GatedScraperFactory::open()),
        Some(records_tx),
        CancellationToken::new(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let id = create_job(&service, "rerun", &["https://punchup.live/mark-normand"]);
    service.run_job(id).await.unwrap();
    assert!(wait_until(|| job_status(&sessions, id) == JobStatus::Completed).await);

    let rerun = loop {
        match service.run_job(id).await {
            Ok(job) => break job,
            Err(Error::Scheduler(SchedulerError::JobAlreadyActive { .. })) => {
                assert_eq!(job_status(&sessions, id), JobStatus::Completed);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("rerun failed: {e}"),
        }
    };
    assert_ne!(rerun.status, JobStatus::Failed);
    assert_eq!(rerun.dispatch_attempts, 1);

    assert!(
        wait_until(|| {
            executions(&sessions, id).len() == 2
                && job_status(&sessions, id) == JobStatus::Completed
        })
        .await
    );
    assert!(executions(&sessions, id)
        .iter()
        .all(|e| e.status == ExecutionStatus::Succeeded));

    drop(records_rx);
    dispatcher.close().await;
}

#[tokio::test]
async fn test_dispatch_attempts_are_recorded() {
    let sessions = SessionFactory::in_memory();
    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(1),
        sessions.clone(),
        Arc::new(GatedScraperFactory::open()),
        None,
        CancellationToken::new(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let id = create_job(&service, "counted", &["https://punchup.live/atsuko-okatsuka"]);
    service.run_job(id).await.unwrap();
    dispatcher.close().await;

    let job = sessions
        .begin()
        .repository::<Job>()
        .get_by_id(id)
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.dispatch_attempts, 1);
}

// ============================================================================
// End to End
// ============================================================================

#[tokio::test]
async fn test_collected_records_become_queryable_events() {
    let sessions = SessionFactory::in_memory();
    let (records_tx, records_rx) = mpsc::channel::<RawRecord>(64);
    let cancel = CancellationToken::new();

    let pipeline = Arc::new(
        ProcessingPipeline::new(
            ProcessingOptions::new(1, 50, 1),
            sessions.clone(),
            EventBus::default(),
        )
        .unwrap(),
    );
    let pipeline_handle = Arc::clone(&pipeline).spawn(records_rx, cancel.child_token());

    let dispatcher = Arc::new(CollectionDispatcher::start(
        settings(2),
        sessions.clone(),
        Arc::new(GatedScraperFactory::open()),
        Some(records_tx),
        cancel.clone(),
    ));
    let service = scheduling(&sessions, &dispatcher);
    seed_catalog(&service);

    let id = create_job(
        &service,
        "lineup",
        &["https://punchup.live/taylor-tomlinson", "https://punchup.live/sam-morril"],
    );
    service.run_job(id).await.unwrap();
    dispatcher.close().await;

    // Dropping the last sender closes the input so the pipeline drains
    drop(service);
    drop(dispatcher);
    let stats = pipeline_handle.await.unwrap();
    assert_eq!(stats.records_processed, 8);
    assert_eq!(stats.batches_failed, 0);

    let start = Utc.with_ymd_and_hms(2026, 11, 1, 20, 0, 0).unwrap();
    let slug = event_slug("Comedy Cellar", start);
    let queries = StoreEventQueries::new(sessions.clone());
    let event = queries.get_event_by_slug(&slug).await.unwrap().unwrap();
    assert_eq!(event.start_time, start);

    let names: Vec<String> = queries
        .acts_for_event(event.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["sam-morril", "taylor-tomlinson"]);

    let venue = queries.venue(event.venue_id).await.unwrap().unwrap();
    assert_eq!(venue.name, "Comedy Cellar");
}
