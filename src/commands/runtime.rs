//! Wiring of the long-lived components
//!
//! The scheduler dispatches into the collection worker pool, whose raw
//! records feed the processing pipeline over one bounded channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use punchup::collection::{CollectionDispatcher, HttpScraperFactory};
use punchup::config::Config;
use punchup::models::RawRecord;
use punchup::processing::{EventBus, PipelineStatsSnapshot, ProcessingPipeline};
use punchup::scheduler::{JobDispatcher, SchedulingService};
use punchup::storage::SessionFactory;

const RECORD_CHANNEL_CAPACITY: usize = 1024;

pub struct Runtime {
    pub config: Config,
    pub sessions: SessionFactory,
    pub scheduling: Arc<SchedulingService>,
    pub dispatcher: Arc<CollectionDispatcher>,
    pub cancel: CancellationToken,
    pipeline_handle: JoinHandle<PipelineStatsSnapshot>,
}

impl Runtime {
    pub fn start(config: Config) -> Result<Self> {
        let sessions = SessionFactory::sqlite(&config.database.path).with_context(|| {
            format!("Failed to open database {}", config.database.path.display())
        })?;
        let cancel = CancellationToken::new();

        let (records_tx, records_rx) = mpsc::channel::<RawRecord>(RECORD_CHANNEL_CAPACITY);

        let pipeline = Arc::new(
            ProcessingPipeline::new(
                config.processing.clone(),
                sessions.clone(),
                EventBus::default(),
            )
            .context("Invalid processing options")?,
        );
        let pipeline_handle = pipeline.spawn(records_rx, cancel.child_token());

        let factory = Arc::new(HttpScraperFactory::new(
            config.collection.requests_per_second,
        ));
        let dispatcher = Arc::new(CollectionDispatcher::start(
            config.dispatcher_settings(),
            sessions.clone(),
            factory,
            Some(records_tx),
            cancel.child_token(),
        ));

        let scheduling = Arc::new(SchedulingService::new(
            sessions.clone(),
            Arc::clone(&dispatcher) as Arc<dyn JobDispatcher>,
            config.scheduling_options(),
        ));

        Ok(Self {
            config,
            sessions,
            scheduling,
            dispatcher,
            cancel,
            pipeline_handle,
        })
    }

    /// Finish queued jobs and flush the remaining records
    pub async fn drain(self) -> Result<PipelineStatsSnapshot> {
        self.dispatcher.close().await;
        self.finish().await
    }

    /// Cancel in-flight work and stop every component
    pub async fn shutdown(self) -> Result<PipelineStatsSnapshot> {
        self.cancel.cancel();
        self.dispatcher.shutdown().await;
        self.finish().await
    }

    async fn finish(self) -> Result<PipelineStatsSnapshot> {
        let Self {
            scheduling,
            dispatcher,
            pipeline_handle,
            ..
        } = self;

        // The record sender lives in the dispatcher; dropping it ends the input
        drop(scheduling);
        drop(dispatcher);

        let stats = pipeline_handle
            .await
            .context("Processing pipeline task failed")?;
        Ok(stats)
    }
}
