//! Processing pipeline
//!
//! Raw records are routed by their entity-type tag to one [`Batcher`] per
//! type, so a batch only ever holds records of one kind. Records whose tag
//! names no known type share a lane of their own; their batches reach
//! validation and fail there with `InvalidEntityType`.
//!
//! Each batch then moves through `Raw -> Validated -> Normalized ->
//! Persisted`, emitting a [`StateCompletedEvent`] as each stage completes. A
//! failing batch is abandoned and logged; other batches keep flowing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics;
use crate::models::RawRecord;
use crate::storage::{Repository, SessionFactory};

use super::batcher::{Batch, Batcher, BatcherSummary};
use super::entities::{Act, EntityType, Event, EventAct, ProcessingState, Venue};
use super::error::{ProcessingError, ProcessingResult};
use super::events::{EventBus, StateCompletedEvent};
use super::options::ProcessingOptions;
use super::transform::{NormalizedBatch, Transformer};

// ============================================================================
// Stage tracking
// ============================================================================

/// Enforces strictly increasing stage transitions for one batch
#[derive(Debug, Clone)]
pub struct BatchTracker {
    batch_id: Uuid,
    current: Option<ProcessingState>,
}

impl BatchTracker {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            current: None,
        }
    }

    pub fn current(&self) -> Option<ProcessingState> {
        self.current
    }

    /// Record completion of `next`; repeats and regressions are rejected
    pub fn advance(&mut self, next: ProcessingState) -> ProcessingResult<StateCompletedEvent> {
        if let Some(current) = self.current {
            if next <= current {
                return Err(ProcessingError::StateRegression {
                    batch_id: self.batch_id,
                    from: current,
                    to: next,
                });
            }
        }
        self.current = Some(next);
        Ok(StateCompletedEvent {
            batch_id: self.batch_id,
            completed_state: next,
        })
    }
}

// ============================================================================
// Pipeline Statistics
// ============================================================================

/// Pipeline statistics (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Batches persisted
    pub batches_processed: AtomicU64,

    /// Batches abandoned
    pub batches_failed: AtomicU64,

    /// Records in persisted batches
    pub records_processed: AtomicU64,

    /// Entities written
    pub entities_persisted: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            entities_persisted: self.entities_persisted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub batches_processed: u64,
    pub batches_failed: u64,
    pub records_processed: u64,
    pub entities_persisted: u64,
}

/// Result of one successfully persisted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub records: usize,
    pub entities: usize,
}

// ============================================================================
// Pipeline Implementation
// ============================================================================

/// Batches raw records and persists normalized entities
pub struct ProcessingPipeline {
    options: ProcessingOptions,
    sessions: SessionFactory,
    bus: EventBus,
    transformer: Transformer,
    stats: Arc<PipelineStats>,
}

impl ProcessingPipeline {
    /// Create a pipeline; the options are validated here
    pub fn new(
        options: ProcessingOptions,
        sessions: SessionFactory,
        bus: EventBus,
    ) -> ProcessingResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            sessions,
            bus,
            transformer: Transformer,
            stats: PipelineStats::new(),
        })
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Batch every entity-type stream and process each batch until the
    /// input closes or `cancel` fires
    pub async fn run(
        &self,
        input: mpsc::Receiver<RawRecord>,
        cancel: CancellationToken,
    ) -> PipelineStatsSnapshot {
        let (batch_tx, mut batch_rx) = mpsc::channel::<Batch<RawRecord>>(16);
        let router_handle: JoinHandle<BatcherSummary> = tokio::spawn(route_by_entity_type(
            input,
            batch_tx,
            self.options.clone(),
            cancel.clone(),
        ));

        tracing::info!(
            min_batch_size = self.options.min_batch_size,
            max_batch_size = self.options.max_batch_size,
            delay_secs = self.options.delay_interval_seconds,
            "Processing pipeline started"
        );

        while let Some(batch) = batch_rx.recv().await {
            let batch_id = batch.id;
            match self.process_batch(batch, &cancel).await {
                Ok(report) => {
                    tracing::debug!(
                        batch_id = %report.batch_id,
                        records = report.records,
                        entities = report.entities,
                        "Batch persisted"
                    );
                }
                Err(ProcessingError::Cancelled) => {
                    tracing::info!(batch_id = %batch_id, "Batch discarded on cancellation");
                    break;
                }
                Err(e) => {
                    tracing::warn!(batch_id = %batch_id, error = %e, "Batch abandoned");
                }
            }
        }

        match router_handle.await {
            Ok(summary) if summary.discarded > 0 => {
                tracing::info!(discarded = summary.discarded, "Partial batches discarded");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Record router task failed"),
        }

        let stats = self.stats();
        tracing::info!(
            batches_processed = stats.batches_processed,
            batches_failed = stats.batches_failed,
            "Processing pipeline stopped"
        );
        stats
    }

    /// Spawn [`run`](Self::run) on the runtime
    pub fn spawn(
        self: Arc<Self>,
        input: mpsc::Receiver<RawRecord>,
        cancel: CancellationToken,
    ) -> JoinHandle<PipelineStatsSnapshot> {
        tokio::spawn(async move { self.run(input, cancel).await })
    }

    /// Take one batch through every stage
    ///
    /// Nothing is written unless every stage before `Persisted` succeeds and
    /// the batch was not cancelled.
    pub async fn process_batch(
        &self,
        batch: Batch<RawRecord>,
        cancel: &CancellationToken,
    ) -> ProcessingResult<BatchReport> {
        let result = self.process_stages(&batch, cancel);

        match &result {
            Ok(report) => {
                self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .records_processed
                    .fetch_add(report.records as u64, Ordering::Relaxed);
                self.stats
                    .entities_persisted
                    .fetch_add(report.entities as u64, Ordering::Relaxed);
                metrics::record_batch(true, report.records);
            }
            Err(ProcessingError::Cancelled) => {}
            Err(_) => {
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_batch(false, batch.len());
            }
        }

        // Yield so stage observers and sibling tasks get a turn between batches
        tokio::task::yield_now().await;
        result
    }

    fn process_stages(
        &self,
        batch: &Batch<RawRecord>,
        cancel: &CancellationToken,
    ) -> ProcessingResult<BatchReport> {
        let mut tracker = BatchTracker::new(batch.id);
        self.complete(&mut tracker, ProcessingState::Raw)?;

        let payloads = self.transformer.validate(batch.id, &batch.items)?;
        self.complete(&mut tracker, ProcessingState::Validated)?;

        let normalized = self.transformer.normalize(payloads);
        self.complete(&mut tracker, ProcessingState::Normalized)?;

        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let entities = normalized.entity_count();
        self.persist(batch.id, normalized)?;
        self.complete(&mut tracker, ProcessingState::Persisted)?;

        Ok(BatchReport {
            batch_id: batch.id,
            records: batch.len(),
            entities,
        })
    }

    fn complete(&self, tracker: &mut BatchTracker, state: ProcessingState) -> ProcessingResult<()> {
        let event = tracker.advance(state)?;
        self.bus.publish(event);
        metrics::record_stage_completed(state.as_str());
        Ok(())
    }

    fn persist(&self, batch_id: Uuid, batch: NormalizedBatch) -> ProcessingResult<()> {
        self.sessions
            .scope(|session| {
                for venue in batch.venues {
                    session.repository::<Venue>().upsert(venue)?;
                }
                for act in batch.acts {
                    session.repository::<Act>().upsert(act)?;
                }
                for event in batch.events {
                    session.repository::<Event>().upsert(event)?;
                }
                for link in batch.event_acts {
                    session.repository::<EventAct>().upsert(link)?;
                }
                Ok(())
            })
            .map_err(|e| ProcessingError::PersistenceFailed {
                batch_id,
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Entity-type routing
// ============================================================================

/// Fan records out to one batcher per entity type, all feeding `output`
///
/// Lanes open on the first record of their type. `None` is the lane for
/// unrecognized tags. When the input closes every lane flushes its
/// remainder; on cancellation each lane discards its partial batch.
async fn route_by_entity_type(
    mut input: mpsc::Receiver<RawRecord>,
    output: mpsc::Sender<Batch<RawRecord>>,
    options: ProcessingOptions,
    cancel: CancellationToken,
) -> BatcherSummary {
    let mut lanes: HashMap<Option<EntityType>, mpsc::Sender<RawRecord>> = HashMap::new();
    let mut batchers: Vec<JoinHandle<BatcherSummary>> = Vec::new();

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = input.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        let lane = EntityType::parse(&record.entity_type);
        let sender = lanes.entry(lane).or_insert_with(|| {
            tracing::debug!(entity_type = ?lane, "Opening batch lane");
            let (tx, rx) = mpsc::channel(options.max_batch_size.max(1));
            let batcher = Batcher::new(options.clone());
            let output = output.clone();
            let cancel = cancel.clone();
            batchers.push(tokio::spawn(async move { batcher.run(rx, output, cancel).await }));
            tx
        });

        if sender.send(record).await.is_err() {
            tracing::debug!(entity_type = ?lane, "Batch lane closed, stopping router");
            break;
        }
    }

    // Closing the lanes lets each batcher flush and finish
    drop(lanes);
    drop(output);

    let mut summary = BatcherSummary::default();
    for handle in batchers {
        match handle.await {
            Ok(lane) => {
                summary.batches += lane.batches;
                summary.items += lane.items;
                summary.discarded += lane.discarded;
            }
            Err(e) => tracing::error!(error = %e, "Batcher task failed"),
        }
    }
    summary
}
