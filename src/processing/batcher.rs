//! Windowed batch accumulator
//!
//! A single consumer buffers incoming items and races two flush triggers:
//! reaching `max_batch_size`, or `delay_interval_seconds` elapsing since the
//! first unflushed item. Whichever fires first wins and the timer restarts
//! with the next item.
//!
//! A timer flush emits whatever is buffered, even below `min_batch_size`, so
//! latency stays bounded. When the input closes the remainder is flushed;
//! on cancellation the partial batch is discarded.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::options::ProcessingOptions;

/// Why a batch was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Reached `max_batch_size`
    Size,
    /// `delay_interval_seconds` elapsed
    Timer,
    /// Input stream completed
    Final,
}

/// A flushed group of items
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub id: Uuid,
    pub items: Vec<T>,
    pub trigger: FlushTrigger,
}

impl<T> Batch<T> {
    pub fn new(items: Vec<T>, trigger: FlushTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            items,
            trigger,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How a batcher run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatcherSummary {
    pub batches: u64,
    pub items: u64,
    /// Items dropped by cancellation
    pub discarded: u64,
}

/// Single-consumer accumulator
pub struct Batcher {
    options: ProcessingOptions,
}

impl Batcher {
    pub fn new(options: ProcessingOptions) -> Self {
        Self { options }
    }

    /// Consume `input` until it closes or `cancel` fires, sending batches to `output`
    pub async fn run<T: Send>(
        &self,
        mut input: mpsc::Receiver<T>,
        output: mpsc::Sender<Batch<T>>,
        cancel: CancellationToken,
    ) -> BatcherSummary {
        let max = self.options.max_batch_size.max(1);
        let delay = self.options.delay();

        let mut summary = BatcherSummary::default();
        let mut buffer: Vec<T> = Vec::with_capacity(max);
        let mut deadline: Option<Instant> = None;

        loop {
            let trigger = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if !buffer.is_empty() {
                        tracing::debug!(discarded = buffer.len(), "Batcher cancelled, discarding partial batch");
                    }
                    summary.discarded += buffer.len() as u64;
                    return summary;
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    FlushTrigger::Timer
                }

                item = input.recv() => match item {
                    Some(item) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + delay);
                        }
                        buffer.push(item);
                        if buffer.len() < max {
                            continue;
                        }
                        FlushTrigger::Size
                    }
                    None => {
                        if !buffer.is_empty() {
                            let batch = Batch::new(std::mem::take(&mut buffer), FlushTrigger::Final);
                            summary.batches += 1;
                            summary.items += batch.len() as u64;
                            tracing::debug!(batch_id = %batch.id, size = batch.len(), "Final flush");
                            let _ = output.send(batch).await;
                        }
                        return summary;
                    }
                },
            };

            deadline = None;
            let batch = Batch::new(std::mem::replace(&mut buffer, Vec::with_capacity(max)), trigger);
            summary.batches += 1;
            summary.items += batch.len() as u64;
            tracing::debug!(batch_id = %batch.id, size = batch.len(), trigger = ?trigger, "Flushing batch");

            if output.send(batch).await.is_err() {
                tracing::warn!("Batch consumer closed, stopping batcher");
                return summary;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_flushes_at_max() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let batcher = Batcher::new(ProcessingOptions::new(2, 3, 60));
        let handle = tokio::spawn(async move {
            batcher.run(in_rx, out_tx, CancellationToken::new()).await
        });

        for i in 0..7 {
            in_tx.send(i).await.unwrap();
        }
        drop(in_tx);

        let mut sizes = Vec::new();
        while let Some(batch) = out_rx.recv().await {
            sizes.push((batch.len(), batch.trigger));
        }
        assert_eq!(
            sizes,
            vec![
                (3, FlushTrigger::Size),
                (3, FlushTrigger::Size),
                (1, FlushTrigger::Final)
            ]
        );

        let summary = handle.await.unwrap();
        assert_eq!(summary.items, 7);
        assert_eq!(summary.batches, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_discards_partial_batch() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel::<Batch<u32>>(16);
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(ProcessingOptions::new(5, 10, 30));

        let token = cancel.clone();
        let handle = tokio::spawn(async move { batcher.run(in_rx, out_tx, token).await });

        in_tx.send(1).await.unwrap();
        in_tx.send(2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.discarded, 2);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_restarts_after_flush() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let batcher = Batcher::new(ProcessingOptions::new(1, 100, 5));
        tokio::spawn(async move { batcher.run(in_rx, out_tx, CancellationToken::new()).await });

        in_tx.send("a").await.unwrap();
        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.trigger, FlushTrigger::Timer);
        let first_at = Instant::now();

        tokio::time::sleep(Duration::from_secs(3)).await;
        in_tx.send("b").await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second.items, vec!["b"]);
        assert!(Instant::now() - first_at >= Duration::from_secs(8));
    }
}
