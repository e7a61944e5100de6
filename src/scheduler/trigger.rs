//! Periodic tick driver
//!
//! One timer per process calls [`SchedulingService::tick`]. Missed timer
//! ticks are skipped rather than bursted, and a failed tick is logged
//! without stopping the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::{SchedulerError, SchedulerResult};
use super::service::{SchedulingService, TickReport};

// ============================================================================
// Loop Configuration
// ============================================================================

/// Configuration for the scheduler loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Seconds between ticks
    pub tick_interval_secs: u64,

    /// Whether to tick immediately when the loop starts
    pub tick_on_startup: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            tick_on_startup: true,
        }
    }
}

impl TriggerConfig {
    /// Validate configuration
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(SchedulerError::trigger_config(
                "tick_interval_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

// ============================================================================
// Scheduler Loop
// ============================================================================

/// Drives ticks until cancelled
pub struct SchedulerLoop {
    config: TriggerConfig,
    service: Arc<SchedulingService>,
    event_sender: broadcast::Sender<TickReport>,
}

impl SchedulerLoop {
    pub fn new(config: TriggerConfig, service: Arc<SchedulingService>) -> SchedulerResult<Self> {
        config.validate()?;

        let (event_sender, _) = broadcast::channel(100);

        Ok(Self {
            config,
            service,
            event_sender,
        })
    }

    /// Subscribe to tick reports
    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.event_sender.subscribe()
    }

    /// Run until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first interval tick completes immediately
        if !self.config.tick_on_startup {
            interval.tick().await;
        }

        tracing::info!(
            interval_secs = self.config.tick_interval_secs,
            "Scheduler loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.handle_tick(&cancel).await;
                }
            }
        }

        tracing::info!("Scheduler loop stopped");
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn handle_tick(&self, cancel: &CancellationToken) {
        match self.service.tick(Utc::now(), cancel).await {
            Ok(report) => {
                let _ = self.event_sender.send(report);
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduler tick failed, continuing");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::commands::StartSpaCollectionJobCommand;
    use crate::scheduler::dispatch::JobDispatcher;
    use crate::scheduler::service::SchedulingOptions;
    use crate::storage::SessionFactory;
    use async_trait::async_trait;

    struct NoopDispatcher;

    #[async_trait]
    impl JobDispatcher for NoopDispatcher {
        async fn dispatch(&self, _command: StartSpaCollectionJobCommand) -> SchedulerResult<()> {
            Ok(())
        }
    }

    fn service() -> Arc<SchedulingService> {
        Arc::new(SchedulingService::new(
            SessionFactory::in_memory(),
            Arc::new(NoopDispatcher),
            SchedulingOptions::default(),
        ))
    }

    #[test]
    fn test_trigger_config_validate() {
        assert!(TriggerConfig::default().validate().is_ok());

        let config = TriggerConfig {
            tick_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(SchedulerLoop::new(config, service()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_cancelled() {
        let config = TriggerConfig {
            tick_interval_secs: 10,
            tick_on_startup: true,
        };
        let scheduler = SchedulerLoop::new(config, service()).unwrap();
        let mut reports = scheduler.subscribe();

        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        // Startup tick plus two interval ticks
        for _ in 0..3 {
            let report = reports.recv().await.unwrap();
            assert!(!report.skipped);
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
