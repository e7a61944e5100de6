//! Scheduler to collection hand-off

use async_trait::async_trait;

use super::commands::StartSpaCollectionJobCommand;
use super::error::SchedulerResult;

/// Accepts collection jobs
///
/// `dispatch` returns once the job is queued, not when it finishes.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, command: StartSpaCollectionJobCommand) -> SchedulerResult<()>;
}
