use std::sync::Arc;

use anyhow::{Context, Result};

use punchup::api::{ApiServer, AppState, StoreEventQueries};
use punchup::config::Config;
use punchup::scheduler::SchedulerLoop;

use super::runtime::Runtime;

/// Run the scheduler loop, the collection workers, the pipeline and the API
/// until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let cancel = runtime.cancel.clone();

    let scheduler = SchedulerLoop::new(runtime.config.trigger_config(), Arc::clone(&runtime.scheduling))
        .context("Invalid scheduler configuration")?;
    let scheduler_handle = scheduler.spawn(cancel.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_cancel.cancel();
    });

    let state = AppState::new(
        Arc::clone(&runtime.scheduling),
        Arc::new(StoreEventQueries::new(runtime.sessions.clone())),
    );
    let server = ApiServer::new(runtime.config.bind_address(), state);
    let served = server.serve(cancel.clone()).await;
    drop(server);

    // Stop everything even when the server failed to start
    cancel.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Scheduler loop task failed");
    }

    let stats = runtime.shutdown().await?;
    tracing::info!(
        batches_processed = stats.batches_processed,
        batches_failed = stats.batches_failed,
        entities_persisted = stats.entities_persisted,
        "Shutdown complete"
    );

    served.context("API server failed")
}
