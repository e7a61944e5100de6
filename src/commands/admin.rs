//! One-shot administrative commands
//!
//! Each command starts the runtime, applies one operation, drains queued
//! work and prints the result as JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use punchup::config::Config;
use punchup::models::{Execution, SkuType};
use punchup::scheduler::{
    CreateJobCommand, CreateScheduleCommand, CreateSkuCommand, CreateSourceCommand,
};
use punchup::storage::Repository;

use super::runtime::Runtime;

#[derive(Serialize)]
struct Created {
    id: Uuid,
}

/// Drain the runtime, then print the outcome
async fn finish<T: Serialize>(runtime: Runtime, outcome: Result<T>) -> Result<()> {
    let stats = runtime.drain().await?;
    tracing::debug!(
        batches_processed = stats.batches_processed,
        entities_persisted = stats.entities_persisted,
        "Runtime drained"
    );

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

/// Evaluate every schedule once
pub async fn tick(config: Config, at: Option<DateTime<Utc>>) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let now = at.unwrap_or_else(Utc::now);
    let outcome = runtime.scheduling.tick(now, &runtime.cancel).await.map_err(Into::into);
    finish(runtime, outcome).await
}

pub async fn source_add(config: Config, name: String, website: String) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let outcome = runtime
        .scheduling
        .create_source(CreateSourceCommand { name, website })
        .map(|id| Created { id })
        .map_err(Into::into);
    finish(runtime, outcome).await
}

pub async fn sku_add(config: Config, source_id: Uuid, name: String, sku_type: &str) -> Result<()> {
    let sku_type: SkuType = sku_type.parse().context("Invalid SKU type")?;
    let runtime = Runtime::start(config)?;
    let outcome = runtime
        .scheduling
        .create_sku(CreateSkuCommand {
            source_id,
            name,
            sku_type,
        })
        .map(|id| Created { id })
        .map_err(Into::into);
    finish(runtime, outcome).await
}

pub async fn schedule_add(
    config: Config,
    source_id: Uuid,
    sku_id: Uuid,
    name: String,
    cron_expression: Option<String>,
) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let outcome = runtime
        .scheduling
        .create_schedule(CreateScheduleCommand {
            source_id,
            sku_id,
            name,
            cron_expression,
        })
        .map(|id| Created { id })
        .map_err(Into::into);
    finish(runtime, outcome).await
}

pub async fn schedule_show(config: Config, id: Uuid) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let outcome = runtime
        .scheduling
        .get_schedule(id)
        .map_err(anyhow::Error::from)
        .and_then(|schedule| schedule.with_context(|| format!("Schedule {id} not found")));
    finish(runtime, outcome).await
}

pub async fn job_add(
    config: Config,
    source: String,
    sku: String,
    name: String,
    cron_expression: Option<String>,
    urls: Vec<String>,
) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let outcome = runtime
        .scheduling
        .create_job(CreateJobCommand {
            source,
            sku,
            name,
            cron_expression,
            sitemaps: (!urls.is_empty()).then_some(urls),
        })
        .map(|id| Created { id })
        .map_err(Into::into);
    finish(runtime, outcome).await
}

/// Dispatch a job, wait for its execution, and print every execution of it
pub async fn job_run(config: Config, id: Uuid) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let sessions = runtime.sessions.clone();
    let dispatched = runtime.scheduling.run_job(id).await;

    let stats = runtime.drain().await?;
    dispatched?;
    tracing::info!(
        job_id = %id,
        batches_processed = stats.batches_processed,
        entities_persisted = stats.entities_persisted,
        "Job run finished"
    );

    let mut executions = sessions
        .begin()
        .repository::<Execution>()
        .query(&|e| e.job_id == id)?;
    executions.sort_by_key(|e| e.started_at);

    println!("{}", serde_json::to_string_pretty(&executions)?);
    Ok(())
}
