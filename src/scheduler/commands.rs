//! Inbound command payloads
//!
//! Every command deserializes from `snake_case` JSON, so the HTTP API and
//! the CLI share the same shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SkuType;

/// Register a content provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSourceCommand {
    pub name: String,
    pub website: String,
}

/// Register a unit of schedulable work under a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSkuCommand {
    pub source_id: Uuid,
    pub name: String,
    #[serde(rename = "type", alias = "sku_type")]
    pub sku_type: SkuType,
}

/// Bind a SKU to an optional cron expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateScheduleCommand {
    pub source_id: Uuid,
    pub sku_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

/// Create a job, resolving source and SKU by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJobCommand {
    pub source: String,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// URLs bound to the job as a new sitemap
    #[serde(default)]
    pub sitemaps: Option<Vec<String>>,
}

/// Register a URL target list for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSitemapCommand {
    pub source_id: Uuid,
    pub name: String,
    pub urls: Vec<String>,
}

/// Set the per-source scraping configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCollectionConfigCommand {
    pub source_id: Uuid,
    #[serde(default)]
    pub viewport_width: Option<u32>,
    #[serde(default)]
    pub viewport_height: Option<u32>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Hand a job to the collection subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSpaCollectionJobCommand {
    pub job_id: Uuid,
    pub sku_id: Uuid,
    pub sku_name: String,
}
