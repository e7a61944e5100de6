//! Collection options and per-context settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::CollectionConfig;

/// Default desktop user agent for scraper contexts
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Global collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Worker pool size: the cap on simultaneously open scraper contexts
    pub concurrency: usize,

    /// Jobs waiting for a worker before `dispatch` applies back-pressure
    pub queue_capacity: usize,

    /// Request rate shared by every scraper
    pub requests_per_second: u32,

    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            queue_capacity: 100,
            requests_per_second: 5,
            viewport_width: 1280,
            viewport_height: 800,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Settings of one isolated scraper context
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserContextOptions {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    pub navigation_timeout: Duration,
}

impl BrowserContextOptions {
    /// Global options with the per-source configuration merged over them
    pub fn resolve(
        options: &CollectionOptions,
        source_config: Option<&CollectionConfig>,
        navigation_timeout: Duration,
    ) -> Self {
        let mut context = Self {
            viewport_width: options.viewport_width,
            viewport_height: options.viewport_height,
            user_agent: options.user_agent.clone(),
            navigation_timeout,
        };

        if let Some(config) = source_config {
            context.viewport_width = config.viewport_width;
            context.viewport_height = config.viewport_height;
            if let Some(agent) = &config.user_agent {
                context.user_agent = agent.clone();
            }
        }

        context
    }
}

impl Default for BrowserContextOptions {
    fn default() -> Self {
        Self::resolve(&CollectionOptions::default(), None, Duration::from_secs(30))
    }
}
