pub mod admin;
pub mod runtime;
pub mod serve;

// Re-export command functions for convenience
pub use admin::{job_add, job_run, schedule_add, schedule_show, sku_add, source_add, tick};
pub use serve::serve;
