//! Job scheduling
//!
//! This module turns cron-bound [`Schedule`](crate::models::Schedule)s into
//! [`Job`](crate::models::Job)s and hands them to the collection subsystem.
//!
//! # Components
//!
//! - [`commands`] - Inbound command payloads
//! - [`cron`] - Cron parsing and occurrence windows
//! - [`service`] - `SchedulingService`: commands, idempotent ticks, dispatch with backoff
//! - [`trigger`] - `SchedulerLoop`: the periodic timer
//! - [`dispatch`] - `JobDispatcher`: the hand-off seam to collection
//!
//! # Example
//!
//! ```ignore
//! use punchup::scheduler::{SchedulerLoop, SchedulingService, TriggerConfig};
//!
//! let service = Arc::new(SchedulingService::new(sessions, dispatcher, options));
//! let handle = SchedulerLoop::new(TriggerConfig::default(), service)?.spawn(cancel.clone());
//! ```

pub mod commands;
pub mod cron;
pub mod dispatch;
pub mod error;
pub mod service;
pub mod trigger;

pub use commands::{
    CreateJobCommand, CreateScheduleCommand, CreateSitemapCommand, CreateSkuCommand,
    CreateSourceCommand, SetCollectionConfigCommand, StartSpaCollectionJobCommand,
};
pub use self::cron::CronSchedule;
pub use dispatch::JobDispatcher;
pub use error::{SchedulerError, SchedulerResult};
pub use service::{ScheduleFailure, SchedulingOptions, SchedulingService, TickReport};
pub use trigger::{SchedulerLoop, TriggerConfig};
