//! Infrastructure layer: queue drivers, job execution, workers, config.

pub mod config;
pub mod jobs;
pub mod queue;
pub mod workers;

pub use config::{LocalHostConfig, ManagedQueueConfig, SchedulerConfig};
