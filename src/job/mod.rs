//! Batch jobs
//!
//! A job is one workflow applied to many items. [`JobTracker`] holds the
//! per-item state machine, [`Scheduler`] runs items on a bounded pool of
//! tokio tasks, and [`JobService`] ties both to a workflow definition.

mod dataset;
mod item;
mod scheduler;
mod service;
mod tracker;

pub use dataset::{load_rows, repeat_items, rows_to_items};
pub use item::{ItemId, ItemInput, ItemRecord, ItemStatus, JobId, JobStatus, Progress};
pub use scheduler::{
    ItemCompletion, JobHandle, MAX_CONCURRENCY, MIN_CONCURRENCY, Scheduler, SchedulerError,
};
pub use service::{JobService, ServiceError};
pub use tracker::{JobTracker, TrackerError};
