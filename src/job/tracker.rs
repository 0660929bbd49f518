//! Per-item status machine and progress aggregation
//!
//! Each item sits behind its own mutex, so workers touching different items
//! never contend and a transition is always checked against the status it
//! replaces. Job status is never stored; it is derived from the item counts.

use super::item::{ItemId, ItemInput, ItemRecord, ItemStatus, JobId, JobStatus, Progress};
use crate::engine::{ErrorDetail, ItemOutcome};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackerError {
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("job {job} has no item {item}")]
    UnknownItem { job: JobId, item: ItemId },

    #[error("item {item} of job {job} cannot go from {from} to {to}")]
    IllegalTransition {
        job: JobId,
        item: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
}

#[derive(Debug)]
struct JobEntry {
    items: Vec<Mutex<ItemRecord>>,
}

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    next_id: AtomicU64,
}

fn lock(item: &Mutex<ItemRecord>) -> MutexGuard<'_, ItemRecord> {
    item.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job whose items all start `pending`
    pub fn register(&self, inputs: Vec<ItemInput>) -> JobId {
        let job = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let items = inputs
            .into_iter()
            .enumerate()
            .map(|(id, input)| Mutex::new(ItemRecord::pending(id, input)))
            .collect();

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job, Arc::new(JobEntry { items }));
        job
    }

    fn entry(&self, job: JobId) -> Result<Arc<JobEntry>, TrackerError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job)
            .cloned()
            .ok_or(TrackerError::UnknownJob(job))
    }

    /// Apply `update` to one item if it currently has status `from`
    fn transition(
        &self,
        job: JobId,
        item: ItemId,
        from: ItemStatus,
        to: ItemStatus,
        update: impl FnOnce(&mut ItemRecord),
    ) -> Result<(), TrackerError> {
        let entry = self.entry(job)?;
        let cell = entry
            .items
            .get(item)
            .ok_or(TrackerError::UnknownItem { job, item })?;

        let mut record = lock(cell);
        if record.status != from {
            return Err(TrackerError::IllegalTransition {
                job,
                item,
                from: record.status,
                to,
            });
        }
        record.status = to;
        update(&mut record);
        Ok(())
    }

    pub fn mark_running(&self, job: JobId, item: ItemId) -> Result<(), TrackerError> {
        self.transition(job, item, ItemStatus::Pending, ItemStatus::Running, |r| {
            r.started_at = Some(Utc::now());
        })
    }

    pub fn mark_done(&self, job: JobId, item: ItemId, outcome: ItemOutcome) -> Result<(), TrackerError> {
        self.transition(job, item, ItemStatus::Running, ItemStatus::Done, |r| {
            r.output_rows = outcome.output_rows;
            r.raw_text = outcome.raw_text;
            r.turnaround_ms = outcome.turnaround_ms;
            r.finished_at = Some(Utc::now());
        })
    }

    /// Record a failure; rows and raw text produced before it are kept
    pub fn mark_error(
        &self,
        job: JobId,
        item: ItemId,
        detail: ErrorDetail,
        outcome: ItemOutcome,
    ) -> Result<(), TrackerError> {
        self.transition(job, item, ItemStatus::Running, ItemStatus::Error, |r| {
            r.error = Some(detail);
            r.output_rows = outcome.output_rows;
            r.raw_text = outcome.raw_text;
            r.turnaround_ms = outcome.turnaround_ms;
            r.finished_at = Some(Utc::now());
        })
    }

    /// Cancel every item that is `pending` at the moment its lock is taken
    pub fn cancel_pending(&self, job: JobId) -> Result<usize, TrackerError> {
        let entry = self.entry(job)?;
        let mut cancelled = 0;
        for cell in &entry.items {
            let mut record = lock(cell);
            if record.status == ItemStatus::Pending {
                record.status = ItemStatus::Cancelled;
                record.finished_at = Some(Utc::now());
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub fn snapshot(&self, job: JobId) -> Result<Progress, TrackerError> {
        let entry = self.entry(job)?;
        Ok(Progress::from_statuses(
            entry.items.iter().map(|cell| lock(cell).status),
        ))
    }

    pub fn status(&self, job: JobId) -> Result<JobStatus, TrackerError> {
        Ok(self.snapshot(job)?.job_status())
    }

    pub fn item(&self, job: JobId, item: ItemId) -> Result<ItemRecord, TrackerError> {
        let entry = self.entry(job)?;
        entry
            .items
            .get(item)
            .map(|cell| lock(cell).clone())
            .ok_or(TrackerError::UnknownItem { job, item })
    }

    /// Copies of every item record, in item order
    pub fn items(&self, job: JobId) -> Result<Vec<ItemRecord>, TrackerError> {
        let entry = self.entry(job)?;
        Ok(entry.items.iter().map(|cell| lock(cell).clone()).collect())
    }
}
