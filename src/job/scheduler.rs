//! Bounded worker pool over one shared queue
//!
//! `submit` enqueues every item up front and spawns exactly `concurrency`
//! workers. A worker checks the job's cancel flag, pops the next item, runs
//! it to a terminal state and reports a completion. Nothing interrupts a
//! running item; cancelling only stops further dequeues and flips the items
//! still pending.

use super::item::{ItemId, ItemStatus, JobId};
use super::tracker::{JobTracker, TrackerError};
use crate::engine::{ErrorDetail, Interpreter, Program};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 99;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {0}")]
    InvalidConcurrency(usize),

    #[error("worker for job {job} panicked: {message}")]
    WorkerPanicked { job: JobId, message: String },
}

/// Notification sent when an item reaches `done` or `error`
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCompletion {
    pub job_id: JobId,
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub error: Option<ErrorDetail>,
    pub turnaround_ms: u64,
}

/// Running job: its completion stream and its workers
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    completions: Option<mpsc::UnboundedReceiver<ItemCompletion>>,
    workers: Vec<JoinHandle<()>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Take the completion stream; it ends once every worker has exited
    pub fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<ItemCompletion>> {
        self.completions.take()
    }

    /// Wait for every worker to exit
    pub async fn wait(self) -> Result<(), SchedulerError> {
        for worker in self.workers {
            worker.await.map_err(|e| SchedulerError::WorkerPanicked {
                job: self.job_id,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

type Queue = Arc<Mutex<VecDeque<(ItemId, Map<String, Value>)>>>;

type CancelFlags = Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>>;

/// Shared by a job's workers; the last one to exit forgets the cancel flag
struct FlagLease {
    job_id: JobId,
    flags: CancelFlags,
}

impl Drop for FlagLease {
    fn drop(&mut self) {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

pub struct Scheduler {
    interpreter: Arc<Interpreter>,
    tracker: Arc<JobTracker>,
    concurrency: usize,
    cancel_flags: CancelFlags,
}

impl Scheduler {
    pub fn new(
        interpreter: Arc<Interpreter>,
        tracker: Arc<JobTracker>,
        concurrency: usize,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SchedulerError::InvalidConcurrency(concurrency));
        }
        Ok(Self {
            interpreter,
            tracker,
            concurrency,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start working through `items`, which must already be registered
    /// with the tracker under `job_id`
    pub fn submit(
        &self,
        job_id: JobId,
        program: Arc<Program>,
        items: Vec<(ItemId, Map<String, Value>)>,
    ) -> JobHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::clone(&cancelled));

        tracing::info!(
            job_id = %job_id,
            items = items.len(),
            concurrency = self.concurrency,
            workflow = program.name(),
            "job submitted"
        );

        let queue: Queue = Arc::new(Mutex::new(items.into()));
        let (tx, rx) = mpsc::unbounded_channel();
        let lease = Arc::new(FlagLease {
            job_id,
            flags: Arc::clone(&self.cancel_flags),
        });

        let workers = (0..self.concurrency)
            .map(|worker| {
                let ctx = Worker {
                    job_id,
                    program: Arc::clone(&program),
                    queue: Arc::clone(&queue),
                    cancelled: Arc::clone(&cancelled),
                    interpreter: Arc::clone(&self.interpreter),
                    tracker: Arc::clone(&self.tracker),
                    completions: tx.clone(),
                    _lease: Arc::clone(&lease),
                };
                let span = tracing::debug_span!("worker", job_id = %job_id, worker);
                tokio::spawn(ctx.run().instrument(span))
            })
            .collect();

        JobHandle {
            job_id,
            completions: Some(rx),
            workers,
        }
    }

    /// Stop dequeuing for `job_id` and cancel its pending items
    ///
    /// Once every worker of the job has exited only the tracker is touched.
    pub fn cancel(&self, job_id: JobId) -> Result<usize, TrackerError> {
        if let Some(flag) = self
            .cancel_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
        {
            flag.store(true, Ordering::SeqCst);
        }

        let count = self.tracker.cancel_pending(job_id)?;
        tracing::info!(job_id = %job_id, cancelled = count, "job cancelled");
        Ok(count)
    }
}

/// Everything one worker task owns
struct Worker {
    job_id: JobId,
    program: Arc<Program>,
    queue: Queue,
    cancelled: Arc<AtomicBool>,
    interpreter: Arc<Interpreter>,
    tracker: Arc<JobTracker>,
    completions: mpsc::UnboundedSender<ItemCompletion>,
    _lease: Arc<FlagLease>,
}

impl Worker {
    fn next_item(&self) -> Option<(ItemId, Map<String, Value>)> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn run(self) {
        while let Some((item_id, bindings)) = self.next_item() {
            // Lost a race with cancel_pending
            if let Err(e) = self.tracker.mark_running(self.job_id, item_id) {
                tracing::debug!(item_id, error = %e, "skipping item");
                continue;
            }

            let outcome = self.interpreter.run(&self.program, bindings).await;
            let turnaround_ms = outcome.turnaround_ms;
            let error = outcome.error.clone();

            let (status, recorded) = match error.clone() {
                None => (
                    ItemStatus::Done,
                    self.tracker.mark_done(self.job_id, item_id, outcome),
                ),
                Some(detail) => (
                    ItemStatus::Error,
                    self.tracker.mark_error(self.job_id, item_id, detail, outcome),
                ),
            };
            if let Err(e) = recorded {
                tracing::error!(item_id, error = %e, "failed to record item result");
                continue;
            }

            match &error {
                None => tracing::debug!(item_id, turnaround_ms, "item done"),
                Some(detail) => tracing::warn!(item_id, error = %detail, "item failed"),
            }

            // The receiver may be gone; results are in the tracker regardless
            let _ = self.completions.send(ItemCompletion {
                job_id: self.job_id,
                item_id,
                status,
                error,
                turnaround_ms,
            });
        }
    }
}
