//! Control surface for batch runs
//!
//! `JobService` owns the tracker and one scheduler per live job. Everything a
//! front end needs (start, poll, cancel, inspect, wait) goes through here.

use super::item::{ItemId, ItemInput, ItemRecord, JobId, JobStatus, Progress};
use super::scheduler::{ItemCompletion, JobHandle, Scheduler, SchedulerError};
use super::tracker::{JobTracker, TrackerError};
use crate::config::WorkflowDefinition;
use crate::engine::{Interpreter, Program, ValidationFailure};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("job {0} is not running under this service")]
    NotRunning(JobId),
}

struct Run {
    workflow: String,
    scheduler: Scheduler,
    handle: Option<JobHandle>,
}

pub struct JobService {
    tracker: Arc<JobTracker>,
    interpreter: Arc<Interpreter>,
    runs: Mutex<HashMap<JobId, Run>>,
}

impl JobService {
    pub fn new(interpreter: Interpreter) -> Self {
        Self {
            tracker: Arc::new(JobTracker::new()),
            interpreter: Arc::new(interpreter),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Validate `workflow` and start running `inputs` on `concurrency` workers
    ///
    /// Nothing is registered when validation fails or the concurrency is out
    /// of range. Must be called from within a tokio runtime.
    pub fn create_run(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Vec<ItemInput>,
        concurrency: usize,
    ) -> Result<JobId, ServiceError> {
        let program = Arc::new(Program::compile(workflow)?);
        let scheduler = Scheduler::new(
            Arc::clone(&self.interpreter),
            Arc::clone(&self.tracker),
            concurrency,
        )?;

        let items: Vec<(ItemId, _)> = inputs.iter().map(ItemInput::bindings).enumerate().collect();
        let job_id = self.tracker.register(inputs);
        let handle = scheduler.submit(job_id, program, items);

        self.runs.lock().unwrap_or_else(PoisonError::into_inner).insert(
            job_id,
            Run {
                workflow: workflow.name.clone(),
                scheduler,
                handle: Some(handle),
            },
        );
        Ok(job_id)
    }

    pub fn get_progress(&self, job_id: JobId) -> Result<Progress, ServiceError> {
        Ok(self.tracker.snapshot(job_id)?)
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobStatus, ServiceError> {
        Ok(self.tracker.status(job_id)?)
    }

    pub fn get_item_result(&self, job_id: JobId, item_id: ItemId) -> Result<ItemRecord, ServiceError> {
        Ok(self.tracker.item(job_id, item_id)?)
    }

    pub fn items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, ServiceError> {
        Ok(self.tracker.items(job_id)?)
    }

    /// Name of the workflow a live job was started from
    pub fn workflow_name(&self, job_id: JobId) -> Option<String> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map(|run| run.workflow.clone())
    }

    /// Cancel pending items; running items finish normally
    pub fn cancel(&self, job_id: JobId) -> Result<usize, ServiceError> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        match runs.get(&job_id) {
            Some(run) => Ok(run.scheduler.cancel(job_id)?),
            // Finished or never started here: only the tracker can still act
            None => Ok(self.tracker.cancel_pending(job_id)?),
        }
    }

    /// Take the completion stream of a running job (once)
    pub fn completions(&self, job_id: JobId) -> Option<mpsc::UnboundedReceiver<ItemCompletion>> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&job_id)?
            .handle
            .as_mut()?
            .take_completions()
    }

    /// Wait until every worker of `job_id` has exited, then report final counts
    pub async fn wait(&self, job_id: JobId) -> Result<Progress, ServiceError> {
        let handle = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&job_id)
            .and_then(|run| run.handle.take())
            .ok_or(ServiceError::NotRunning(job_id))?;

        let waited = handle.wait().await;

        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        waited?;

        let progress = self.tracker.snapshot(job_id)?;
        tracing::info!(
            job_id = %job_id,
            done = progress.done,
            error = progress.error,
            cancelled = progress.cancelled,
            status = %progress.job_status(),
            "job finished"
        );
        Ok(progress)
    }
}
