//! In-memory job registry.
//!
//! One long-lived registry is owned by the service and handed by reference to the worker pool
//! and to status queries. The outer map is only write-locked to insert or evict; every job has
//! its own mutex so concurrent file completions on different jobs never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tracing::{debug, info};

use crate::aggregate::job_status;
use crate::job::{FileOutcome, FileTask, Job, JobId, JobResults, JobSnapshot, JobStatus};
use crate::{Error, Result};

type JobCell = Arc<Mutex<Job>>;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobCell>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created job (status `queued`).
    pub fn insert(&self, job: Job) -> JobSnapshot {
        let snapshot = job.snapshot();
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id, Arc::new(Mutex::new(job)));
        snapshot
    }

    /// Attach the discovered file set and move the job to `processing`.
    ///
    /// A job with no files has nothing left to do and completes immediately.
    pub fn begin(&self, id: JobId, tasks: Vec<FileTask>) -> Result<JobSnapshot> {
        let cell = self.cell(id)?;
        let mut job = lock(&cell);
        if job.status != JobStatus::Queued {
            return Err(Error::Conflict(format!(
                "job {id} cannot start from status {}",
                job.status.as_str()
            )));
        }

        job.total_files = tasks.len();
        job.processed_files = 0;
        job.tasks = tasks;
        if job.tasks.is_empty() {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
        } else {
            job.status = JobStatus::Processing;
        }

        debug!(
            job_id = %id,
            total_files = job.total_files,
            status = job.status.as_str(),
            "job started"
        );
        Ok(job.snapshot())
    }

    /// Record a job-scoped failure that prevented the job from starting.
    pub fn fail(&self, id: JobId, message: impl Into<String>) -> Result<JobSnapshot> {
        let cell = self.cell(id)?;
        let mut job = lock(&cell);
        job.status = JobStatus::Failed;
        job.error = Some(message.into());
        job.finished_at = Some(Utc::now());
        job.finalized = true;
        Ok(job.snapshot())
    }

    /// Move one file to its terminal state.
    ///
    /// Returns the job's terminal status when this was the last pending file. Resolving a file
    /// twice is rejected and leaves the counters untouched.
    pub fn resolve(
        &self,
        id: JobId,
        index: usize,
        outcome: FileOutcome,
    ) -> Result<Option<JobStatus>> {
        let cell = self.cell(id)?;
        let mut job = lock(&cell);

        let task = job
            .tasks
            .get_mut(index)
            .ok_or_else(|| Error::msg(format!("job {id} has no file #{index}")))?;
        if task.state.is_terminal() {
            return Err(Error::Conflict(format!(
                "file '{}' of job {id} is already resolved",
                task.source.path
            )));
        }

        task.state = outcome.state();
        match outcome {
            FileOutcome::Skipped(result) | FileOutcome::Succeeded(result) => {
                task.result = Some(result);
            }
            FileOutcome::Failed(error) => task.error = Some(error),
        }

        job.processed_files += 1;
        debug!(
            job_id = %id,
            processed_files = job.processed_files,
            total_files = job.total_files,
            "file resolved"
        );

        if job.processed_files < job.total_files {
            return Ok(None);
        }

        let status = job_status(&job.tasks);
        job.status = status;
        job.finished_at = Some(Utc::now());
        info!(job_id = %id, status = status.as_str(), "job finished");
        Ok(Some(status))
    }

    /// Record where the combined document was written and mark the job finalized.
    pub fn set_combined(&self, id: JobId, path: std::path::PathBuf) -> Result<()> {
        let cell = self.cell(id)?;
        let mut job = lock(&cell);
        job.combined_document = Some(path);
        job.finalized = true;
        Ok(())
    }

    /// Record why the combined document could not be written and mark the job finalized.
    ///
    /// The job's status is left alone.
    pub fn set_combined_error(&self, id: JobId, message: impl Into<String>) -> Result<()> {
        let cell = self.cell(id)?;
        let mut job = lock(&cell);
        job.error = Some(message.into());
        job.finalized = true;
        Ok(())
    }

    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        let cell = self.cell(id)?;
        let job = lock(&cell);
        Ok(job.snapshot())
    }

    /// Per-file results. Only available once the job is terminal.
    pub fn results(&self, id: JobId) -> Result<JobResults> {
        let cell = self.cell(id)?;
        let job = lock(&cell);
        if !job.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {id} is still {}",
                job.status.as_str()
            )));
        }
        Ok(job.results())
    }

    /// A point-in-time copy of the whole job.
    pub fn job(&self, id: JobId) -> Result<Job> {
        let cell = self.cell(id)?;
        let job = lock(&cell);
        Ok(job.clone())
    }

    /// Every known job, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .cells()
            .iter()
            .map(|cell| lock(cell).snapshot())
            .collect();
        out.sort_by_key(|snap| snap.created_at);
        out
    }

    /// Number of jobs currently in each status.
    pub fn status_counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for cell in self.cells() {
            *counts.entry(lock(&cell).status).or_insert(0) += 1;
        }
        counts
    }

    /// Drop a terminal, finalized job from the registry.
    pub fn evict(&self, id: JobId) -> Result<JobSnapshot> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let cell = jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let (snapshot, finalized) = {
            let job = lock(&cell);
            (job.snapshot(), job.finalized)
        };
        if !snapshot.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {id} is still {}",
                snapshot.status.as_str()
            )));
        }
        if !finalized {
            return Err(Error::Conflict(format!(
                "job {id} is still writing its combined document"
            )));
        }

        jobs.remove(&id);
        info!(job_id = %id, "job evicted");
        Ok(snapshot)
    }

    fn cell(&self, id: JobId) -> Result<JobCell> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn cells(&self) -> Vec<JobCell> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }
}

fn lock(cell: &JobCell) -> MutexGuard<'_, Job> {
    cell.lock().unwrap_or_else(|e| e.into_inner())
}
