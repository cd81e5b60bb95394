//! The worker pool: every file of a job, under a shared concurrency bound.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::engine::TranscriptionEngine;
use crate::error::ErrorKind;
use crate::job::{FileError, FileOutcome, JobId, JobStatus};
use crate::registry::JobRegistry;
use crate::source::FolderSource;
use crate::worker::{FileWorker, WorkItem};

/// Runs a job's files concurrently and reports each outcome to the registry as it lands.
///
/// Design:
/// - one task per file, all spawned up front; each waits for a permit before doing any work
/// - the permit pool is shared with every other job of the same service
/// - outcomes are applied to the registry from this single loop, in completion order
pub struct WorkerPool<E, S> {
    worker: FileWorker<E, S>,
    permits: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
}

impl<E, S> WorkerPool<E, S>
where
    E: TranscriptionEngine,
    S: FolderSource,
{
    pub fn new(
        worker: FileWorker<E, S>,
        permits: Arc<Semaphore>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            worker,
            permits,
            registry,
        }
    }

    /// Process `items` (index-aligned with the job's file tasks) to completion.
    ///
    /// Returns the job's terminal status, or `None` if the job was already terminal or could
    /// not be finalized.
    pub async fn run(&self, job_id: JobId, items: Vec<WorkItem>) -> Option<JobStatus> {
        let mut set = JoinSet::new();
        let mut indices = HashMap::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let worker = self.worker.clone();
            let permits = Arc::clone(&self.permits);
            let handle = set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return FileOutcome::Failed(FileError {
                        kind: ErrorKind::Internal,
                        message: "worker pool shut down".to_owned(),
                    });
                };
                worker.run(&item).await
            });
            indices.insert(handle.id(), index);
        }

        let mut terminal = None;
        while let Some(joined) = set.join_next_with_id().await {
            let (index, outcome) = match joined {
                Ok((id, outcome)) => (indices.get(&id).copied(), outcome),
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "file task panicked");
                    let outcome = FileOutcome::Failed(FileError {
                        kind: ErrorKind::Internal,
                        message: format!("file task failed: {err}"),
                    });
                    (indices.get(&err.id()).copied(), outcome)
                }
            };

            let Some(index) = index else {
                warn!(job_id = %job_id, "finished task has no file");
                continue;
            };

            match self.registry.resolve(job_id, index, outcome) {
                Ok(Some(status)) => terminal = Some(status),
                Ok(None) => {}
                Err(err) => {
                    error!(job_id = %job_id, index, error = %err, "failed to record file outcome")
                }
            }
        }

        terminal
    }
}
