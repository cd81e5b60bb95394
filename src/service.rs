//! The long-lived transcription service.
//!
//! `TranscriptionService` owns the job registry and the shared engine permits. Frontends (the
//! HTTP server, the CLI) hold one instance and call into it; nothing here reads process state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::aggregate;
use crate::artifacts::ArtifactPaths;
use crate::config::PipelineConfig;
use crate::engine::TranscriptionEngine;
use crate::job::{FileTask, Job, JobId, JobResults, JobSnapshot};
use crate::pool::WorkerPool;
use crate::registry::JobRegistry;
use crate::source::FolderSource;
use crate::worker::{FileWorker, WorkItem};
use crate::{Error, Result};

/// One job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Folder reference understood by the service's folder source.
    pub folder: String,

    /// Descend into subfolders.
    #[serde(default = "default_recursive")]
    pub recursive: bool,

    /// Where artifacts go. Defaults to `<output_root>/<job_id>`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Per-job override of the configured maximum audio size.
    #[serde(default)]
    pub max_file_size_bytes: Option<u64>,
}

fn default_recursive() -> bool {
    true
}

impl JobRequest {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            recursive: default_recursive(),
            output_dir: None,
            max_file_size_bytes: None,
        }
    }
}

/// A job that has been accepted and is running in the background.
#[derive(Debug)]
pub struct Submitted {
    pub snapshot: JobSnapshot,
    /// Completes once the job is terminal and its combined document has been written.
    pub task: JoinHandle<()>,
}

/// The high-level entry point: submit folders, query jobs.
pub struct TranscriptionService<E, S> {
    engine: Arc<E>,
    source: Arc<S>,
    config: Arc<PipelineConfig>,
    registry: Arc<JobRegistry>,
    permits: Arc<Semaphore>,
}

impl<E, S> Clone for TranscriptionService<E, S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            source: Arc::clone(&self.source),
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<E, S> TranscriptionService<E, S>
where
    E: TranscriptionEngine,
    S: FolderSource,
{
    pub fn new(engine: E, source: S, config: PipelineConfig) -> Result<Self> {
        Self::with_registry(engine, source, config, Arc::new(JobRegistry::new()))
    }

    /// Build a service around an existing registry.
    pub fn with_registry(
        engine: E,
        source: S,
        config: PipelineConfig,
        registry: Arc<JobRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_files));
        Ok(Self {
            engine: Arc::new(engine),
            source: Arc::new(source),
            config: Arc::new(config),
            registry,
            permits,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Accept a job: register it, list its files, and start processing in the background.
    ///
    /// Listing happens before this returns, so a discovery failure is reported here and the
    /// job is recorded as `failed` without ever reaching `processing`.
    pub async fn submit(&self, request: JobRequest) -> Result<Submitted> {
        let folder = request.folder.trim().to_owned();
        if folder.is_empty() {
            return Err(Error::msg("folder must not be empty"));
        }

        let id = JobId::new();
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.output_root.join(id.to_string()));
        self.registry
            .insert(Job::new(id, folder.clone(), output_dir.clone()));
        info!(job_id = %id, folder = %folder, output_dir = %output_dir.display(), "job submitted");

        let files = match self.source.list(&folder, request.recursive).await {
            Ok(files) => files,
            Err(err) => {
                let err = match err {
                    Error::Discovery(_) => err,
                    other => Error::discovery(other.to_string()),
                };
                warn!(job_id = %id, error = %err, "discovery failed");
                self.registry.fail(id, err.to_string())?;
                return Err(err);
            }
        };

        let max_file_size_bytes = request
            .max_file_size_bytes
            .unwrap_or(self.config.max_audio_size_bytes);

        // Artifact names keep only the stem, so `a/talk.wav` and `b/talk.mp3` collide. The
        // first file in discovery order owns the names; later ones fail instead of being skipped.
        let mut owners: HashMap<PathBuf, String> = HashMap::new();
        let mut tasks = Vec::with_capacity(files.len());
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let artifacts = ArtifactPaths::for_source(&output_dir, &file.name);
            let artifacts_owner = owners.get(&artifacts.json).cloned();
            if let Some(owner) = &artifacts_owner {
                warn!(job_id = %id, file = %file.path, owner = %owner, "artifact name collision");
            } else {
                owners.insert(artifacts.json.clone(), file.path.clone());
            }
            items.push(WorkItem {
                folder: folder.clone(),
                file: file.clone(),
                artifacts: artifacts.clone(),
                max_file_size_bytes,
                artifacts_owner,
            });
            tasks.push(FileTask::new(file, artifacts));
        }

        let snapshot = self.registry.begin(id, tasks)?;

        let pool = WorkerPool::new(
            FileWorker::new(
                Arc::clone(&self.engine),
                Arc::clone(&self.source),
                Arc::clone(&self.config),
            ),
            Arc::clone(&self.permits),
            Arc::clone(&self.registry),
        );
        let registry = Arc::clone(&self.registry);
        let task = tokio::spawn(
            async move {
                pool.run(id, items).await;
                finalize(&registry, id).await;
            }
            .instrument(info_span!("job", job_id = %id)),
        );

        Ok(Submitted { snapshot, task })
    }

    pub fn status(&self, id: JobId) -> Result<JobSnapshot> {
        self.registry.snapshot(id)
    }

    /// Per-file outcomes; a conflict error until the job is terminal.
    pub fn results(&self, id: JobId) -> Result<JobResults> {
        self.registry.results(id)
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        self.registry.list()
    }

    pub fn evict(&self, id: JobId) -> Result<JobSnapshot> {
        self.registry.evict(id)
    }
}

/// Write the combined document for a terminal job and record where it went.
///
/// A failure here is job-level metadata only; file outcomes and the status are already final.
async fn finalize(registry: &JobRegistry, id: JobId) {
    let job = match registry.job(id) {
        Ok(job) => job,
        Err(err) => {
            error!(error = %err, "job vanished before finalizing");
            return;
        }
    };
    if !job.status.is_terminal() {
        error!(status = job.status.as_str(), "job did not reach a terminal status");
        return;
    }

    let recorded = match aggregate::write_combined(&job).await {
        Ok((path, _)) => registry.set_combined(id, path),
        Err(err) => {
            error!(error = %err, "failed to write combined document");
            registry.set_combined_error(id, format!("combined document: {err}"))
        }
    };
    if let Err(err) = recorded {
        warn!(error = %err, "failed to record combined document");
    }
}
