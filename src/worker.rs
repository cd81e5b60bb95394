//! The transcription worker: one file, end to end.
//!
//! Flow per file:
//! 1. skip check against the output directory
//! 2. fetch into a private scratch directory
//! 3. probe and plan chunks
//! 4. call the engine once per chunk, strictly in order
//! 5. merge and persist both artifacts
//!
//! Every error is file-scoped: the worker always produces an outcome and never aborts the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::artifacts::{self, ArtifactPaths, SkipCheck};
use crate::config::PipelineConfig;
use crate::engine::{EngineRequest, TranscriptionEngine};
use crate::job::{FileError, FileOutcome};
use crate::media::{self, AudioInfo};
use crate::planner::{PlanInput, plan_chunks};
use crate::source::{FolderSource, SourceFile};
use crate::transcript::merge_chunks;
use crate::{Error, Result};

/// Everything a worker needs to know about one file of a job.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub folder: String,
    pub file: SourceFile,
    pub artifacts: ArtifactPaths,
    /// Files above this size fail before any engine call.
    pub max_file_size_bytes: u64,
    /// Path of an earlier file in the same job that already owns these artifact paths.
    pub artifacts_owner: Option<String>,
}

pub struct FileWorker<E, S> {
    engine: Arc<E>,
    source: Arc<S>,
    config: Arc<PipelineConfig>,
}

impl<E, S> Clone for FileWorker<E, S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            source: Arc::clone(&self.source),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E, S> FileWorker<E, S>
where
    E: TranscriptionEngine,
    S: FolderSource,
{
    pub fn new(engine: Arc<E>, source: Arc<S>, config: Arc<PipelineConfig>) -> Self {
        Self {
            engine,
            source,
            config,
        }
    }

    /// Drive one file to a terminal outcome.
    pub async fn run(&self, item: &WorkItem) -> FileOutcome {
        let span = info_span!("file", file = %item.file.path);
        async {
            match self.process(item).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(kind = ?err.kind(), error = %err, "file failed");
                    FileOutcome::Failed(FileError::from(&err))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, item: &WorkItem) -> Result<FileOutcome> {
        if let Some(owner) = &item.artifacts_owner {
            return Err(Error::artifact(format!(
                "'{}' would overwrite the artifacts of '{owner}' ({})",
                item.file.path,
                item.artifacts.json.display()
            )));
        }

        match artifacts::check(&item.artifacts).await {
            SkipCheck::Hit(result) => {
                info!("outputs already exist; skipping");
                return Ok(FileOutcome::Skipped(result));
            }
            SkipCheck::Miss(reason) => debug!(?reason, "transcribing"),
        }

        if let Some(size) = item.file.size_bytes {
            check_size(&item.file, size, item.max_file_size_bytes)?;
        }

        let scratch = blocking({
            let parent = self.config.temp_dir.clone();
            let cleanup = self.config.cleanup_temp_files;
            move || ScratchDir::create(&parent, cleanup)
        })
        .await?;
        let local = self
            .source
            .fetch(&item.folder, &item.file, scratch.path())
            .await?;

        let info = blocking({
            let local = local.clone();
            move || media::probe(&local)
        })
        .await?;
        check_size(&item.file, info.size_bytes, item.max_file_size_bytes)?;

        let result = self.transcribe(item, &local, &info, scratch.path()).await?;
        artifacts::persist(&item.artifacts, &result, &item.file.name).await?;

        info!(
            chunks = result.num_chunks.unwrap_or(1),
            processing_time_seconds = result.processing_time_seconds,
            "file transcribed"
        );
        Ok(FileOutcome::Succeeded(Box::new(result)))
    }

    async fn transcribe(
        &self,
        item: &WorkItem,
        local: &Path,
        info: &AudioInfo,
        scratch: &Path,
    ) -> Result<crate::TranscriptionResult> {
        let max_chunk_size_bytes = self.config.max_chunk_size_bytes;
        let chunks = plan_chunks(
            &PlanInput {
                file_id: &item.file.path,
                size_bytes: info.size_bytes,
                duration_ms: info.duration_ms,
                payload: info.chunk_payload(),
            },
            max_chunk_size_bytes,
        )?;

        // Files within the limit go to the engine as-is; everything else is re-encoded.
        let (audio_paths, mime_type) = if info.size_bytes <= max_chunk_size_bytes {
            (vec![local.to_path_buf()], media::mime_for(local))
        } else {
            let paths = blocking({
                let local = local.to_path_buf();
                let chunks = chunks.clone();
                let dir = scratch.to_path_buf();
                move || media::cut_chunks(&local, &chunks, &dir)
            })
            .await?;
            (paths, "audio/wav")
        };
        debug!(chunks = chunks.len(), "planned chunks");

        let mut parts = Vec::with_capacity(chunks.len());
        for (chunk, audio_path) in chunks.iter().zip(&audio_paths) {
            let audio = tokio::fs::read(audio_path).await.map_err(|err| {
                Error::planning(format!("failed to read '{}': {err}", audio_path.display()))
            })?;
            if audio.len() as u64 > max_chunk_size_bytes {
                return Err(Error::planning(format!(
                    "chunk {} of '{}' is {} bytes, over the {max_chunk_size_bytes} byte limit",
                    chunk.index,
                    item.file.name,
                    audio.len()
                )));
            }

            let request = EngineRequest {
                file_name: item.file.name.clone(),
                chunk_index: chunk.index,
                chunk_count: chunks.len(),
                audio,
                mime_type,
                target_chunk_seconds: chunk.duration_seconds(),
            };

            let started = Instant::now();
            let mut part = self
                .engine
                .transcribe(request)
                .instrument(info_span!("chunk", chunk = chunk.index))
                .await
                .map_err(|err| match err {
                    Error::Engine(_) => err,
                    other => Error::engine(other.to_string()),
                })?;
            part.processing_time_seconds = started.elapsed().as_secs_f64();
            if part.model.is_empty() {
                part.model = self.engine.model_id().to_owned();
            }
            parts.push((chunk.clone(), part));
        }

        let mut merged = merge_chunks(parts)?;
        merged.file_name = Some(item.file.name.clone());
        merged.file_size_bytes = Some(info.size_bytes);
        Ok(merged)
    }
}

fn check_size(file: &SourceFile, size: u64, limit: u64) -> Result<()> {
    if size > limit {
        return Err(Error::planning(format!(
            "'{}' is {size} bytes, over the {limit} byte limit",
            file.name
        )));
    }
    Ok(())
}

/// Run blocking filesystem and media work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| Error::msg(format!("blocking task failed: {err}")))?
}

/// Per-file scratch space for the download and any chunk audio.
///
/// Removed on drop, which covers success, failure and early returns alike. With cleanup
/// disabled the directory is left behind for inspection.
struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    cleanup: bool,
}

impl ScratchDir {
    fn create(parent: &Path, cleanup: bool) -> Result<Self> {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::msg(format!(
                "failed to create temp dir '{}': {err}",
                parent.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix("file-")
            .tempdir_in(parent)
            .map_err(|err| {
                Error::msg(format!(
                    "failed to create scratch dir in '{}': {err}",
                    parent.display()
                ))
            })?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
            cleanup,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.cleanup {
            return;
        }
        if let Some(dir) = self.dir.take() {
            let kept = dir.keep();
            debug!(path = %kept.display(), "keeping scratch dir");
        }
    }
}
