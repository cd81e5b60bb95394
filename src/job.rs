//! Job and per-file task state, plus the read-only views handed to callers.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::ArtifactPaths;
use crate::error::ErrorKind;
use crate::source::SourceFile;
use crate::transcript::TranscriptionResult;

/// Opaque unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job id from its string form.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

/// Per-file state. Moves out of `Pending` exactly once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Skipped,
    Succeeded,
    Failed,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Why a file failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&crate::Error> for FileError {
    fn from(err: &crate::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// How one file resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Outputs already existed; the cached result was reused.
    Skipped(Box<TranscriptionResult>),
    Succeeded(Box<TranscriptionResult>),
    Failed(FileError),
}

impl FileOutcome {
    pub fn state(&self) -> FileState {
        match self {
            Self::Skipped(_) => FileState::Skipped,
            Self::Succeeded(_) => FileState::Succeeded,
            Self::Failed(_) => FileState::Failed,
        }
    }
}

/// The per-file unit of work inside a job.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub source: SourceFile,
    pub artifacts: ArtifactPaths,
    pub state: FileState,
    pub result: Option<Box<TranscriptionResult>>,
    pub error: Option<FileError>,
}

impl FileTask {
    pub fn new(source: SourceFile, artifacts: ArtifactPaths) -> Self {
        Self {
            source,
            artifacts,
            state: FileState::Pending,
            result: None,
            error: None,
        }
    }
}

/// One submission covering a set of discovered files.
///
/// Owned by the job registry; everything else sees clones or views.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub folder: String,
    pub status: JobStatus,
    pub tasks: Vec<FileTask>,
    pub total_files: usize,
    pub processed_files: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,
    /// Path of the combined document once written.
    pub combined_document: Option<PathBuf>,
    /// Job-scoped error (discovery failure, combined document failure).
    pub error: Option<String>,
    /// No more writes to the output directory are pending.
    pub finalized: bool,
}

impl Job {
    pub fn new(id: JobId, folder: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            id,
            folder: folder.into(),
            status: JobStatus::Queued,
            tasks: Vec::new(),
            total_files: 0,
            processed_files: 0,
            created_at: Utc::now(),
            finished_at: None,
            output_dir,
            combined_document: None,
            error: None,
            finalized: false,
        }
    }

    pub fn count(&self, state: FileState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            folder: self.folder.clone(),
            total_files: self.total_files,
            processed_files: self.processed_files,
            created_at: self.created_at,
            finished_at: self.finished_at,
            output_dir: self.output_dir.clone(),
            error: self.error.clone(),
        }
    }

    pub fn results(&self) -> JobResults {
        JobResults {
            job_id: self.id,
            status: self.status,
            total_files: self.total_files,
            successful: self.count(FileState::Succeeded),
            skipped: self.count(FileState::Skipped),
            failed: self.count(FileState::Failed),
            output_dir: self.output_dir.clone(),
            combined_document: self.combined_document.clone(),
            error: self.error.clone(),
            finalized: self.finalized,
            files: self
                .tasks
                .iter()
                .map(|task| FileReport {
                    path: task.source.path.clone(),
                    name: task.source.name.clone(),
                    state: task.state,
                    json_artifact: task.artifacts.json.clone(),
                    text_artifact: task.artifacts.text.clone(),
                    result: task.result.clone(),
                    error: task.error.clone(),
                })
                .collect(),
        }
    }
}

/// Status surface: what a poller needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub folder: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Results surface: per-file outcomes plus aggregate counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_files: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
    /// Written after the job turns terminal, so a terminal job reports `None` here until
    /// `finalized` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_document: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finalized: bool,
    pub files: Vec<FileReport>,
}

/// One file's entry on the results surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: String,
    pub name: String,
    pub state: FileState,
    pub json_artifact: PathBuf,
    pub text_artifact: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<TranscriptionResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileError>,
}
