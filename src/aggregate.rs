//! Result aggregation: job status and the combined document.

use std::path::PathBuf;

use tracing::info;

use crate::artifacts::{self, COMBINED_FILE_NAME};
use crate::job::{FileError, FileState, FileTask, Job, JobStatus};
use crate::render::{CombinedEntry, render_combined};
use crate::transcript::TranscriptionResult;
use crate::{Error, Result};

/// Terminal status for a fully resolved set of files.
///
/// - every file succeeded or was skipped: `completed`
/// - every file failed: `failed`
/// - anything in between: `partial`
///
/// An empty set is `completed`.
pub fn job_status(tasks: &[FileTask]) -> JobStatus {
    let failed = tasks
        .iter()
        .filter(|task| task.state == FileState::Failed)
        .count();

    if failed == 0 {
        JobStatus::Completed
    } else if failed == tasks.len() {
        JobStatus::Failed
    } else {
        JobStatus::Partial
    }
}

/// One file's place in the job-level roll-up.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSummary {
    Included {
        file_name: String,
        result: Option<Box<TranscriptionResult>>,
        skipped: bool,
        /// The file's rendered document, as persisted.
        document: String,
    },
    Failed {
        file_name: String,
        error: FileError,
    },
}

/// Job-level roll-up: per-file outcomes in discovery order plus the concatenated document.
///
/// Always rebuilt from scratch; never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
    pub files: Vec<FileSummary>,
    pub document: String,
}

/// Build the roll-up for a job whose files have all resolved.
///
/// Non-failed files contribute their persisted text artifact, so skipped files appear with
/// exactly the content an earlier run produced.
pub async fn combine(job: &Job) -> Result<CombinedResult> {
    let mut files = Vec::with_capacity(job.tasks.len());

    for task in &job.tasks {
        let file_name = task.source.name.clone();
        match task.state {
            FileState::Pending => {
                return Err(Error::msg(format!(
                    "file '{}' has not resolved yet",
                    task.source.path
                )));
            }
            FileState::Failed => {
                let error = task.error.clone().unwrap_or_else(|| FileError {
                    kind: crate::ErrorKind::Internal,
                    message: "unknown error".to_owned(),
                });
                files.push(FileSummary::Failed { file_name, error });
            }
            FileState::Skipped | FileState::Succeeded => {
                let document = tokio::fs::read_to_string(&task.artifacts.text)
                    .await
                    .map_err(|err| {
                        Error::artifact(format!("{}: {err}", task.artifacts.text.display()))
                    })?;
                files.push(FileSummary::Included {
                    file_name,
                    result: task.result.clone(),
                    skipped: task.state == FileState::Skipped,
                    document,
                });
            }
        }
    }

    let entries: Vec<CombinedEntry<'_>> = files
        .iter()
        .map(|file| match file {
            FileSummary::Included {
                file_name,
                document,
                ..
            } => CombinedEntry::Document {
                file_name,
                text: document,
            },
            FileSummary::Failed { file_name, error } => CombinedEntry::Failed {
                file_name,
                error: &error.message,
            },
        })
        .collect();
    let document = render_combined(&entries);

    Ok(CombinedResult { files, document })
}

/// Rebuild and write `combined_transcript.txt` into the job's output directory.
pub async fn write_combined(job: &Job) -> Result<(PathBuf, CombinedResult)> {
    let combined = combine(job).await?;

    tokio::fs::create_dir_all(&job.output_dir)
        .await
        .map_err(|err| Error::artifact(format!("{}: {err}", job.output_dir.display())))?;
    let path = job.output_dir.join(COMBINED_FILE_NAME);
    artifacts::write(&path, combined.document.as_bytes()).await?;

    info!(
        job_id = %job.id,
        path = %path.display(),
        files = combined.files.len(),
        "combined document written"
    );
    Ok((path, combined))
}
