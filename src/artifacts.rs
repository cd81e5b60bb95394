//! Output artifacts and the idempotency gate.
//!
//! Every file resolves to two artifacts inside the job's output directory:
//! - `<stem>_transcription.json`: the merged `TranscriptionResult`, verbatim
//! - `<stem>_transcript.txt`: the rendered document
//!
//! The skip check is presence-based: it keys on these names, not on the source audio's content.
//! A source file replaced under the same name is indistinguishable from one already done.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

use crate::render::render_document;
use crate::transcript::TranscriptionResult;
use crate::{Error, Result};

/// File name of the job-level combined document.
pub const COMBINED_FILE_NAME: &str = "combined_transcript.txt";

/// Where one file's artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub json: PathBuf,
    pub text: PathBuf,
}

impl ArtifactPaths {
    /// Derive the artifact paths for `source_name` (any path; only its stem is used).
    pub fn for_source(output_dir: &Path, source_name: &str) -> Self {
        let stem = Path::new(source_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or(source_name);

        Self {
            json: output_dir.join(format!("{stem}_transcription.json")),
            text: output_dir.join(format!("{stem}_transcript.txt")),
        }
    }
}

/// Outcome of the skip check.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipCheck {
    /// Both artifacts exist and the JSON artifact parses.
    Hit(Box<TranscriptionResult>),

    /// Anything else; the file must be transcribed.
    Miss(MissReason),
}

/// Why the skip check missed. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoJson,
    NoText,
    CorruptJson,
}

/// Decide whether a file's outputs are already complete.
///
/// Read-only. Partial or corrupt state is always a miss so the file gets re-transcribed.
pub async fn check(paths: &ArtifactPaths) -> SkipCheck {
    if !is_file(&paths.json).await {
        return SkipCheck::Miss(MissReason::NoJson);
    }
    if !is_file(&paths.text).await {
        return SkipCheck::Miss(MissReason::NoText);
    }

    let bytes = match tokio::fs::read(&paths.json).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                path = %paths.json.display(),
                error = %err,
                "failed to read existing transcription"
            );
            return SkipCheck::Miss(MissReason::CorruptJson);
        }
    };

    match serde_json::from_slice::<TranscriptionResult>(&bytes) {
        Ok(result) => SkipCheck::Hit(Box::new(result)),
        Err(err) => {
            warn!(
                path = %paths.json.display(),
                error = %err,
                "existing transcription does not parse"
            );
            SkipCheck::Miss(MissReason::CorruptJson)
        }
    }
}

/// Persist one file's artifacts.
///
/// The JSON artifact is written first: if rendering or the text write fails, the lone JSON file
/// is a miss on the next run rather than a false hit.
pub async fn persist(
    paths: &ArtifactPaths,
    result: &TranscriptionResult,
    file_name: &str,
) -> Result<()> {
    if let Some(parent) = paths.json.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| Error::artifact(format!("{}: {err}", parent.display())))?;
    }

    let json = serde_json::to_vec_pretty(result)
        .map_err(|err| Error::artifact(format!("failed to serialize transcription: {err}")))?;
    write(&paths.json, &json).await?;

    let text = render_document(result, file_name, Local::now());
    write(&paths.text, text.as_bytes()).await?;

    debug!(json = %paths.json.display(), text = %paths.text.display(), "artifacts written");
    Ok(())
}

/// Write one artifact, mapping IO failures to artifact errors.
pub async fn write(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|err| Error::artifact(format!("{}: {err}", path.display())))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
