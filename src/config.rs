use std::path::PathBuf;

use serde::Serialize;

use crate::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Audio extensions accepted by default when listing a folder.
pub const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] =
    &["mp3", "wav", "m4a", "aac", "ogg", "flac", "opus", "wma"];

/// Resolved configuration consumed by the pipeline.
///
/// This struct represents *library-level configuration*, not CLI flags or environment
/// variables. Frontends (the server, the CLI, tests) are responsible for mapping their own
/// inputs into this type so that the core never reads process state directly.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Files larger than this are rejected before any engine call.
    pub max_audio_size_bytes: u64,

    /// Files larger than this are split into chunks of at most this many bytes.
    ///
    /// The per-chunk duration ceiling is derived from this and the file's byte rate.
    pub max_chunk_size_bytes: u64,

    /// Upper bound on files being transcribed at once, shared by every job of a service.
    pub max_concurrent_files: usize,

    /// Parent directory for per-file scratch space (downloads and chunk audio).
    pub temp_dir: PathBuf,

    /// Whether scratch space is removed once a file resolves.
    ///
    /// When disabled, scratch directories are left on disk for inspection.
    pub cleanup_temp_files: bool,

    /// Default parent directory for job outputs (`<output_root>/<job_id>`).
    pub output_root: PathBuf,

    /// Lower-case file extensions treated as audio during discovery.
    pub supported_extensions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_audio_size_bytes: 200 * MIB,
            max_chunk_size_bytes: 20 * MIB,
            max_concurrent_files: 5,
            temp_dir: std::env::temp_dir().join("scrivener"),
            cleanup_temp_files: true,
            output_root: PathBuf::from("./transcriptions"),
            supported_extensions: DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_owned())
                .collect(),
        }
    }
}

impl PipelineConfig {
    /// Check the limits for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_audio_size_bytes == 0 {
            return Err(Error::msg("max_audio_size_bytes must be greater than zero"));
        }
        if self.max_chunk_size_bytes == 0 {
            return Err(Error::msg("max_chunk_size_bytes must be greater than zero"));
        }
        if self.max_concurrent_files == 0 {
            return Err(Error::msg("max_concurrent_files must be greater than zero"));
        }
        if self.supported_extensions.is_empty() {
            return Err(Error::msg("at least one supported extension is required"));
        }
        Ok(())
    }

    /// Parse a comma-separated extension list (`"mp3, WAV,.flac"`) into normalized form.
    pub fn parse_extensions(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}
