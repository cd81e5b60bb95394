//! Command-line flags shared by the binaries.
//!
//! Each flag has an environment fallback so the server can be configured from its deployment
//! environment. Flags are resolved here into library configuration; the core never looks at
//! them directly.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::Result;
use crate::config::{DEFAULT_SUPPORTED_EXTENSIONS, PipelineConfig};
use crate::engine::HttpEngineConfig;

const MIB: u64 = 1024 * 1024;

/// Engine connection flags.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// URL of the transcription engine endpoint.
    #[arg(long = "engine-url", env = "SCRIVENER_ENGINE_URL")]
    pub endpoint: String,

    /// Bearer token sent to the engine.
    #[arg(long = "engine-api-key", env = "SCRIVENER_ENGINE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model identifier requested from the engine and recorded in results.
    #[arg(long = "engine-model", env = "SCRIVENER_ENGINE_MODEL", default_value = "default")]
    pub model: String,

    /// Upper bound on a single engine call, in seconds.
    #[arg(
        long = "engine-timeout-secs",
        env = "SCRIVENER_ENGINE_TIMEOUT_SECS",
        default_value_t = 600
    )]
    pub timeout_secs: u64,
}

impl EngineArgs {
    pub fn to_config(&self) -> HttpEngineConfig {
        HttpEngineConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Pipeline limit and location flags.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Largest accepted audio file, in MiB.
    #[arg(
        long = "max-audio-size-mb",
        env = "SCRIVENER_MAX_AUDIO_SIZE_MB",
        default_value_t = 200
    )]
    pub max_audio_size_mb: u64,

    /// Files above this size (MiB) are split into chunks.
    #[arg(
        long = "max-chunk-size-mb",
        env = "SCRIVENER_MAX_CHUNK_SIZE_MB",
        default_value_t = 20
    )]
    pub max_chunk_size_mb: u64,

    /// Files transcribed at once across all jobs.
    #[arg(long = "max-concurrent", env = "SCRIVENER_MAX_CONCURRENT", default_value_t = 5)]
    pub max_concurrent: usize,

    /// Parent directory for per-file scratch space.
    #[arg(long = "temp-dir", env = "SCRIVENER_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Keep scratch files after each file resolves.
    #[arg(
        long = "keep-temp-files",
        env = "SCRIVENER_KEEP_TEMP_FILES",
        default_value_t = false
    )]
    pub keep_temp_files: bool,

    /// Default parent directory for job outputs.
    #[arg(
        long = "output-root",
        env = "SCRIVENER_OUTPUT_ROOT",
        default_value = "./transcriptions"
    )]
    pub output_root: PathBuf,

    /// Comma-separated audio extensions accepted during discovery.
    #[arg(long = "extensions", env = "SCRIVENER_EXTENSIONS")]
    pub extensions: Option<String>,
}

impl PipelineArgs {
    /// Resolve into a validated [`PipelineConfig`].
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let supported_extensions = match &self.extensions {
            Some(raw) => PipelineConfig::parse_extensions(raw),
            None => DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_owned())
                .collect(),
        };

        let config = PipelineConfig {
            max_audio_size_bytes: self.max_audio_size_mb.saturating_mul(MIB),
            max_chunk_size_bytes: self.max_chunk_size_mb.saturating_mul(MIB),
            max_concurrent_files: self.max_concurrent,
            temp_dir: self.temp_dir.clone().unwrap_or(defaults.temp_dir),
            cleanup_temp_files: !self.keep_temp_files,
            output_root: self.output_root.clone(),
            supported_extensions,
        };
        config.validate()?;
        Ok(config)
    }
}
