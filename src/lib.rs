//! `scrivener`: batch transcription of folders of recordings.
//!
//! This crate provides:
//! - Folder discovery and per-file fetching behind a pluggable source
//! - Size-bounded chunk planning and chunk cutting
//! - A pluggable transcription engine (with an HTTP client behind `http-engine`)
//! - Resumable, concurrency-bounded job execution with per-file outcomes
//! - Rendered per-file and combined transcript documents
//!
//! The library is designed to be used by both CLI tools and long-running services: frontends
//! resolve their own flags into a [`PipelineConfig`] and drive a [`TranscriptionService`].

// High-level API (most consumers should start here).
pub mod config;
pub mod service;

// Errors shared by every layer.
pub mod error;

// Job state and the registry that owns it.
pub mod job;
pub mod registry;

// Per-file pipeline.
pub mod artifacts;
pub mod media;
pub mod planner;
pub mod transcript;
pub mod worker;

// Job execution and roll-up.
pub mod aggregate;
pub mod pool;

// Collaborator seams.
pub mod engine;
pub mod source;

// Document formatting.
pub mod render;

// Flags shared by the binaries.
#[cfg(all(feature = "cli", feature = "http-engine"))]
pub mod cli;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use config::PipelineConfig;
pub use engine::{EngineRequest, TranscriptionEngine};
#[cfg(feature = "http-engine")]
pub use engine::{HttpEngine, HttpEngineConfig};
pub use error::{Error, ErrorKind, Result};
pub use job::{FileState, JobId, JobResults, JobSnapshot, JobStatus};
#[cfg(feature = "logging")]
pub use logging::init as init_logging;
pub use service::{JobRequest, Submitted, TranscriptionService};
pub use source::{FolderSource, LocalFolderSource, SourceFile};
pub use transcript::{Segment, TranscriptionResult};
