use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scrivener's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Scrivener's crate-wide error type.
///
/// The first four variants mirror the failure classes of the pipeline:
/// - `Discovery` aborts a job before it starts (folder listing) or fails one file (fetch)
/// - `Planning`, `Engine` and `Artifact` fail exactly one file and never the job
///
/// Library APIs return this type, never `anyhow::Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("planning failed: {0}")]
    Planning(String),

    /// Engine messages are surfaced verbatim.
    #[error("{0}")]
    Engine(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

/// Coarse error classification exposed on the results surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Planning,
    Engine,
    Artifact,
    Internal,
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }

    pub(crate) fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    pub(crate) fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    pub(crate) fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact(message.into())
    }

    /// Classify this error for callers that only need the failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Planning(_) => ErrorKind::Planning,
            Self::Engine(_) => ErrorKind::Engine,
            Self::Artifact(_) => ErrorKind::Artifact,
            Self::NotFound(_) | Self::Conflict(_) | Self::Message(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
