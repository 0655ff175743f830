//! Typed error hierarchy for the deploy pipeline.
//!
//! Asset resolution never produces a `DeployError`: a miss is the resolver's
//! `NotFound` outcome and stays scoped to the request.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a deployment and move it to `Failed`.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to clone repository {repo}: {message}")]
    CloneFailed { repo: String, message: String },

    #[error("{step} failed: {detail}")]
    BuildFailed { step: String, detail: String },

    #[error("build timed out: {step} exceeded {secs}s")]
    TimedOut { step: String, secs: u64 },

    #[error("failed to launch {step}: {source}")]
    LaunchFailed {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to publish {path}: {source}")]
    PublishFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project name '{0}'")]
    InvalidName(String),

    #[error("serving directory {path} is owned by another shipyard process")]
    StoreLocked { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn publish(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::PublishFailed {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from the per-step timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::TimedOut { .. })
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
