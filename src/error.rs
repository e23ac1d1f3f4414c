//! Failures that abort processing of a single sequence directory.
//!
//! None of these stop the walk over the source tree; the orchestrator logs
//! them and moves on. A checksum disagreement is not an error at all, it is
//! reported as a `NOT_LOSSLESS` verdict.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

pub type SequenceResult<T> = std::result::Result<T, SequenceError>;

#[derive(Debug, Error)]
pub enum SequenceError {
    /// Output layout could not be materialized (anything other than "already exists").
    #[error("failed to create workspace directory {path:?}: {source}")]
    WorkspaceCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external program could not be started at all.
    #[error("failed to spawn {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// Abnormal exit that also left no usable artifact behind.
    #[error("{tool} exited with {status} (diagnostics in {log:?})")]
    ToolFailed {
        tool: String,
        status: ExitStatus,
        log: PathBuf,
    },

    #[error("{tool} did not finish within {timeout:?} and was killed (diagnostics in {log:?})")]
    ToolTimeout {
        tool: String,
        timeout: Duration,
        log: PathBuf,
    },

    #[error("expected artifact was not produced: {path:?}")]
    ArtifactMissing { path: PathBuf },

    #[error("failed to read artifact {path:?}: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine {what} of {path:?}: {detail}")]
    Probe {
        what: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SequenceError {
    /// Short machine-friendly kind used in console and log output.
    pub fn kind(&self) -> &'static str {
        match self {
            SequenceError::WorkspaceCreation { .. } => "workspace-creation",
            SequenceError::ToolSpawn { .. } | SequenceError::ToolFailed { .. } => "external-tool",
            SequenceError::ToolTimeout { .. } => "external-tool-timeout",
            SequenceError::ArtifactMissing { .. } | SequenceError::ArtifactUnreadable { .. } => {
                "artifact"
            }
            SequenceError::Probe { .. } => "inspection",
            SequenceError::Io { .. } => "io",
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SequenceError::Io {
            path: path.into(),
            source,
        }
    }
}
