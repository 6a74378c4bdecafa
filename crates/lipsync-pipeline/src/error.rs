//! Unified error type for the generation pipeline.
//!
//! All subsystem errors (input validation, scratch storage, process
//! execution, output location) are consolidated into a single
//! `PipelineError` enum that maps cleanly to `lipsync_core::error::AppError`.

use std::path::PathBuf;

use lipsync_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Public message for a request missing one or both uploads.
pub const MISSING_INPUTS_MESSAGE: &str = "Both image and audio files are required";

/// Public message for any failure inside the pipeline.
pub const GENERATION_FAILED_MESSAGE: &str = "Video generation failed";

/// Public message for requests arriving during shutdown.
pub const SHUTTING_DOWN_MESSAGE: &str = "Service is shutting down";

/// Public message for unexpected failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    /// Missing or unacceptable input; user-correctable.
    Validation,
    /// Scratch filesystem failure.
    Storage,
    /// The inference process could not be spawned or exited non-zero.
    RunnerFailure,
    /// The inference process exceeded its wall-clock limit.
    Timeout,
    /// The job was cancelled because the server is shutting down.
    Cancelled,
    /// The inference process reported success but produced no video.
    NoArtifact,
    /// The inference process produced more than one candidate video.
    AmbiguousArtifact,
    /// The job task panicked or was aborted.
    Internal,
}

/// Unified error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // --- Validation errors ---
    /// One or both uploads are absent or empty.
    #[error("Missing or empty input: {fields}")]
    MissingInput {
        /// Comma separated list of the missing fields.
        fields: String,
    },

    /// The requested enhancer is not in the allow-list.
    #[error("Unsupported enhancer '{name}'")]
    EnhancerNotAllowed {
        /// The enhancer that was requested.
        name: String,
    },

    // --- Storage errors ---
    /// A scratch filesystem operation failed.
    #[error("Scratch storage failed to {op} '{path}': {source}")]
    Storage {
        /// What was being attempted.
        op: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // --- Runner errors ---
    /// The inference executable could not be started.
    #[error("Failed to spawn inference process '{program}': {source}")]
    SpawnFailed {
        /// The configured program.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The inference process exited unsuccessfully.
    #[error("Inference process failed ({status}): {stderr}")]
    ProcessFailed {
        /// Exit code, if the process was not terminated by a signal.
        code: Option<i32>,
        /// Human-readable exit status.
        status: String,
        /// Tail of the captured stderr.
        stderr: String,
    },

    /// The inference process exceeded its time limit and was killed.
    #[error("Inference process timed out after {timeout_seconds}s")]
    Timeout {
        /// The limit that was exceeded.
        timeout_seconds: u64,
    },

    /// The job was cancelled and its process killed.
    #[error("Generation job was cancelled")]
    Cancelled,

    /// The server is shutting down and no longer accepts jobs.
    #[error("Server is shutting down")]
    ShuttingDown,

    // --- Output errors ---
    /// The output directory contains no candidate video.
    #[error("No .{extension} output found in '{dir}'")]
    NoArtifact {
        /// The scanned directory.
        dir: PathBuf,
        /// The extension searched for.
        extension: String,
    },

    /// The only candidate video is smaller than the configured minimum.
    #[error("Output '{path}' is too small ({size} bytes)")]
    EmptyArtifact {
        /// Path to the undersized output.
        path: PathBuf,
        /// Its size in bytes.
        size: u64,
    },

    /// More than one candidate video was produced.
    #[error("Ambiguous output in '{dir}': {} candidates ({})", .candidates.len(), .candidates.join(", "))]
    AmbiguousArtifact {
        /// The scanned directory.
        dir: PathBuf,
        /// Candidate file names, sorted.
        candidates: Vec<String>,
    },

    // --- Generic errors ---
    /// The job task failed to complete.
    #[error("Generation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Build a storage error for `op` on `path`.
    pub fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> PipelineErrorKind {
        match self {
            Self::MissingInput { .. } | Self::EnhancerNotAllowed { .. } => {
                PipelineErrorKind::Validation
            }
            Self::Storage { .. } => PipelineErrorKind::Storage,
            Self::SpawnFailed { .. } | Self::ProcessFailed { .. } => {
                PipelineErrorKind::RunnerFailure
            }
            Self::Timeout { .. } => PipelineErrorKind::Timeout,
            Self::Cancelled | Self::ShuttingDown => PipelineErrorKind::Cancelled,
            Self::NoArtifact { .. } | Self::EmptyArtifact { .. } => PipelineErrorKind::NoArtifact,
            Self::AmbiguousArtifact { .. } => PipelineErrorKind::AmbiguousArtifact,
            Self::Join(_) => PipelineErrorKind::Internal,
        }
    }

    /// Whether this error points at a misbehaving inference tool rather than
    /// bad input or infrastructure.
    pub fn is_bug_signal(&self) -> bool {
        matches!(
            self.kind(),
            PipelineErrorKind::NoArtifact | PipelineErrorKind::AmbiguousArtifact
        )
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (kind, message) = match &err {
            PipelineError::MissingInput { .. } => {
                (ErrorKind::Validation, MISSING_INPUTS_MESSAGE.to_string())
            }
            PipelineError::EnhancerNotAllowed { .. } => (ErrorKind::Validation, err.to_string()),
            PipelineError::Join(_) => (ErrorKind::Internal, INTERNAL_ERROR_MESSAGE.to_string()),
            PipelineError::ShuttingDown => {
                (ErrorKind::ServiceUnavailable, SHUTTING_DOWN_MESSAGE.to_string())
            }
            _ => (ErrorKind::Generation, GENERATION_FAILED_MESSAGE.to_string()),
        };
        AppError::with_source(kind, message, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = PipelineError::ProcessFailed {
            code: Some(1),
            status: "exit status: 1".to_string(),
            stderr: "CUDA out of memory".to_string(),
        };
        assert_eq!(err.kind(), PipelineErrorKind::RunnerFailure);
        assert!(!err.is_bug_signal());

        let err = PipelineError::EmptyArtifact {
            path: PathBuf::from("/tmp/x/out.mp4"),
            size: 0,
        };
        assert_eq!(err.kind(), PipelineErrorKind::NoArtifact);
        assert!(err.is_bug_signal());
    }

    #[test]
    fn test_app_error_hides_internals() {
        let err = PipelineError::ProcessFailed {
            code: Some(1),
            status: "exit status: 1".to_string(),
            stderr: "Traceback at /srv/secret/path.py".to_string(),
        };
        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::Generation);
        assert_eq!(app.message, GENERATION_FAILED_MESSAGE);
        assert!(app.chain().contains("/srv/secret/path.py"));
    }

    #[test]
    fn test_missing_input_maps_to_validation() {
        let app: AppError = PipelineError::MissingInput {
            fields: "audio".to_string(),
        }
        .into();
        assert_eq!(app.kind, ErrorKind::Validation);
        assert_eq!(app.message, MISSING_INPUTS_MESSAGE);
    }

    #[test]
    fn test_ambiguous_display_lists_candidates() {
        let err = PipelineError::AmbiguousArtifact {
            dir: PathBuf::from("/scratch/job"),
            candidates: vec!["a.mp4".to_string(), "b.mp4".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("2 candidates"));
        assert!(text.contains("a.mp4, b.mp4"));
    }
}
