//! Job identity and lifecycle.
//!
//! A job moves through
//! `Accepted → Staged → Invoked → Located → Streamed → Cleaned`;
//! `Failed` is reachable from every non-terminal stage and absorbs.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineErrorKind;

/// Identifier of one generation job.
///
/// Backed by a UUIDv7: a millisecond timestamp, a monotonic counter for ids
/// minted within the same millisecond, and random bits. Rendered without
/// hyphens so it can prefix scratch file names directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Fine-grained pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "reason")]
pub enum JobStage {
    /// Inputs validated, identifier assigned.
    Accepted,
    /// Inputs written to scratch storage, output directory created.
    Staged,
    /// Inference process running.
    Invoked,
    /// Output video found.
    Located,
    /// Output video fully read into memory.
    Streamed,
    /// Scratch subtree removed after success.
    Cleaned,
    /// A step failed; remaining steps were skipped.
    Failed(PipelineErrorKind),
}

impl JobStage {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cleaned | Self::Failed(_))
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStage) -> bool {
        use JobStage::*;
        match (self, next) {
            (Accepted, Staged)
            | (Staged, Invoked)
            | (Invoked, Located)
            | (Located, Streamed)
            | (Streamed, Cleaned) => true,
            (current, Failed(_)) => !current.is_terminal() && !matches!(current, Streamed),
            _ => false,
        }
    }

    /// Coarse status exposed outside the pipeline.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Accepted => JobStatus::Pending,
            Self::Staged | Self::Invoked | Self::Located => JobStatus::Running,
            Self::Streamed | Self::Cleaned => JobStatus::Succeeded,
            Self::Failed(_) => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Staged => write!(f, "staged"),
            Self::Invoked => write!(f, "invoked"),
            Self::Located => write!(f, "located"),
            Self::Streamed => write!(f, "streamed"),
            Self::Cleaned => write!(f, "cleaned"),
            Self::Failed(kind) => write!(f, "failed({kind:?})"),
        }
    }
}

/// Coarse job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, nothing on disk yet.
    Pending,
    /// Staged or running.
    Running,
    /// Video produced.
    Succeeded,
    /// Any step failed.
    Failed,
}

/// One generation request, owned by the orchestrator for its lifetime.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    stage: JobStage,
    started: Instant,
}

impl Job {
    /// Create a job in the `Accepted` stage.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            stage: JobStage::Accepted,
            started: Instant::now(),
        }
    }

    /// The job identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Current stage.
    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Current coarse status.
    pub fn status(&self) -> JobStatus {
        self.stage.status()
    }

    /// Time since the job was accepted.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `next`. Illegal transitions are ignored and logged.
    pub fn advance(&mut self, next: JobStage) -> bool {
        if !self.stage.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.stage,
                to = %next,
                "Ignoring illegal job transition"
            );
            return false;
        }
        tracing::debug!(job_id = %self.id, from = %self.stage, to = %next, "Job transition");
        self.stage = next;
        true
    }

    /// Move to `Failed(kind)`.
    pub fn fail(&mut self, kind: PipelineErrorKind) -> bool {
        self.advance(JobStage::Failed(kind))
    }
}
