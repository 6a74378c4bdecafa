//! # lipsync-pipeline
//!
//! The media-generation job pipeline. A request carrying an image and an
//! audio clip becomes a [`job::Job`] that is staged into the
//! [`scratch::ScratchStore`], handed to the external inference process by an
//! [`runner::InferenceRunner`], whose single output video is found by the
//! [`locator::OutputLocator`]. The [`orchestrator::PipelineOrchestrator`]
//! composes these and releases the job's scratch subtree on every exit path.
//!
//! ## Process contract
//!
//! ```text
//! <program> <program_args..> --driven_audio <audio> --source_image <image>
//!           --result_dir <dir> --enhancer <name> <extra_args..>
//! ```
//!
//! Exit code 0 means success; the process must leave exactly one video file
//! in `<dir>`.

pub mod error;
pub mod job;
pub mod locator;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod runner;
pub mod scratch;

pub use error::{PipelineError, PipelineErrorKind};
pub use job::{Job, JobId, JobStage, JobStatus};
pub use locator::OutputLocator;
pub use metrics::{GenerationMetrics, MetricsSnapshot};
pub use models::{GenerationRequest, InputFile, VideoArtifact};
pub use orchestrator::PipelineOrchestrator;
pub use runner::{InferenceRunner, ProcessRunner, RunOptions, RunOutput, RunRequest};
pub use scratch::{ScratchStore, StagedPaths};
