//! Pipeline orchestration: validate, stage, run, locate, read back, release.
//!
//! Each job runs on its own spawned task so that it keeps going (and cleans
//! up) when the caller stops waiting. A drop guard releases scratch storage
//! synchronously if the task unwinds.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use lipsync_core::config::{InferenceConfig, ScratchConfig};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::PipelineError;
use crate::job::{Job, JobId, JobStage};
use crate::locator::OutputLocator;
use crate::metrics::GenerationMetrics;
use crate::models::{GenerationRequest, InputFile, VideoArtifact};
use crate::runner::{InferenceRunner, ProcessRunner, RunOptions, RunRequest};
use crate::scratch::ScratchStore;

/// Composes the scratch store, runner and locator into a job pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    store: Arc<ScratchStore>,
    runner: Arc<dyn InferenceRunner>,
    locator: OutputLocator,
    defaults: RunOptions,
    allowed_enhancers: Arc<[String]>,
    metrics: Arc<GenerationMetrics>,
    shutdown: CancellationToken,
}

impl PipelineOrchestrator {
    /// Only the default enhancer is allowed until
    /// [`with_allowed_enhancers`](Self::with_allowed_enhancers) says otherwise.
    pub fn new(
        store: Arc<ScratchStore>,
        runner: Arc<dyn InferenceRunner>,
        locator: OutputLocator,
        defaults: RunOptions,
    ) -> Self {
        let allowed_enhancers = Arc::from(vec![defaults.enhancer.clone()]);
        Self {
            store,
            runner,
            locator,
            defaults,
            allowed_enhancers,
            metrics: Arc::new(GenerationMetrics::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the production pipeline: opens (and purges) the scratch root
    /// and spawns the configured executable per job.
    pub async fn from_config(
        scratch: &ScratchConfig,
        inference: &InferenceConfig,
    ) -> Result<Self, PipelineError> {
        let store = ScratchStore::open(scratch).await?;
        info!(
            root = %store.root().display(),
            program = %inference.program,
            timeout_s = inference.timeout_seconds,
            "Generation pipeline ready"
        );
        Ok(Self::new(
            Arc::new(store),
            Arc::new(ProcessRunner::from_config(inference)),
            OutputLocator::from_config(inference),
            RunOptions::from_config(inference),
        )
        .with_allowed_enhancers(inference.allowed_enhancers.clone()))
    }

    pub fn with_allowed_enhancers(mut self, allowed: Vec<String>) -> Self {
        self.allowed_enhancers = Arc::from(allowed);
        self
    }

    /// Jobs observe `token`; cancelling it kills running processes.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn metrics(&self) -> &GenerationMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &ScratchStore {
        &self.store
    }

    /// Run one generation job to completion.
    ///
    /// Inputs are validated before anything touches the filesystem. On
    /// return, scratch storage holds nothing of the job.
    pub async fn execute(&self, request: GenerationRequest) -> Result<VideoArtifact, PipelineError> {
        let (image, audio, enhancer) = Self::validate(request)?;
        let options = self.options_for(enhancer.as_deref())?;
        if self.shutdown.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }

        let job_id = JobId::new();
        self.metrics.record_started();

        let span = info_span!("generation_job", job_id = %job_id);
        let this = self.clone();
        let handle = tokio::spawn(
            async move { this.run_job(job_id, image, audio, options).await }.instrument(span),
        );

        match handle.await {
            Ok(result) => result,
            Err(join) => {
                let err = PipelineError::Join(join);
                error!(job_id = %job_id, error = %err, "Generation task aborted");
                self.metrics.record_failure(&err);
                Err(err)
            }
        }
    }

    fn validate(
        request: GenerationRequest,
    ) -> Result<(InputFile, InputFile, Option<String>), PipelineError> {
        let missing = request.missing_fields();
        match (request.image, request.audio) {
            (Some(image), Some(audio)) if missing.is_empty() => {
                Ok((image, audio, request.enhancer))
            }
            _ => Err(PipelineError::MissingInput {
                fields: missing.join(", "),
            }),
        }
    }

    fn options_for(&self, enhancer: Option<&str>) -> Result<RunOptions, PipelineError> {
        let Some(name) = enhancer.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(self.defaults.clone());
        };
        if !self.allowed_enhancers.iter().any(|allowed| allowed == name) {
            return Err(PipelineError::EnhancerNotAllowed {
                name: name.to_string(),
            });
        }
        Ok(RunOptions {
            enhancer: name.to_string(),
            ..self.defaults.clone()
        })
    }

    async fn run_job(
        self,
        job_id: JobId,
        image: InputFile,
        audio: InputFile,
        options: RunOptions,
    ) -> Result<VideoArtifact, PipelineError> {
        let mut job = Job::new(job_id);
        let mut lease = ScratchLease::new(Arc::clone(&self.store), job_id);

        let result = self.drive(&mut job, &image, &audio, &options).await;

        let released = self.store.release(job_id).await;
        lease.disarm();
        if let Err(e) = &released {
            warn!(error = %e, "Failed to release scratch storage");
            self.metrics.record_cleanup_failure();
        }

        match result {
            Ok(artifact) => {
                if released.is_ok() {
                    job.advance(JobStage::Cleaned);
                }
                self.metrics
                    .record_success(job.elapsed(), artifact.size() as u64);
                info!(
                    bytes = artifact.size(),
                    elapsed_ms = job.elapsed().as_millis() as u64,
                    "Video generated"
                );
                Ok(artifact)
            }
            Err(err) => {
                let failed_at = job.stage();
                job.fail(err.kind());
                self.metrics.record_failure(&err);
                if err.is_bug_signal() {
                    error!(stage = %failed_at, error = %err, "Inference tool misbehaved");
                } else {
                    warn!(stage = %failed_at, error = %err, "Generation failed");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        job: &mut Job,
        image: &InputFile,
        audio: &InputFile,
        options: &RunOptions,
    ) -> Result<VideoArtifact, PipelineError> {
        let paths = self.store.stage(job.id(), image, audio).await?;
        job.advance(JobStage::Staged);

        let request = RunRequest {
            image_path: paths.image_path,
            audio_path: paths.audio_path,
            output_dir: paths.output_dir,
        };
        job.advance(JobStage::Invoked);
        let output = self
            .runner
            .run(&request, options, self.shutdown.child_token())
            .await?;
        debug!(
            exit_code = output.exit_code,
            duration_ms = output.duration.as_millis() as u64,
            "Inference process exited"
        );

        let video = self.locator.locate(&request.output_dir).await?;
        job.advance(JobStage::Located);

        let data = read_video(&video).await?;
        job.advance(JobStage::Streamed);

        Ok(VideoArtifact::new(
            job.id(),
            data,
            job.elapsed().as_millis() as u64,
        ))
    }
}

async fn read_video(path: &Path) -> Result<Bytes, PipelineError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| PipelineError::storage("read output", path, e))
}

/// Releases a job's scratch entries when dropped while still armed, which
/// only happens if the job task unwinds before its normal release.
struct ScratchLease {
    store: Arc<ScratchStore>,
    job_id: JobId,
    armed: bool,
}

impl ScratchLease {
    fn new(store: Arc<ScratchStore>, job_id: JobId) -> Self {
        Self {
            store,
            job_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.release_blocking(self.job_id) {
            Ok(removed) => warn!(job_id = %self.job_id, removed, "Released scratch after abort"),
            Err(e) => error!(job_id = %self.job_id, error = %e, "Failed to release scratch after abort"),
        }
    }
}
