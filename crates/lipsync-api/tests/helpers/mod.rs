//! Shared test helpers for API integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use lipsync_api::{AppState, build_router};
use lipsync_core::config::AppConfig;
use lipsync_pipeline::{
    InferenceRunner, OutputLocator, PipelineError, PipelineOrchestrator, RunOptions, RunOutput,
    RunRequest, ScratchStore,
};

pub const BOUNDARY: &str = "lipsync-test-boundary";

/// Inference stand-in that writes `video` as `result.mp4`.
#[derive(Debug)]
pub struct VideoRunner {
    pub video: Vec<u8>,
}

#[async_trait]
impl InferenceRunner for VideoRunner {
    async fn run(
        &self,
        request: &RunRequest,
        _options: &RunOptions,
        _cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError> {
        write_video(request, &self.video).await
    }
}

/// Inference stand-in whose "video" is the enhancer it was asked to use.
#[derive(Debug)]
pub struct EnhancerEchoRunner;

#[async_trait]
impl InferenceRunner for EnhancerEchoRunner {
    async fn run(
        &self,
        request: &RunRequest,
        options: &RunOptions,
        _cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError> {
        write_video(request, options.enhancer.as_bytes()).await
    }
}

async fn write_video(request: &RunRequest, video: &[u8]) -> Result<RunOutput, PipelineError> {
    let path = request.output_dir.join("result.mp4");
    tokio::fs::write(&path, video)
        .await
        .map_err(|e| PipelineError::storage("write", &path, e))?;
    Ok(RunOutput {
        exit_code: 0,
        duration: Duration::from_millis(1),
        stdout_tail: String::new(),
        stderr_tail: String::new(),
    })
}

/// Inference stand-in that always exits 1.
#[derive(Debug)]
pub struct FailingRunner;

#[async_trait]
impl InferenceRunner for FailingRunner {
    async fn run(
        &self,
        _request: &RunRequest,
        _options: &RunOptions,
        _cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError> {
        Err(PipelineError::ProcessFailed {
            code: Some(1),
            status: "exit status: 1".to_string(),
            stderr: "CUDA out of memory in /opt/models/secret.pth".to_string(),
        })
    }
}

/// Test application context.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub scratch: TempDir,
}

/// A captured HTTP response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

impl TestApp {
    pub async fn new(runner: Arc<dyn InferenceRunner>) -> Self {
        Self::with_shutdown(runner, CancellationToken::new()).await
    }

    /// An app whose jobs observe `shutdown`.
    pub async fn with_shutdown(runner: Arc<dyn InferenceRunner>, shutdown: CancellationToken) -> Self {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.scratch.root = scratch.path().to_string_lossy().into_owned();
        config.server.max_upload_size_bytes = 64 * 1024;

        let store = ScratchStore::new(scratch.path()).await.expect("store");
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(store),
            runner,
            OutputLocator::from_config(&config.inference),
            RunOptions::from_config(&config.inference),
        )
        .with_allowed_enhancers(config.inference.allowed_enhancers.clone())
        .with_shutdown(shutdown);

        let state = AppState::new(config, orchestrator);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            scratch,
        }
    }

    pub async fn with_video(video: &[u8]) -> Self {
        Self::new(Arc::new(VideoRunner {
            video: video.to_vec(),
        }))
        .await
    }

    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.expect("request");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        self.send(request).await
    }

    pub async fn post_multipart(&self, uri: &str, form: MultipartForm) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(form.finish()))
            .expect("request");
        self.send(request).await
    }
}

/// Minimal multipart/form-data body builder.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

/// A form with a 10-byte PNG and a 10-byte WAV.
pub fn sample_form() -> MultipartForm {
    MultipartForm::new()
        .file("image", "face.png", "image/png", &[0x89; 10])
        .file("audio", "voice.wav", "audio/wav", &[0x52; 10])
}
