//! Request and result types for the generation pipeline.

use bytes::Bytes;
use serde::Serialize;

use crate::job::JobId;

/// MIME type of every produced video.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Download name suggested to clients.
pub const VIDEO_FILE_NAME: &str = "generated_video.mp4";

/// One uploaded file, fully buffered.
#[derive(Debug, Clone, Default)]
pub struct InputFile {
    /// Client-supplied file name, if any.
    pub file_name: Option<String>,
    /// Client-supplied MIME type, if any.
    pub content_type: Option<String>,
    /// Raw contents.
    pub data: Bytes,
}

impl InputFile {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            file_name: None,
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the upload carried no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A request to turn one portrait and one audio clip into a video.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Portrait image.
    pub image: Option<InputFile>,
    /// Driving audio.
    pub audio: Option<InputFile>,
    /// Optional enhancer override.
    pub enhancer: Option<String>,
}

impl GenerationRequest {
    pub fn new(image: InputFile, audio: InputFile) -> Self {
        Self {
            image: Some(image),
            audio: Some(audio),
            enhancer: None,
        }
    }

    pub fn with_enhancer(mut self, enhancer: impl Into<String>) -> Self {
        self.enhancer = Some(enhancer.into());
        self
    }

    /// Names of the inputs that are absent or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.image.as_ref().is_none_or(InputFile::is_empty) {
            missing.push("image");
        }
        if self.audio.as_ref().is_none_or(InputFile::is_empty) {
            missing.push("audio");
        }
        missing
    }
}

/// The generated video, read fully into memory before scratch is released.
#[derive(Debug, Clone, Serialize)]
pub struct VideoArtifact {
    pub job_id: JobId,
    #[serde(skip)]
    pub data: Bytes,
    pub content_type: &'static str,
    pub file_name: &'static str,
    pub duration_ms: u64,
}

impl VideoArtifact {
    pub fn new(job_id: JobId, data: Bytes, duration_ms: u64) -> Self {
        Self {
            job_id,
            data,
            content_type: VIDEO_CONTENT_TYPE,
            file_name: VIDEO_FILE_NAME,
            duration_ms,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}
