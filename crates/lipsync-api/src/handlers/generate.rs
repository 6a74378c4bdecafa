//! Talking-head video generation endpoint.

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use lipsync_core::error::AppError;
use lipsync_pipeline::{GenerationRequest, InputFile};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

const INVALID_MULTIPART_MESSAGE: &str = "Invalid multipart form data";
const TOO_LARGE_MESSAGE: &str = "Upload exceeds the maximum allowed size";

/// POST /api/sadtalker (also /api/generate)
///
/// Multipart fields: `image` (file), `audio` (file), optional `enhancer`
/// (text). Responds with the raw MP4 as an attachment.
pub async fn generate_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "Rejected non-multipart request");
        AppError::validation(INVALID_MULTIPART_MESSAGE)
    })?;

    let request = read_request(&mut multipart).await?;
    let video = state.orchestrator.execute(request).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, video.content_type)
        .header(header::CONTENT_DISPOSITION, video.content_disposition())
        .header(header::CONTENT_LENGTH, video.size())
        .body(Body::from(video.data))
        .map_err(|e| AppError::internal(format!("Response build failed: {e}")))?;

    Ok(response)
}

/// Collect the known fields. Unknown fields are skipped; for repeated
/// fields the first occurrence wins.
async fn read_request(multipart: &mut Multipart) -> Result<GenerationRequest, ApiError> {
    let mut request = GenerationRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" if request.image.is_none() => {
                request.image = Some(read_file(field).await?);
            }
            "audio" if request.audio.is_none() => {
                request.audio = Some(read_file(field).await?);
            }
            "enhancer" if request.enhancer.is_none() => {
                request.enhancer = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    Ok(request)
}

async fn read_file(field: Field<'_>) -> Result<InputFile, ApiError> {
    let file_name = field.file_name().map(String::from);
    let content_type = field.content_type().map(String::from);
    let data = field.bytes().await.map_err(multipart_error)?;

    Ok(InputFile {
        file_name,
        content_type,
        data,
    })
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(TOO_LARGE_MESSAGE).into()
    } else {
        debug!(error = %err.body_text(), "Malformed multipart body");
        AppError::validation(INVALID_MULTIPART_MESSAGE).into()
    }
}
