//! Per-job scratch storage.
//!
//! Every job owns the files `<root>/<job_id>_image.<ext>`,
//! `<root>/<job_id>_audio.<ext>` and the directory `<root>/<job_id>/`.
//! Nothing else under the root is touched by a job, so concurrent jobs never
//! collide and release of one job never affects another.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lipsync_core::config::ScratchConfig;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::job::JobId;
use crate::models::InputFile;

/// Locations of a staged job's inputs and output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPaths {
    pub image_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_dir: PathBuf,
}

/// Owner of the process-wide scratch root.
#[derive(Debug)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::storage("create scratch root", &root, e))?;
        Ok(Self { root })
    }

    /// Open the store described by `config`, purging stale leftovers when
    /// configured.
    pub async fn open(config: &ScratchConfig) -> Result<Self, PipelineError> {
        let store = Self::new(config.root_path()).await?;
        if config.purge_on_startup {
            let removed = store
                .purge_stale(Duration::from_secs(config.stale_after_seconds))
                .await?;
            if removed > 0 {
                info!(root = %store.root.display(), removed, "Purged stale scratch entries");
            }
        }
        Ok(store)
    }

    /// The scratch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the inference process writes into for `job_id`.
    pub fn output_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Persist both inputs and create the job's empty output directory.
    ///
    /// The output directory must not already exist. On failure, whatever
    /// was written stays on disk for [`ScratchStore::release`] to remove.
    #[instrument(skip(self, image, audio), fields(job_id = %job_id))]
    pub async fn stage(
        &self,
        job_id: JobId,
        image: &InputFile,
        audio: &InputFile,
    ) -> Result<StagedPaths, PipelineError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PipelineError::storage("create scratch root", &self.root, e))?;

        let output_dir = self.output_dir(job_id);
        tokio::fs::create_dir(&output_dir)
            .await
            .map_err(|e| PipelineError::storage("create output directory", &output_dir, e))?;

        let image_path = self.root.join(format!(
            "{}_image.{}",
            job_id,
            input_extension(image, ImageOrAudio::Image)
        ));
        let audio_path = self.root.join(format!(
            "{}_audio.{}",
            job_id,
            input_extension(audio, ImageOrAudio::Audio)
        ));

        futures::try_join!(
            write_new_file(&image_path, image),
            write_new_file(&audio_path, audio)
        )?;

        debug!(
            image = %image_path.display(),
            audio = %audio_path.display(),
            image_bytes = image.size(),
            audio_bytes = audio.size(),
            "Inputs staged"
        );

        Ok(StagedPaths {
            image_path,
            audio_path,
            output_dir,
        })
    }

    /// Remove everything owned by `job_id`. Idempotent.
    ///
    /// Keeps going after individual failures; the first one is returned.
    /// Returns how many top-level entries were removed.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn release(&self, job_id: JobId) -> Result<u64, PipelineError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::storage("scan scratch root", &self.root, e)),
        };

        let mut removed = 0u64;
        let mut first_error: Option<PipelineError> = None;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    first_error
                        .get_or_insert_with(|| PipelineError::storage("scan scratch root", &self.root, e));
                    break;
                }
            };

            if !is_owned_by(&entry.file_name().to_string_lossy(), job_id) {
                continue;
            }

            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Scratch entry already gone");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove scratch entry");
                    first_error.get_or_insert_with(|| PipelineError::storage("remove", &path, e));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!(removed, "Scratch released");
                Ok(removed)
            }
        }
    }

    /// Blocking variant of [`ScratchStore::release`] for use from `Drop`.
    pub fn release_blocking(&self, job_id: JobId) -> Result<u64, PipelineError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::storage("scan scratch root", &self.root, e)),
        };

        let mut removed = 0u64;
        let mut first_error: Option<PipelineError> = None;

        for entry in entries.flatten() {
            if !is_owned_by(&entry.file_name().to_string_lossy(), job_id) {
                continue;
            }
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    first_error.get_or_insert_with(|| PipelineError::storage("remove", &path, e));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Delete top-level entries whose modification time is older than
    /// `older_than`. Used at startup to clear leftovers of a crashed process.
    pub async fn purge_stale(&self, older_than: Duration) -> Result<u64, PipelineError> {
        let cutoff: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| PipelineError::storage("scan scratch root", &self.root, e))?;

        let mut removed = 0u64;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage("scan scratch root", &self.root, e))?
        {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if DateTime::<Utc>::from(modified) >= cutoff {
                continue;
            }

            let path = entry.path();
            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge stale entry"),
            }
        }

        Ok(removed)
    }

    /// Whether a file can be created and removed under the root.
    pub async fn is_writable(&self) -> bool {
        let probe = self.root.join(format!(".probe-{}", Uuid::now_v7().simple()));
        match tokio::fs::write(&probe, b"ok").await {
            Ok(()) => tokio::fs::remove_file(&probe).await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Whether a top-level scratch entry named `name` belongs to `job_id`.
fn is_owned_by(name: &str, job_id: JobId) -> bool {
    let id = job_id.to_string();
    match name.strip_prefix(id.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

async fn write_new_file(path: &Path, input: &InputFile) -> Result<(), PipelineError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| PipelineError::storage("create", path, e))?;
    file.write_all(&input.data)
        .await
        .map_err(|e| PipelineError::storage("write", path, e))?;
    file.sync_data()
        .await
        .map_err(|e| PipelineError::storage("sync", path, e))?;
    Ok(())
}

#[derive(Clone, Copy)]
enum ImageOrAudio {
    Image,
    Audio,
}

/// Pick a safe extension: the client's, if it is short and alphanumeric,
/// else one derived from the content type, else `bin`.
fn input_extension(input: &InputFile, kind: ImageOrAudio) -> String {
    let from_name = input
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| (1..=10).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    if let Some(ext) = from_name {
        return ext;
    }

    let mime = input
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());

    let derived = match (kind, mime.as_deref()) {
        (ImageOrAudio::Image, Some("image/png")) => Some("png"),
        (ImageOrAudio::Image, Some("image/jpeg" | "image/jpg")) => Some("jpg"),
        (ImageOrAudio::Image, Some("image/webp")) => Some("webp"),
        (ImageOrAudio::Image, Some("image/bmp")) => Some("bmp"),
        (ImageOrAudio::Audio, Some("audio/wav" | "audio/x-wav" | "audio/wave")) => Some("wav"),
        (ImageOrAudio::Audio, Some("audio/mpeg" | "audio/mp3")) => Some("mp3"),
        (ImageOrAudio::Audio, Some("audio/ogg")) => Some("ogg"),
        (ImageOrAudio::Audio, Some("audio/flac" | "audio/x-flac")) => Some("flac"),
        (ImageOrAudio::Audio, Some("audio/mp4" | "audio/x-m4a")) => Some("m4a"),
        (ImageOrAudio::Audio, Some("audio/webm")) => Some("webm"),
        _ => None,
    };

    derived.unwrap_or("bin").to_string()
}
