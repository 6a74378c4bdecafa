//! Finds the video the inference process left in its output directory.

use std::path::{Path, PathBuf};

use lipsync_core::config::{InferenceConfig, SelectionPolicy};
use tracing::debug;

use crate::error::PipelineError;

/// Resolves an output directory to exactly one video file.
#[derive(Debug, Clone)]
pub struct OutputLocator {
    extension: String,
    policy: SelectionPolicy,
    min_output_bytes: u64,
}

impl Default for OutputLocator {
    fn default() -> Self {
        Self::new("mp4", SelectionPolicy::Strict)
    }
}

impl OutputLocator {
    /// Match files ending in `.extension` (a leading dot is ignored).
    pub fn new(extension: &str, policy: SelectionPolicy) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            policy,
            min_output_bytes: 1,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(&config.output_extension, config.selection_policy)
            .with_min_output_bytes(config.min_output_bytes)
    }

    pub fn with_min_output_bytes(mut self, min: u64) -> Self {
        self.min_output_bytes = min;
        self
    }

    /// Find the single candidate video in `dir`.
    ///
    /// Only top-level regular files count; subdirectories are not searched.
    pub async fn locate(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PipelineError::storage("list output directory", dir, e))?;

        let suffix = format!(".{}", self.extension);
        let mut candidates: Vec<String> = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage("list output directory", dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.to_ascii_lowercase().ends_with(&suffix) {
                candidates.push(name);
            }
        }

        candidates.sort();

        let chosen = match (candidates.len(), self.policy) {
            (0, _) => {
                return Err(PipelineError::NoArtifact {
                    dir: dir.to_path_buf(),
                    extension: self.extension.clone(),
                });
            }
            (1, _) | (_, SelectionPolicy::FirstMatch) => candidates.swap_remove(0),
            (_, SelectionPolicy::Strict) => {
                return Err(PipelineError::AmbiguousArtifact {
                    dir: dir.to_path_buf(),
                    candidates,
                });
            }
        };

        let path = dir.join(&chosen);
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| PipelineError::storage("stat output", &path, e))?
            .len();
        if size < self.min_output_bytes {
            return Err(PipelineError::EmptyArtifact { path, size });
        }

        debug!(path = %path.display(), size, "Output located");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, bytes: usize) {
        std::fs::write(dir.join(name), vec![0u8; bytes]).expect("write");
    }

    #[tokio::test]
    async fn test_zero_candidates() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "log.txt", 5);
        let err = OutputLocator::default().locate(temp.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoArtifact { .. }));
    }

    #[tokio::test]
    async fn test_single_candidate_case_insensitive() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "Result.MP4", 20);
        touch(temp.path(), "frames.txt", 5);
        let path = OutputLocator::default().locate(temp.path()).await.expect("locate");
        assert_eq!(path, temp.path().join("Result.MP4"));
    }

    #[tokio::test]
    async fn test_nested_videos_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join("tmp")).expect("mkdir");
        touch(&temp.path().join("tmp"), "partial.mp4", 20);
        std::fs::create_dir(temp.path().join("dir.mp4")).expect("mkdir");
        touch(temp.path(), "final.mp4", 20);
        let path = OutputLocator::default().locate(temp.path()).await.expect("locate");
        assert_eq!(path, temp.path().join("final.mp4"));
    }

    #[tokio::test]
    async fn test_many_candidates_strict_vs_first_match() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "b.mp4", 20);
        touch(temp.path(), "a.mp4", 20);
        touch(temp.path(), "c.mp4", 20);

        let err = OutputLocator::default().locate(temp.path()).await.unwrap_err();
        match err {
            PipelineError::AmbiguousArtifact { candidates, .. } => {
                assert_eq!(candidates, vec!["a.mp4", "b.mp4", "c.mp4"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let path = OutputLocator::new("mp4", SelectionPolicy::FirstMatch)
            .locate(temp.path())
            .await
            .expect("locate");
        assert_eq!(path, temp.path().join("a.mp4"));
    }

    #[tokio::test]
    async fn test_empty_output_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "out.mp4", 0);
        let err = OutputLocator::default().locate(temp.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyArtifact { size: 0, .. }));
    }

    #[tokio::test]
    async fn test_missing_directory_is_storage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = OutputLocator::default()
            .locate(&temp.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage { .. }));
    }
}
