//! Shared helpers for pipeline integration tests.
//!
//! The inference executable is replaced by a `/bin/sh` script that sees the
//! same argument vector the real tool would.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lipsync_core::config::SelectionPolicy;
use lipsync_pipeline::{
    GenerationRequest, InputFile, OutputLocator, PipelineOrchestrator, ProcessRunner, RunOptions,
    ScratchStore,
};
use tempfile::TempDir;

/// Records the argument vector next to the script, then parses
/// `--result_dir` into `$dir`. The test body follows.
const SCRIPT_PRELUDE: &str = r#"
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
dir=""
while [ $# -gt 0 ]; do
  case "$1" in
    --result_dir) dir="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

/// A pipeline wired to a mock inference script.
pub struct TestPipeline {
    pub temp: TempDir,
    pub scratch: PathBuf,
    pub orchestrator: PipelineOrchestrator,
}

impl TestPipeline {
    /// Build a pipeline whose inference step runs `body` under `/bin/sh`.
    pub async fn new(body: &str) -> Self {
        Self::with_timeout(body, Duration::from_secs(30)).await
    }

    pub async fn with_timeout(body: &str, timeout: Duration) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = temp.path().join("uploads");
        let script = temp.path().join("inference.sh");
        std::fs::write(&script, format!("{SCRIPT_PRELUDE}\n{body}\n")).expect("write script");

        let store = ScratchStore::new(&scratch).await.expect("scratch store");
        let runner = ProcessRunner::new("/bin/sh", vec![script.to_string_lossy().into_owned()])
            .with_stderr_limit(256);
        let options = RunOptions {
            timeout,
            ..RunOptions::default()
        };
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(store),
            Arc::new(runner),
            OutputLocator::new("mp4", SelectionPolicy::Strict),
            options,
        )
        .with_allowed_enhancers(vec!["gfpgan".to_string(), "RestoreFormer".to_string()]);

        Self {
            temp,
            scratch,
            orchestrator,
        }
    }

    /// A path under the test directory but outside scratch storage.
    pub fn side_file(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    /// Arguments the last inference run received, one per element.
    pub fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.side_file("args.txt"))
            .expect("args file")
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of entries left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(&self.scratch)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Poll until the scratch root is empty or `limit` elapses.
    pub async fn wait_for_empty_scratch(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.scratch_entries() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.scratch_entries() == 0
    }
}

/// A 10-byte PNG upload and a 10-byte WAV upload.
pub fn sample_request() -> GenerationRequest {
    GenerationRequest::new(
        InputFile::new(vec![0x89u8; 10])
            .with_file_name("portrait.png")
            .with_content_type("image/png"),
        InputFile::new(vec![0x52u8; 10])
            .with_file_name("speech.wav")
            .with_content_type("audio/wav"),
    )
}

/// Whether `pid` is gone or only a zombie awaiting its reaper.
#[cfg(target_os = "linux")]
pub fn process_is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
    }
}

/// Poll [`process_is_dead`] for up to two seconds.
#[cfg(target_os = "linux")]
pub async fn wait_for_process_exit(pid: u32) -> bool {
    for _ in 0..80 {
        if process_is_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    process_is_dead(pid)
}

pub fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid")
}
