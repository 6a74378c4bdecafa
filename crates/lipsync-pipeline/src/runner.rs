//! Supervision of the external inference process.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lipsync_core::config::InferenceConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::PipelineError;

/// How long to wait for output pipes to close after the process exits.
/// Grandchildren that inherited the pipes can keep them open.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Inputs and output location of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_dir: PathBuf,
}

/// Per-run tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Face enhancer passed as `--enhancer`.
    pub enhancer: String,
    /// Passthrough flags appended after the standard arguments, in order.
    pub extra_args: Vec<String>,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            enhancer: "gfpgan".to_string(),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(900),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            enhancer: config.enhancer.clone(),
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
        }
    }
}

/// What a successful run left behind besides its output directory.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// Runs inference for one job.
///
/// Implementations must guarantee the process is no longer running when
/// `run` returns, whatever the outcome.
#[async_trait]
pub trait InferenceRunner: Send + Sync + fmt::Debug + 'static {
    async fn run(
        &self,
        request: &RunRequest,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError>;
}

/// Spawns the configured executable as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    program_args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    stderr_limit: usize,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, program_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            program_args,
            working_dir: None,
            env: HashMap::new(),
            stderr_limit: 2000,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            program: config.program.clone(),
            program_args: config.program_args.clone(),
            working_dir: config.working_dir_path(),
            env: config.env.clone(),
            stderr_limit: config.stderr_limit,
        }
    }

    pub fn with_stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    /// Full argument vector after the program name.
    pub fn build_args(&self, request: &RunRequest, options: &RunOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.program_args.iter().map(OsString::from).collect();
        args.push("--driven_audio".into());
        args.push(request.audio_path.clone().into_os_string());
        args.push("--source_image".into());
        args.push(request.image_path.clone().into_os_string());
        args.push("--result_dir".into());
        args.push(request.output_dir.clone().into_os_string());
        args.push("--enhancer".into());
        args.push(options.enhancer.clone().into());
        args.extend(options.extra_args.iter().map(OsString::from));
        args
    }

    fn command(&self, request: &RunRequest, options: &RunOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(request, options))
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so a kill reaches everything the tool forks.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl InferenceRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %self.program, enhancer = %options.enhancer))]
    async fn run(
        &self,
        request: &RunRequest,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError> {
        let mut cmd = self.command(request, options);

        debug!(
            output_dir = %request.output_dir.display(),
            timeout_s = options.timeout.as_secs(),
            "Spawning inference process"
        );

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| PipelineError::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe buffer.
        let byte_budget = self.stderr_limit.saturating_mul(4);
        let stdout_task = child.stdout.take().map(|s| spawn_tail_reader(s, byte_budget));
        let stderr_task = child.stderr.take().map(|s| spawn_tail_reader(s, byte_budget));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(options.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(status) => {
                let status = status.map_err(|source| PipelineError::SpawnFailed {
                    program: self.program.clone(),
                    source,
                })?;
                let elapsed = start.elapsed();
                // Anything the tool left running in its group would outlive
                // the job and hold the pipes open.
                kill_stragglers(pid);
                let (stdout, stderr) =
                    tokio::join!(collect_tail(stdout_task), collect_tail(stderr_task));
                let stdout = truncate_tail(&stdout, self.stderr_limit);
                let stderr = truncate_tail(&stderr, self.stderr_limit);

                if status.success() {
                    info!(elapsed_ms = elapsed.as_millis() as u64, "Inference completed");
                    Ok(RunOutput {
                        exit_code: status.code().unwrap_or(0),
                        duration: elapsed,
                        stdout_tail: stdout,
                        stderr_tail: stderr,
                    })
                } else {
                    error!(
                        code = ?status.code(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        stderr = %stderr,
                        "Inference process failed"
                    );
                    Err(PipelineError::ProcessFailed {
                        code: status.code(),
                        status: status.to_string(),
                        stderr,
                    })
                }
            }
            Outcome::TimedOut => {
                error!(
                    timeout_s = options.timeout.as_secs(),
                    "Inference process timed out, killing process group"
                );
                kill_process_tree(&mut child).await;
                abort_readers(stdout_task, stderr_task);
                Err(PipelineError::Timeout {
                    timeout_seconds: options.timeout.as_secs(),
                })
            }
            Outcome::Cancelled => {
                info!("Inference cancelled, killing process group");
                kill_process_tree(&mut child).await;
                abort_readers(stdout_task, stderr_task);
                Err(PipelineError::Cancelled)
            }
        }
    }
}

/// Kill the child and its process group, then reap the child.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_process_group(pid);
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Child already exited");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed inference process");
    }
}

/// Kill what remains of an exited child's process group.
#[cfg(unix)]
fn kill_stragglers(pid: Option<u32>) {
    if let Some(pid) = pid {
        signal_process_group(pid);
    }
}

#[cfg(not(unix))]
fn kill_stragglers(_pid: Option<u32>) {}

#[cfg(unix)]
fn signal_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The kernel keeps
    // a group id reserved while any member lives; an empty group is ESRCH.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "Process group kill failed");
    }
}

fn spawn_tail_reader<R>(mut reader: R, budget: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > budget {
                        let excess = tail.len() - budget;
                        tail.drain(..excess);
                    }
                }
            }
        }
        tail
    })
}

async fn collect_tail(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            warn!("Output pipe still open after process exit");
            String::new()
        }
    }
}

fn abort_readers(stdout: Option<JoinHandle<Vec<u8>>>, stderr: Option<JoinHandle<Vec<u8>>>) {
    for task in [stdout, stderr].into_iter().flatten() {
        task.abort();
    }
}

/// Keep at most the last `limit` characters of `text`, marking the cut.
pub fn truncate_tail(text: &str, limit: usize) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= limit {
        return trimmed.to_string();
    }
    let skip = count - limit;
    let tail: String = trimmed.chars().skip(skip).collect();
    format!("…{tail}")
}
