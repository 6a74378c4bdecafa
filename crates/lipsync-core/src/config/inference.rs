//! Configuration for the external talking-head inference process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// How the output locator resolves more than one candidate video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// More than one candidate is an error (the tool promises exactly one).
    #[default]
    Strict,
    /// Pick the lexicographically first candidate.
    FirstMatch,
}

/// Configuration for spawning and supervising the inference executable.
///
/// The spawned command line is
/// `program program_args.. --driven_audio A --source_image I --result_dir D --enhancer E extra_args..`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_default_enhancer"))]
pub struct InferenceConfig {
    /// Executable to spawn (interpreter or wrapper script).
    #[serde(default = "default_program")]
    #[validate(length(min = 1))]
    pub program: String,

    /// Leading arguments, e.g. interpreter flags and the script path.
    #[serde(default = "default_program_args")]
    pub program_args: Vec<String>,

    /// Working directory for the child process.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Enhancer passed when the request does not choose one.
    #[serde(default = "default_enhancer")]
    #[validate(length(min = 1))]
    pub enhancer: String,

    /// Enhancers a request may select.
    #[serde(default = "default_allowed_enhancers")]
    #[validate(length(min = 1))]
    pub allowed_enhancers: Vec<String>,

    /// Flags appended after the standard arguments, in order.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Wall-clock limit for a single inference run.
    #[serde(default = "default_timeout_seconds")]
    #[validate(range(min = 1, max = 86400))]
    pub timeout_seconds: u64,

    /// Maximum characters of stderr kept for diagnostics.
    #[serde(default = "default_stderr_limit")]
    #[validate(range(min = 64))]
    pub stderr_limit: usize,

    /// Extension of the produced video, without the dot.
    #[serde(default = "default_output_extension")]
    #[validate(length(min = 1, max = 16))]
    pub output_extension: String,

    /// Resolution policy for multiple candidate outputs.
    #[serde(default)]
    pub selection_policy: SelectionPolicy,

    /// Outputs smaller than this are treated as missing.
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: default_program_args(),
            working_dir: None,
            env: HashMap::new(),
            enhancer: default_enhancer(),
            allowed_enhancers: default_allowed_enhancers(),
            extra_args: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            stderr_limit: default_stderr_limit(),
            output_extension: default_output_extension(),
            selection_policy: SelectionPolicy::default(),
            min_output_bytes: default_min_output_bytes(),
        }
    }
}

impl InferenceConfig {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Working directory as a path, if configured.
    pub fn working_dir_path(&self) -> Option<PathBuf> {
        self.working_dir.as_ref().map(PathBuf::from)
    }

    /// Whether a request may select `name`.
    pub fn is_enhancer_allowed(&self, name: &str) -> bool {
        self.allowed_enhancers.iter().any(|e| e == name)
    }
}

fn validate_default_enhancer(config: &InferenceConfig) -> Result<(), ValidationError> {
    if config.is_enhancer_allowed(&config.enhancer) {
        Ok(())
    } else {
        Err(ValidationError::new("enhancer_not_allowed"))
    }
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_program_args() -> Vec<String> {
    vec!["-u".to_string(), "python/inference.py".to_string()]
}

fn default_enhancer() -> String {
    "gfpgan".to_string()
}

fn default_allowed_enhancers() -> Vec<String> {
    vec!["gfpgan".to_string(), "RestoreFormer".to_string()]
}

fn default_timeout_seconds() -> u64 {
    900
}

fn default_stderr_limit() -> usize {
    2000
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

fn default_min_output_bytes() -> u64 {
    1
}
