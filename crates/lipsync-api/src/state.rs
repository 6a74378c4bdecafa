//! Application state shared across all handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lipsync_core::config::AppConfig;
use lipsync_pipeline::PipelineOrchestrator;

/// Shared state; cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: PipelineOrchestrator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: PipelineOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            started_at: Utc::now(),
        }
    }

    /// Whole seconds since the state was built.
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
