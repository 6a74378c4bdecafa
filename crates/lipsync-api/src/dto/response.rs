//! Response DTOs for JSON endpoints.

use lipsync_pipeline::MetricsSnapshot;
use serde::Serialize;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness response with pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealthResponse {
    /// `ok`, or `degraded` when scratch storage is not writable.
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub scratch_writable: bool,
    pub metrics: MetricsSnapshot,
}
