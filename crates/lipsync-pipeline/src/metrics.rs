//! Generation counters and latency percentiles, reported by the detailed
//! health endpoint.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::{PipelineError, PipelineErrorKind};

/// Most recent successful job durations kept for percentiles.
const MAX_SAMPLES: usize = 1000;

/// Process-wide generation metrics. Lock-free apart from the sample window.
#[derive(Debug, Default)]
pub struct GenerationMetrics {
    started: AtomicU64,
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    missing_artifact: AtomicU64,
    cleanup_failures: AtomicU64,
    output_bytes: AtomicU64,
    samples: Mutex<VecDeque<Duration>>,
}

impl GenerationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, duration: Duration, output_bytes: u64) {
        self.finish();
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.output_bytes.fetch_add(output_bytes, Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(duration);
        }
    }

    /// Count a failed job under its error kind.
    pub fn record_failure(&self, err: &PipelineError) {
        self.finish();
        self.failed.fetch_add(1, Ordering::Relaxed);
        let bucket = match err.kind() {
            PipelineErrorKind::Timeout => Some(&self.timed_out),
            PipelineErrorKind::Cancelled => Some(&self.cancelled),
            PipelineErrorKind::NoArtifact | PipelineErrorKind::AmbiguousArtifact => {
                Some(&self.missing_artifact)
            }
            _ => None,
        };
        if let Some(counter) = bucket {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        // Saturating: a failure recorded without a start must not wrap.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut millis: Vec<u64> = self
            .samples
            .lock()
            .map(|s| s.iter().map(|d| d.as_millis() as u64).collect())
            .unwrap_or_default();
        millis.sort_unstable();

        MetricsSnapshot {
            jobs_started: self.started.load(Ordering::Relaxed),
            jobs_in_flight: self.in_flight.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_timed_out: self.timed_out.load(Ordering::Relaxed),
            jobs_cancelled: self.cancelled.load(Ordering::Relaxed),
            jobs_missing_artifact: self.missing_artifact.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            total_output_bytes: self.output_bytes.load(Ordering::Relaxed),
            duration_p50_ms: percentile(&millis, 50),
            duration_p95_ms: percentile(&millis, 95),
            duration_p99_ms: percentile(&millis, 99),
            sample_count: millis.len() as u64,
        }
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[u64], pct: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted.get(rank - 1).copied()
}

/// Point-in-time view of [`GenerationMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_in_flight: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_cancelled: u64,
    /// Jobs whose process succeeded without leaving exactly one video.
    pub jobs_missing_artifact: u64,
    pub cleanup_failures: u64,
    pub total_output_bytes: u64,
    pub duration_p50_ms: Option<u64>,
    pub duration_p95_ms: Option<u64>,
    pub duration_p99_ms: Option<u64>,
    pub sample_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_outcome() {
        let m = GenerationMetrics::new();
        for _ in 0..4 {
            m.record_started();
        }
        m.record_success(Duration::from_millis(1200), 2048);
        m.record_failure(&PipelineError::Timeout { timeout_seconds: 5 });
        m.record_failure(&PipelineError::Cancelled);

        let snap = m.snapshot();
        assert_eq!(snap.jobs_started, 4);
        assert_eq!(snap.jobs_in_flight, 1);
        assert_eq!(snap.jobs_succeeded, 1);
        assert_eq!(snap.jobs_failed, 2);
        assert_eq!(snap.jobs_timed_out, 1);
        assert_eq!(snap.jobs_cancelled, 1);
        assert_eq!(snap.total_output_bytes, 2048);
    }

    #[test]
    fn test_percentiles() {
        let m = GenerationMetrics::new();
        for i in 1..=100u64 {
            m.record_success(Duration::from_millis(i * 10), 1);
        }
        let snap = m.snapshot();
        assert_eq!(snap.duration_p50_ms, Some(500));
        assert_eq!(snap.duration_p95_ms, Some(950));
        assert_eq!(snap.duration_p99_ms, Some(990));
        assert_eq!(snap.sample_count, 100);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = GenerationMetrics::new().snapshot();
        assert_eq!(snap.duration_p50_ms, None);
        assert_eq!(snap.jobs_in_flight, 0);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let m = GenerationMetrics::new();
        for i in 0..(MAX_SAMPLES as u64 + 50) {
            m.record_success(Duration::from_millis(i), 1);
        }
        assert_eq!(m.snapshot().sample_count, MAX_SAMPLES as u64);
    }
}
