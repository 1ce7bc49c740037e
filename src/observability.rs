//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    transcodes_run: AtomicU64,
    orphans_reclaimed: AtomicU64,
    bytes_served: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transcode_run(&self) {
        self.transcodes_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn orphans_reclaimed(&self, count: u64) {
        self.orphans_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_served(&self, count: u64) {
        self.bytes_served.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            transcodes_run: self.transcodes_run.load(Ordering::Relaxed),
            orphans_reclaimed: self.orphans_reclaimed.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub transcodes_run: u64,
    pub orphans_reclaimed: u64,
    pub bytes_served: u64,
}
