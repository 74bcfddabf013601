//! Transcode metrics.
//!
//! A snapshot of the phase-2 worker pool, shared between the executor and
//! whoever reports on it. Serialisable to JSON for `--json` output.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-job state as seen from outside the executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub source_path: String,
    pub stage: String,
    pub encoder: String,
    pub target_kbps: u32,
    pub started_unix_ms: i64,
    pub size_in_bytes_before: u64,
}

/// Snapshot of the transcode pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    /// Jobs currently running
    pub jobs: Vec<JobMetrics>,
    pub queue_len: usize,
    pub running_jobs: usize,
    /// Highest `running_jobs` seen this run
    pub peak_running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub total_bytes_written: u64,
}

impl MetricsSnapshot {
    /// Record a job entering `Running`.
    pub fn job_started(&mut self, job: JobMetrics) {
        self.queue_len = self.queue_len.saturating_sub(1);
        self.jobs.push(job);
        self.running_jobs = self.jobs.len();
        self.peak_running_jobs = self.peak_running_jobs.max(self.running_jobs);
        self.touch();
    }

    /// Record a job leaving `Running`.
    pub fn job_finished(&mut self, id: &str, success: bool, bytes_written: u64) {
        self.jobs.retain(|j| j.id != id);
        self.running_jobs = self.jobs.len();
        if success {
            self.completed_jobs += 1;
            self.total_bytes_written += bytes_written;
        } else {
            self.failed_jobs += 1;
        }
        self.touch();
    }

    /// Record a cancelled job going back to the queue.
    pub fn job_requeued(&mut self, id: &str) {
        self.jobs.retain(|j| j.id != id);
        self.running_jobs = self.jobs.len();
        self.queue_len += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.timestamp_unix_ms = chrono::Utc::now().timestamp_millis();
    }
}

/// Shared metrics state for concurrent access across workers
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}
