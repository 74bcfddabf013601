//! Worker pool sizing for the transcode phase.

use crate::config::Config;

/// Default ceiling when the worker count is auto-derived.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Logical CPU cores available
    pub total_cores: usize,
    /// Maximum number of concurrent transcode jobs
    pub max_concurrent_jobs: usize,
}

impl ConcurrencyPlan {
    /// Derive a plan from configuration, detecting cores via num_cpus.
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get())
    }

    /// Explicit `run.workers` wins; 0 means `min(4, cores)`, never below 1.
    pub fn derive_with_cores(cfg: &Config, total_cores: usize) -> Self {
        let max_concurrent_jobs = if cfg.run.workers > 0 {
            cfg.run.workers as usize
        } else {
            total_cores.clamp(1, DEFAULT_MAX_WORKERS)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
        }
    }
}
