//! Pipeline driver.
//!
//! One run over a library root:
//! 1. classify, resolve, route and stage every file in Queue, one at a time
//! 2. transcode everything in Staged on the bounded worker pool
//! 3. clean up (skipped when the run was cancelled)

use crate::classify::{Classification, Classifier};
use crate::cleanup::{Cleaner, CleanupReport};
use crate::concurrency::ConcurrencyPlan;
use crate::config::{Config, ConfigError};
use crate::encode::Transcoder;
use crate::job_executor::{BatchReport, JobExecutor, JobPlanner, JobState};
use crate::layout::Layout;
use crate::metrics::{new_shared_metrics, MetricsSnapshot, SharedMetrics};
use crate::probe::Prober;
use crate::resolver::{resolve_candidate, MetadataResolver};
use crate::routing::{Destination, Router};
use crate::scan::{scan_area, ScannedFile};
use crate::stage::{FileMove, StageManager, StageOutcome, StageRecord};
use crate::startup::{check_root, StartupError};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that abort a run before any file is touched.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Invalid provider tag pattern: {0}")]
    TagPattern(#[from] regex::Error),

    #[error("Failed to prepare library layout: {0}")]
    Layout(std::io::Error),
}

/// What a run did (or, in dry-run, would do).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub cancelled: bool,
    pub ready: usize,
    pub staged_for_transcode: usize,
    pub transcoded: usize,
    pub manual_review: usize,
    pub errored: usize,
    pub skipped_tagged: usize,
    /// Transcode jobs left in Staged by a cancelled run.
    pub pending_transcodes: usize,
    /// Transcode sources moved to Kept Sources (keep-source runs).
    pub kept_sources: usize,
    /// Every (source, destination) pair, in the order it happened.
    pub moves: Vec<FileMove>,
    /// Set when there were transcode jobs and every one of them failed.
    pub transcode_batch_failed: bool,
    pub metrics: MetricsSnapshot,
    pub cleanup: Option<CleanupReport>,
}

impl RunSummary {
    fn count_stage(&mut self, tagged: bool, record: &StageRecord) {
        if let StageOutcome::Failed { .. } = record.outcome {
            self.errored += 1;
        } else if tagged {
            self.skipped_tagged += 1;
        } else {
            match record.decision {
                Destination::ReadyForDelivery => self.ready += 1,
                Destination::NeedsTranscode => self.staged_for_transcode += 1,
                Destination::ManualReview => self.manual_review += 1,
                Destination::Errored => self.errored += 1,
            }
        }

        if let Some(dest) = record.final_path() {
            self.moves.push(FileMove {
                source: record.source.clone(),
                destination: dest.to_path_buf(),
            });
        }
    }

    fn count_batch(&mut self, report: &BatchReport) {
        self.transcoded += report.completed;
        self.errored += report.errored;
        self.pending_transcodes += report.pending;
        self.transcode_batch_failed = report.all_failed();

        for job in &report.jobs {
            let delivered = matches!(
                (&job.state, self.dry_run),
                (JobState::Completed, _) | (JobState::Queued, true)
            );
            let destinations = if delivered {
                vec![Some(&job.target_path), job.kept_path.as_ref()]
            } else if let JobState::Errored(_) = job.state {
                vec![job.errored_to.as_ref()]
            } else {
                Vec::new()
            };
            for destination in destinations.into_iter().flatten() {
                self.moves.push(FileMove {
                    source: job.staged_path.clone(),
                    destination: destination.clone(),
                });
            }
            if delivered && job.kept_path.is_some() {
                self.kept_sources += 1;
            }
        }
    }

    /// Distinct (source, destination) pairs.
    pub fn move_set(&self) -> HashSet<FileMove> {
        self.moves.iter().cloned().collect()
    }
}

/// Runtime components for one library root
pub struct Pipeline {
    config: Arc<Config>,
    layout: Layout,
    classifier: Classifier,
    router: Router,
    resolver: Arc<dyn MetadataResolver>,
    executor: JobExecutor,
    metrics: SharedMetrics,
}

impl Pipeline {
    /// Build a pipeline for `root`. The root must already exist.
    pub fn new<P: AsRef<Path>>(
        config: Config,
        root: P,
        resolver: Arc<dyn MetadataResolver>,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, PipelineError> {
        let root = root.as_ref();
        check_root(root)?;

        let layout = Layout::new(root);
        let classifier = Classifier::new(&config)?;
        let router = Router::new(&config, layout.clone());
        let plan = ConcurrencyPlan::derive(&config);
        let metrics = new_shared_metrics();
        let config = Arc::new(config);

        info!(
            "pipeline.init root={} workers={} dry_run={}",
            root.display(),
            plan.max_concurrent_jobs,
            config.run.dry_run
        );

        let executor = JobExecutor::new(
            plan,
            metrics.clone(),
            prober,
            transcoder,
            Arc::clone(&config),
            layout.clone(),
        );

        Ok(Self {
            config,
            layout,
            classifier,
            router,
            resolver,
            executor,
            metrics,
        })
    }

    /// Run all phases once.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary, PipelineError> {
        let dry_run = self.config.run.dry_run;
        let mut summary = RunSummary {
            dry_run,
            ..Default::default()
        };

        if !dry_run {
            self.layout.ensure().map_err(PipelineError::Layout)?;
        }

        // Phase 1
        let mut stage = StageManager::new(self.layout.clone(), dry_run);
        let records = self.stage_queue(&mut stage, &mut summary, &shutdown).await;
        summary.cancelled = *shutdown.borrow();

        // Phase 2
        let mut staged_files = scan_area(&self.layout.staged);
        if dry_run {
            staged_files.extend(records.iter().filter_map(|r| self.planned_staged_file(r)));
        }

        let mut planner =
            JobPlanner::new(&self.layout, &self.config).with_delivered(stage.delivered());
        let jobs: Vec<_> = staged_files.iter().map(|f| planner.plan(f)).collect();
        info!("pipeline.phase2 jobs={}", jobs.len());

        let report = if dry_run {
            self.executor.plan_only(jobs)
        } else if summary.cancelled {
            BatchReport::default()
        } else {
            self.executor.run_batch(jobs, shutdown.clone()).await
        };
        summary.count_batch(&report);
        summary.cancelled |= *shutdown.borrow();

        // Cleanup
        if summary.cancelled {
            warn!("pipeline.cancelled cleanup=skipped");
        } else {
            let mut handled: HashSet<PathBuf> = HashSet::new();
            if dry_run {
                handled.extend(records.iter().map(|r| r.source.clone()));
                handled.extend(report.jobs.iter().map(|j| j.staged_path.clone()));
            }

            let cleanup = Cleaner::new(&self.layout, dry_run).run(&handled);
            summary.errored += cleanup.swept.len();
            summary.moves.extend(cleanup.swept.iter().cloned());
            summary.cleanup = Some(cleanup);
        }

        summary.metrics = self.metrics.read().await.clone();
        info!(
            "pipeline.done ready={} transcoded={} manual_review={} errored={} skipped_tagged={} dry_run={}",
            summary.ready,
            summary.transcoded,
            summary.manual_review,
            summary.errored,
            summary.skipped_tagged,
            dry_run
        );
        Ok(summary)
    }

    /// Phase 1: each file's classify -> resolve -> route -> stage runs to
    /// completion before the next file starts.
    async fn stage_queue(
        &self,
        stage: &mut StageManager,
        summary: &mut RunSummary,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<StageRecord> {
        let files = scan_area(&self.layout.queue);
        info!("pipeline.phase1 files={}", files.len());

        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            if *shutdown.borrow() {
                break;
            }

            let classification = self.classifier.classify(&file.relative);
            let matched = match &classification {
                Classification::Candidate(candidate) => {
                    resolve_candidate(self.resolver.as_ref(), candidate).await
                }
                _ => None,
            };

            let decision = self.router.route(file, &classification, matched.as_ref());
            info!(
                "route.decision file={} decision={} reason={}",
                file.relative.display(),
                decision.destination,
                decision.reason
            );

            let record = stage.stage(&decision);
            let tagged = matches!(classification, Classification::AlreadyTagged);
            summary.count_stage(tagged, &record);
            records.push(record);
        }
        records
    }

    /// Where a dry-run "move" into Staged would have put the file.
    fn planned_staged_file(&self, record: &StageRecord) -> Option<ScannedFile> {
        if record.decision != Destination::NeedsTranscode
            || record.outcome != StageOutcome::WouldMove
        {
            return None;
        }
        crate::layout::ContentType::ALL.into_iter().find_map(|content| {
            record
                .destination
                .strip_prefix(self.layout.staged_dir(content))
                .ok()
                .map(|relative| ScannedFile {
                    path: record.destination.clone(),
                    content,
                    relative: relative.to_path_buf(),
                })
        })
    }
}
