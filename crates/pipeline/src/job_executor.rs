//! Transcode orchestrator.
//!
//! Each staged file that needs conversion becomes a [`TranscodeJob`]. A fixed
//! pool of workers pulls jobs from a shared queue; a semaphore sized from the
//! [`ConcurrencyPlan`] is the hard ceiling on jobs in `Running`.
//!
//! Per job: probe, derive parameters, transcode to a temporary sibling of the
//! target, then rename into place once the transcoder exits cleanly with a
//! non-empty output. The staged source is then deleted, or moved to Kept
//! Sources on keep-source runs. On failure the temporary output is removed
//! and the staged source goes to Errors. On cancellation the transcoder is
//! killed, the temporary output removed and the staged source left where it
//! is.

use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::encode::{derive_params, EncodeError, EncodeParams, Transcoder};
use crate::layout::{ContentType, Layout};
use crate::metrics::{JobMetrics, SharedMetrics};
use crate::probe::{ProbeError, Prober};
use crate::scan::ScannedFile;
use crate::stage::{move_file, suffixed_path};
use log::{info, warn};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum JobError {
    /// Staged source disappeared before the job ran
    #[error("Source file missing: {0}")]
    SourceMissing(PathBuf),

    /// Probing the source failed
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Transcoder failed
    #[error("Transcode failed: {0}")]
    Encode(#[from] EncodeError),

    /// Could not create the output directory or move the output into place
    #[error("Failed to finalize output {path}: {source}")]
    Finalize {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Run was interrupted while the job was in flight
    #[error("Cancelled")]
    Cancelled,
}

/// Job state: `Queued -> Running -> {Completed | Errored}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue (or put back after cancellation)
    Queued,
    /// Transcoder running
    Running,
    /// Output delivered
    Completed,
    /// Failed; the staged source was moved to Errors
    Errored(String),
}

impl JobState {
    /// Convert state to string for metrics
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Errored(_) => "errored",
        }
    }
}

/// One staged file to convert.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeJob {
    pub id: String,
    pub content: ContentType,
    pub staged_path: PathBuf,
    /// Path below the content folder, as staged.
    pub relative: PathBuf,
    /// Final output path in Completed.
    pub target_path: PathBuf,
    /// Output is written here first and renamed to `target_path`.
    pub temp_path: PathBuf,
    pub state: JobState,
    pub params: Option<EncodeParams>,
    /// Where the staged source ended up after a failure.
    pub errored_to: Option<PathBuf>,
    /// Keep-source runs only: where the source goes once the output is in place.
    pub kept_path: Option<PathBuf>,
}

impl TranscodeJob {
    fn to_metrics(&self, size_in_bytes_before: u64) -> JobMetrics {
        JobMetrics {
            id: self.id.clone(),
            source_path: self.staged_path.to_string_lossy().to_string(),
            stage: self.state.as_str().to_string(),
            encoder: self
                .params
                .as_ref()
                .map(|p| p.video_encoder.clone())
                .unwrap_or_default(),
            target_kbps: self.params.as_ref().map(|p| p.target_kbps).unwrap_or(0),
            started_unix_ms: chrono::Utc::now().timestamp_millis(),
            size_in_bytes_before,
        }
    }
}

/// `{stem}.tmp.{ext}` next to `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}.tmp.{}", stem, ext.to_string_lossy()),
        None => format!("{}.tmp", stem),
    };
    target.with_file_name(name)
}

/// Builds jobs for staged files, resolving target collisions.
///
/// A target is never shared by two jobs of one batch, nor by a job and a
/// file delivered earlier in the same run. A file that was already in
/// Completed before the run is replaced when `overwrite` is set, otherwise
/// the new output gets a ` (n)` suffix.
pub struct JobPlanner<'a> {
    layout: &'a Layout,
    output_extension: String,
    overwrite: bool,
    keep_source: bool,
    reserved: HashSet<PathBuf>,
}

impl<'a> JobPlanner<'a> {
    pub fn new(layout: &'a Layout, config: &Config) -> Self {
        Self {
            layout,
            output_extension: config.transcode.output_extension.clone(),
            overwrite: config.run.overwrite,
            keep_source: config.run.keep_source,
            reserved: HashSet::new(),
        }
    }

    /// Treat `delivered` (this run's phase-1 destinations) as taken.
    pub fn with_delivered(mut self, delivered: HashSet<PathBuf>) -> Self {
        self.reserved.extend(delivered);
        self
    }

    pub fn plan(&mut self, file: &ScannedFile) -> TranscodeJob {
        let natural = self
            .layout
            .completed_dir(file.content)
            .join(&file.relative)
            .with_extension(&self.output_extension);
        let target = self.claim(&natural, !self.overwrite);

        let kept_path = self.keep_source.then(|| {
            let natural = self.layout.kept_dir(file.content).join(&file.relative);
            self.claim(&natural, true)
        });

        TranscodeJob {
            id: uuid::Uuid::new_v4().to_string(),
            content: file.content,
            staged_path: file.path.clone(),
            relative: file.relative.clone(),
            temp_path: temp_path_for(&target),
            target_path: target,
            state: JobState::Queued,
            params: None,
            errored_to: None,
            kept_path,
        }
    }

    fn claim(&mut self, natural: &Path, avoid_existing: bool) -> PathBuf {
        let mut candidate = natural.to_path_buf();
        let mut n = 1;
        while self.reserved.contains(&candidate) || (avoid_existing && candidate.exists()) {
            candidate = suffixed_path(natural, n);
            n += 1;
        }
        self.reserved.insert(candidate.clone());
        candidate
    }
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub jobs: Vec<TranscodeJob>,
    pub completed: usize,
    pub errored: usize,
    /// Jobs left queued because the run was cancelled.
    pub pending: usize,
}

impl BatchReport {
    fn from_jobs(jobs: Vec<TranscodeJob>) -> Self {
        let mut report = BatchReport::default();
        for job in &jobs {
            match job.state {
                JobState::Completed => report.completed += 1,
                JobState::Errored(_) => report.errored += 1,
                JobState::Queued | JobState::Running => report.pending += 1,
            }
        }
        report.jobs = jobs;
        report
    }

    /// True when there was work and every job failed.
    pub fn all_failed(&self) -> bool {
        self.errored > 0 && self.completed == 0 && self.pending == 0
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Job executor with a bounded worker pool
#[derive(Clone)]
pub struct JobExecutor {
    /// Semaphore for limiting concurrent jobs
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    metrics: SharedMetrics,
    prober: Arc<dyn Prober>,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    layout: Layout,
}

impl JobExecutor {
    pub fn new(
        plan: ConcurrencyPlan,
        metrics: SharedMetrics,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
        config: Arc<Config>,
        layout: Layout,
    ) -> Self {
        let permits = plan.max_concurrent_jobs.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            concurrency_plan: plan,
            metrics,
            prober,
            transcoder,
            config,
            layout,
        }
    }

    /// Report what a real run would do, without probing or transcoding.
    pub fn plan_only(&self, jobs: Vec<TranscodeJob>) -> BatchReport {
        for job in &jobs {
            info!(
                "transcode.dry_run from={} to={}",
                job.staged_path.display(),
                job.target_path.display()
            );
            if let Some(kept) = &job.kept_path {
                info!(
                    "transcode.dry_run keep={} to={}",
                    job.staged_path.display(),
                    kept.display()
                );
            }
        }
        BatchReport::from_jobs(jobs)
    }

    /// Run all jobs on the worker pool and wait for them.
    ///
    /// Jobs not yet started when `shutdown` fires stay `Queued`.
    pub async fn run_batch(
        &self,
        jobs: Vec<TranscodeJob>,
        shutdown: watch::Receiver<bool>,
    ) -> BatchReport {
        let total = jobs.len();
        if total == 0 {
            return BatchReport::default();
        }

        self.metrics.write().await.queue_len = total;
        let queue = Arc::new(Mutex::new(jobs.into_iter().collect::<VecDeque<_>>()));
        let workers = self.concurrency_plan.max_concurrent_jobs.clamp(1, total);
        info!("transcode.start jobs={} workers={}", total, workers);

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let executor = self.clone();
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            set.spawn(async move { executor.worker(queue, shutdown).await });
        }

        let mut finished = Vec::with_capacity(total);
        while let Some(result) = set.join_next().await {
            match result {
                Ok(jobs) => finished.extend(jobs),
                Err(e) => warn!("transcode.worker_panicked error={}", e),
            }
        }
        finished.extend(queue.lock().await.drain(..));

        let report = BatchReport::from_jobs(finished);
        info!(
            "transcode.done completed={} errored={} pending={}",
            report.completed, report.errored, report.pending
        );
        report
    }

    async fn worker(
        &self,
        queue: Arc<Mutex<VecDeque<TranscodeJob>>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Vec<TranscodeJob> {
        let mut done = Vec::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(job) = queue.lock().await.pop_front() else {
                break;
            };
            done.push(self.execute(job, &mut shutdown).await);
        }
        done
    }

    /// Run one job to a terminal state (or back to `Queued` on cancellation).
    pub async fn execute(
        &self,
        mut job: TranscodeJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TranscodeJob {
        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit,
            _ = wait_for_shutdown(shutdown) => return job,
        };
        let Ok(_permit) = permit else {
            return job;
        };

        job.state = JobState::Running;
        let size_before = std::fs::metadata(&job.staged_path)
            .map(|m| m.len())
            .unwrap_or(0);
        self.metrics
            .write()
            .await
            .job_started(job.to_metrics(size_before));

        let bytes_written = match self.transcode_job(&mut job, shutdown).await {
            Ok(bytes) => {
                job.state = JobState::Completed;
                info!(
                    "transcode.completed source={} target={}",
                    job.staged_path.display(),
                    job.target_path.display()
                );
                self.finish_source(&mut job);
                bytes
            }
            Err(JobError::Cancelled) => {
                let _ = std::fs::remove_file(&job.temp_path);
                job.state = JobState::Queued;
                info!("transcode.cancelled source={}", job.staged_path.display());
                0
            }
            Err(e) => {
                let _ = std::fs::remove_file(&job.temp_path);
                warn!(
                    "transcode.failed source={} error={}",
                    job.staged_path.display(),
                    e
                );
                job.errored_to = self.divert_to_errors(&job);
                job.state = JobState::Errored(e.to_string());
                0
            }
        };

        let mut metrics = self.metrics.write().await;
        match job.state {
            JobState::Queued => metrics.job_requeued(&job.id),
            JobState::Completed => metrics.job_finished(&job.id, true, bytes_written),
            _ => metrics.job_finished(&job.id, false, 0),
        }
        drop(metrics);

        job
    }

    /// Probe, transcode to the temp path, verify, rename into place.
    async fn transcode_job(
        &self,
        job: &mut TranscodeJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<u64, JobError> {
        if !job.staged_path.is_file() {
            return Err(JobError::SourceMissing(job.staged_path.clone()));
        }

        let probe = self.prober.probe(&job.staged_path).await?;
        let ext = crate::scan::file_extension(&job.staged_path);
        let params = derive_params(&probe, &ext, &self.config);
        job.params = Some(params.clone());

        if let Some(parent) = job.target_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| JobError::Finalize {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        info!(
            "transcode.running source={} encoder={} target_kbps={} pix_fmt={}",
            job.staged_path.display(),
            params.video_encoder,
            params.target_kbps,
            params.pixel_format
        );

        // Dropping the transcode future kills the process.
        tokio::select! {
            result = self.transcoder.transcode(&job.staged_path, &job.temp_path, &params) => result?,
            _ = wait_for_shutdown(shutdown) => return Err(JobError::Cancelled),
        }

        let written = std::fs::metadata(&job.temp_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if written == 0 {
            return Err(EncodeError::EmptyOutput.into());
        }

        std::fs::rename(&job.temp_path, &job.target_path).map_err(|source| {
            JobError::Finalize {
                path: job.target_path.clone(),
                source,
            }
        })?;

        Ok(written)
    }

    /// Delete the staged source, or move it to its kept path.
    fn finish_source(&self, job: &mut TranscodeJob) {
        if let Some(kept) = &job.kept_path {
            match move_file(&job.staged_path, kept) {
                Ok(()) => info!(
                    "transcode.source_kept path={} to={}",
                    job.staged_path.display(),
                    kept.display()
                ),
                Err(e) => {
                    // Left in Staged; cleanup sweeps it to Errors.
                    warn!(
                        "transcode.keep_source_failed path={} error={}",
                        job.staged_path.display(),
                        e
                    );
                    job.kept_path = None;
                }
            }
            return;
        }
        if let Err(e) = std::fs::remove_file(&job.staged_path) {
            warn!(
                "transcode.remove_source_failed path={} error={}",
                job.staged_path.display(),
                e
            );
        }
    }

    /// Move the staged source to Errors, keeping its relative path.
    fn divert_to_errors(&self, job: &TranscodeJob) -> Option<PathBuf> {
        if !job.staged_path.exists() {
            return None;
        }
        let natural = self.layout.errors_dir(job.content).join(&job.relative);
        let mut target = natural.clone();
        let mut n = 1;
        while target.exists() {
            target = suffixed_path(&natural, n);
            n += 1;
        }
        match move_file(&job.staged_path, &target) {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(
                    "transcode.errors_move_failed path={} error={}",
                    job.staged_path.display(),
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::ffmpeg::mocks::FakeTranscoder;
    use crate::metrics::new_shared_metrics;
    use crate::probe::mocks::FakeProber;
    use crate::scan::scan_area;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_file(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"source").unwrap();
    }

    fn executor(
        layout: &Layout,
        config: Config,
        workers: usize,
        transcoder: Arc<FakeTranscoder>,
    ) -> JobExecutor {
        JobExecutor::new(
            ConcurrencyPlan {
                total_cores: 8,
                max_concurrent_jobs: workers,
            },
            new_shared_metrics(),
            Arc::new(FakeProber::hd()),
            transcoder,
            Arc::new(config),
            layout.clone(),
        )
    }

    fn staged_jobs(layout: &Layout, config: &Config) -> Vec<TranscodeJob> {
        let mut planner = JobPlanner::new(layout, config);
        scan_area(&layout.staged)
            .iter()
            .map(|f| planner.plan(f))
            .collect()
    }

    /// Receiver whose sender is gone: never signals shutdown.
    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn test_job_state_as_str() {
        assert_eq!(JobState::Queued.as_str(), "queued");
        assert_eq!(JobState::Running.as_str(), "running");
        assert_eq!(JobState::Completed.as_str(), "completed");
        assert_eq!(JobState::Errored("x".to_string()).as_str(), "errored");
    }

    #[test]
    fn test_temp_path_for() {
        assert_eq!(
            temp_path_for(Path::new("/c/Movie (2020)/Movie (2020).mp4")),
            Path::new("/c/Movie (2020)/Movie (2020).tmp.mp4")
        );
    }

    #[test]
    fn test_planner_target_and_collisions() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let a = layout.staged_dir(ContentType::Movies).join("Film/Film.avi");
        let b = layout.staged_dir(ContentType::Movies).join("Film/Film.mov");
        write_file(&a);
        write_file(&b);

        let mut config = Config::default();
        config.run.overwrite = false;
        let existing = layout.completed_dir(ContentType::Movies).join("Film/Film.mp4");
        write_file(&existing);

        let jobs = staged_jobs(&layout, &config);
        let targets: Vec<_> = jobs.iter().map(|j| j.target_path.clone()).collect();
        let dir = layout.completed_dir(ContentType::Movies).join("Film");
        assert_eq!(targets, vec![dir.join("Film (1).mp4"), dir.join("Film (2).mp4")]);

        config.run.overwrite = true;
        let jobs = staged_jobs(&layout, &config);
        assert_eq!(jobs[0].target_path, dir.join("Film.mp4"));
        assert_eq!(jobs[1].target_path, dir.join("Film (1).mp4"));
    }

    #[test]
    fn test_planner_never_reuses_a_delivered_target() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = ScannedFile {
            path: layout.staged_dir(ContentType::Movies).join("X (2020)/X (2020).avi"),
            content: ContentType::Movies,
            relative: PathBuf::from("X (2020)/X (2020).avi"),
        };
        let dir = layout.completed_dir(ContentType::Movies).join("X (2020)");
        let delivered = HashSet::from([dir.join("X (2020).mp4")]);

        for overwrite in [true, false] {
            let mut config = Config::default();
            config.run.overwrite = overwrite;
            let mut planner = JobPlanner::new(&layout, &config).with_delivered(delivered.clone());
            let job = planner.plan(&staged);
            assert_eq!(job.target_path, dir.join("X (2020) (1).mp4"));
            assert!(job.kept_path.is_none());
        }
    }

    #[test]
    fn test_planner_kept_path_avoids_existing_files() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        write_file(&layout.staged_dir(ContentType::Movies).join("K/K.avi"));
        let earlier = layout.kept_dir(ContentType::Movies).join("K/K.avi");
        write_file(&earlier);

        let mut config = Config::default();
        config.run.keep_source = true;
        let jobs = staged_jobs(&layout, &config);
        assert_eq!(
            jobs[0].kept_path.as_deref(),
            Some(layout.kept_dir(ContentType::Movies).join("K/K (1).avi").as_path())
        );
    }

    #[tokio::test]
    async fn test_successful_job_delivers_movie() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout
            .staged_dir(ContentType::Movies)
            .join("Movie Title (2020)/Movie Title (2020).avi");
        write_file(&staged);

        let config = Config::default();
        let transcoder = Arc::new(FakeTranscoder::default());
        let exec = executor(&layout, config.clone(), 2, transcoder.clone());
        let report = exec
            .run_batch(staged_jobs(&layout, &config), no_shutdown())
            .await;

        let expected = tmp
            .path()
            .join("Completed/Movies/Movie Title (2020)/Movie Title (2020).mp4");
        assert_eq!(report.completed, 1);
        assert!(!report.all_failed());
        assert!(expected.exists());
        assert!(!temp_path_for(&expected).exists());
        assert!(!staged.exists());
        let params = report.jobs[0].params.as_ref().unwrap();
        assert!(params.force_audio_aac);
        assert_eq!(transcoder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_moves_source_to_errors() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout
            .staged_dir(ContentType::Movies)
            .join("Broken (2001)/Broken (2001).avi");
        write_file(&staged);

        let config = Config::default();
        let exec = executor(
            &layout,
            config.clone(),
            2,
            Arc::new(FakeTranscoder::failing_on("Broken")),
        );
        let jobs = staged_jobs(&layout, &config);
        let temp = jobs[0].temp_path.clone();
        let report = exec.run_batch(jobs, no_shutdown()).await;

        let errored = layout
            .errors_dir(ContentType::Movies)
            .join("Broken (2001)/Broken (2001).avi");
        assert_eq!(report.errored, 1);
        assert!(report.all_failed());
        assert!(errored.exists());
        assert!(!staged.exists());
        assert!(!temp.exists());
        assert!(!report.jobs[0].target_path.exists());
        assert_eq!(report.jobs[0].errored_to.as_deref(), Some(errored.as_path()));
    }

    #[tokio::test]
    async fn test_empty_output_is_failure() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        write_file(&layout.staged_dir(ContentType::Movies).join("A/A.avi"));

        let config = Config::default();
        let transcoder = FakeTranscoder {
            write_nothing: true,
            ..Default::default()
        };
        let exec = executor(&layout, config.clone(), 1, Arc::new(transcoder));
        let report = exec
            .run_batch(staged_jobs(&layout, &config), no_shutdown())
            .await;

        assert_eq!(report.errored, 1);
        assert!(layout.errors_dir(ContentType::Movies).join("A/A.avi").exists());
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_batch_failure() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        write_file(&layout.staged_dir(ContentType::Movies).join("Good/Good.avi"));
        write_file(&layout.staged_dir(ContentType::Movies).join("Bad/Bad.avi"));

        let config = Config::default();
        let transcoder = Arc::new(FakeTranscoder::failing_on("Bad"));
        let exec = executor(&layout, config.clone(), 2, transcoder);
        let report = exec
            .run_batch(staged_jobs(&layout, &config), no_shutdown())
            .await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.errored, 1);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_keep_source_moves_source_to_kept_area() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout.staged_dir(ContentType::Movies).join("Keep/Keep.avi");
        write_file(&staged);

        let mut config = Config::default();
        config.run.keep_source = true;
        let exec = executor(&layout, config.clone(), 1, Arc::new(FakeTranscoder::default()));
        let report = exec
            .run_batch(staged_jobs(&layout, &config), no_shutdown())
            .await;

        let kept = layout.kept_dir(ContentType::Movies).join("Keep/Keep.avi");
        assert_eq!(report.completed, 1);
        assert_eq!(report.errored, 0);
        assert!(!staged.exists());
        assert!(kept.exists());
        assert_eq!(report.jobs[0].kept_path.as_deref(), Some(kept.as_path()));
        assert!(!layout.errors.exists());
    }

    #[tokio::test]
    async fn test_failed_job_with_keep_source_still_goes_to_errors() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        write_file(&layout.staged_dir(ContentType::Movies).join("Bad/Bad.avi"));

        let mut config = Config::default();
        config.run.keep_source = true;
        let transcoder = Arc::new(FakeTranscoder::failing_on("Bad"));
        let exec = executor(&layout, config.clone(), 1, transcoder);
        let report = exec
            .run_batch(staged_jobs(&layout, &config), no_shutdown())
            .await;

        assert_eq!(report.errored, 1);
        assert!(layout.errors_dir(ContentType::Movies).join("Bad/Bad.avi").exists());
        assert!(!layout.kept.exists());
    }

    #[tokio::test]
    async fn test_missing_source_errors() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout.staged_dir(ContentType::Movies).join("Gone/Gone.avi");
        write_file(&staged);

        let config = Config::default();
        let jobs = staged_jobs(&layout, &config);
        std::fs::remove_file(&staged).unwrap();

        let exec = executor(&layout, config, 1, Arc::new(FakeTranscoder::default()));
        let report = exec.run_batch(jobs, no_shutdown()).await;
        assert!(matches!(report.jobs[0].state, JobState::Errored(_)));
        assert!(report.jobs[0].errored_to.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_source_and_removes_temp() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout.staged_dir(ContentType::Movies).join("Long/Long.avi");
        write_file(&staged);

        let config = Config::default();
        let exec = executor(
            &layout,
            config.clone(),
            1,
            Arc::new(FakeTranscoder::with_delay(Duration::from_secs(30))),
        );
        let jobs = staged_jobs(&layout, &config);
        let temp = jobs[0].temp_path.clone();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { exec.run_batch(jobs, rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.pending, 1);
        assert!(!report.all_failed());
        assert!(staged.exists());
        assert!(!temp.exists());
        assert!(!report.jobs[0].target_path.exists());
    }

    #[tokio::test]
    async fn test_plan_only_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let staged = layout.staged_dir(ContentType::Movies).join("P/P.avi");
        write_file(&staged);

        let config = Config::default();
        let transcoder = Arc::new(FakeTranscoder::default());
        let exec = executor(&layout, config.clone(), 1, transcoder.clone());
        let report = exec.plan_only(staged_jobs(&layout, &config));

        assert_eq!(report.pending, 1);
        assert_eq!(transcoder.call_count(), 0);
        assert!(staged.exists());
        assert!(!layout.completed.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_running_jobs_never_exceed_bound(jobs in 1usize..12, workers in 1usize..5) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let tmp = TempDir::new().unwrap();
                let layout = Layout::new(tmp.path());
                for i in 0..jobs {
                    write_file(&layout.staged_dir(ContentType::Movies).join(format!("M{i}/M{i}.avi")));
                }
                let config = Config::default();
                let transcoder = Arc::new(FakeTranscoder::with_delay(Duration::from_millis(5)));
                let exec = executor(&layout, config.clone(), workers, transcoder.clone());
                let metrics = exec.metrics.clone();
                let report = exec.run_batch(staged_jobs(&layout, &config), no_shutdown()).await;

                assert_eq!(report.completed, jobs);
                assert!(transcoder.peak() <= workers);
                assert!(metrics.read().await.peak_running_jobs <= workers);
            });
        }
    }
}
