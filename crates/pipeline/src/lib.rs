//! Plexifier
//!
//! Turns a queue of loosely named video files into a library laid out the way
//! media servers expect: classify, look up metadata, route, stage, transcode
//! what needs it and clean up.

pub mod classify;
pub mod cleanup;
pub mod concurrency;
pub mod encode;
pub mod job_executor;
pub mod layout;
pub mod metrics;
pub mod naming;
pub mod pipeline;
pub mod probe;
pub mod resolver;
pub mod routing;
pub mod scan;
pub mod stage;
pub mod startup;

pub use classify::{Classification, Classifier, MediaCandidate, MediaKind};
pub use cleanup::{Cleaner, CleanupReport};
pub use concurrency::ConcurrencyPlan;
pub use encode::{
    build_ffmpeg_command, derive_params, EncodeError, EncodeParams, FfmpegTranscoder, Transcoder,
};
pub use job_executor::{BatchReport, JobError, JobExecutor, JobState, TranscodeJob};
pub use layout::{ContentType, Layout};
pub use metrics::{new_shared_metrics, JobMetrics, MetricsSnapshot, SharedMetrics};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use plexifier_config as config;
pub use plexifier_config::Config;
pub use probe::{FfprobeProber, ProbeError, Prober, VideoProbe};
pub use resolver::{
    CatalogResolver, MetadataMatch, MetadataProvider, MetadataResolver, ResolverError, TmdbProvider,
};
pub use routing::{Destination, Router, RoutingDecision};
pub use stage::{FileMove, StageManager, StageOutcome, StageRecord};
pub use startup::{run_startup_checks, StartupError};
