//! CLI entry point for plexifier
//!
//! Parses arguments, loads configuration, runs the startup checks and one
//! pipeline run over the given library root.

use clap::Parser;
use log::{error, info, warn};
use plexifier::config::{normalize_series_name, Config};
use plexifier::{
    run_startup_checks, CatalogResolver, FfmpegTranscoder, FfprobeProber, Pipeline, RunSummary,
    TmdbProvider,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

const DEFAULT_CONFIG: &str = "plexifier.toml";

/// Sort a queue of video files into a media-server library
#[derive(Parser, Debug)]
#[command(name = "plexifier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Library root containing Queue/, Staged/, Completed/ and Errors/
    root: PathBuf,

    /// Configuration file; built-in defaults apply when it does not exist
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report what would happen without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Move transcode sources to Kept Sources/ instead of deleting them
    #[arg(long)]
    keep_source: bool,

    /// Never replace an existing transcode output; add a suffix instead
    #[arg(long)]
    no_overwrite: bool,

    /// Concurrent transcode jobs (0 = auto)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Series that use episode titles instead of numbering (repeatable)
    #[arg(long = "episode-titles", value_name = "SERIES")]
    episode_titles: Vec<String>,

    /// Use episode titles for every series except the listed ones
    #[arg(long)]
    episode_titles_all_except: bool,

    /// Always convert audio to AAC
    #[arg(long)]
    force_audio_aac: bool,

    /// Drop subtitle streams when transcoding
    #[arg(long)]
    no_subs: bool,

    /// ffmpeg video encoder (e.g. libx265, hevc_nvenc)
    #[arg(long)]
    encoder: Option<String>,

    /// Skip the ffmpeg/ffprobe availability checks
    #[arg(long)]
    skip_checks: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Command-line flags win over file and environment values.
fn apply_args(args: &Args, config: &mut Config) {
    if args.dry_run {
        config.run.dry_run = true;
    }
    if args.keep_source {
        config.run.keep_source = true;
    }
    if args.no_overwrite {
        config.run.overwrite = false;
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
    if !args.episode_titles.is_empty() {
        config
            .episode_titles
            .series
            .extend(args.episode_titles.iter().map(|s| normalize_series_name(s)));
    }
    if args.episode_titles_all_except {
        config.episode_titles.all_except_listed = true;
    }
    if args.force_audio_aac {
        config.transcode.force_audio_aac = true;
    }
    if args.no_subs {
        config.transcode.keep_subtitles = false;
    }
    if let Some(encoder) = &args.encoder {
        config.transcode.video_encoder = encoder.clone();
    }
}

fn load_config(args: &Args) -> Result<Config, plexifier::config::ConfigError> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::load_or_default(path)?;
    apply_args(args, &mut config);
    Ok(config)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received terminate signal, stopping"),
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.dry_run {
        println!("Dry run: no files were changed. Intended moves:");
        for m in &summary.moves {
            println!("  {} -> {}", m.source.display(), m.destination.display());
        }
        println!();
    }
    println!("Ready:          {}", summary.ready);
    println!("Transcoded:     {}", summary.transcoded);
    println!("Manual review:  {}", summary.manual_review);
    println!("Errored:        {}", summary.errored);
    println!("Already tagged: {}", summary.skipped_tagged);
    if summary.kept_sources > 0 {
        println!("Kept sources:   {}", summary.kept_sources);
    }
    if summary.pending_transcodes > 0 {
        println!("Left in Staged: {}", summary.pending_transcodes);
    }
    if summary.cancelled {
        println!("Run was interrupted; cleanup skipped.");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let check_tools = !config.run.dry_run && !args.skip_checks;
    if args.skip_checks {
        warn!("Skipping ffmpeg/ffprobe checks (--skip-checks enabled)");
    }
    if let Err(e) = run_startup_checks(&config, &args.root, check_tools) {
        error!("Startup check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let provider = match TmdbProvider::new(&config.resolver) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to initialize metadata provider: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let resolver = CatalogResolver::new(provider, config.matching.ambiguity_margin);
    let prober = FfprobeProber::new(config.transcode.ffprobe_bin.clone());
    let transcoder = FfmpegTranscoder::new(config.transcode.ffmpeg_bin.clone());

    let pipeline = match Pipeline::new(
        config,
        &args.root,
        Arc::new(resolver),
        Arc::new(prober),
        Arc::new(transcoder),
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to initialize pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let summary = match pipeline.run(shutdown_rx).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_summary(&summary);
    }

    if summary.transcode_batch_failed {
        error!("Every transcode job failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "plexifier",
            "/media",
            "--dry-run",
            "--keep-source",
            "--no-overwrite",
            "--workers",
            "2",
            "--episode-titles",
            "  Some   Show ",
            "--episode-titles",
            "Other",
            "--force-audio-aac",
            "--no-subs",
            "--encoder",
            "libx264",
        ])
        .unwrap();

        let mut config = Config::default();
        apply_args(&args, &mut config);

        assert_eq!(args.root, PathBuf::from("/media"));
        assert!(config.run.dry_run);
        assert!(config.run.keep_source);
        assert!(!config.run.overwrite);
        assert_eq!(config.run.workers, 2);
        assert_eq!(config.episode_titles.series.len(), 2);
        assert!(config.episode_titles.uses_episode_title("some show"));
        assert!(!config.episode_titles.all_except_listed);
        assert!(config.transcode.force_audio_aac);
        assert!(!config.transcode.keep_subtitles);
        assert_eq!(config.transcode.video_encoder, "libx264");
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::try_parse_from(["plexifier", "/media"]).unwrap();
        let mut config = Config::default();
        config.run.workers = 6;
        apply_args(&args, &mut config);
        assert_eq!(config, {
            let mut expected = Config::default();
            expected.run.workers = 6;
            expected
        });
    }

    #[test]
    fn test_root_is_required() {
        assert!(Args::try_parse_from(["plexifier"]).is_err());
    }
}
