//! Preflight checks run before any file is touched.
//!
//! A failure here is fatal for the whole run: without resolver credentials or
//! a working ffmpeg no file could ever succeed.

use crate::config::Config;
use log::info;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("No metadata API key configured (set TMDB_API_KEY or resolver.api_key)")]
    MissingCredentials,

    #[error("Root directory does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("{tool} not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolver credentials are present and non-blank.
pub fn check_credentials(cfg: &Config) -> Result<(), StartupError> {
    match cfg.resolver.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(()),
        _ => Err(StartupError::MissingCredentials),
    }
}

/// The library root exists and is a directory.
pub fn check_root(root: &Path) -> Result<(), StartupError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(StartupError::RootMissing(root.to_path_buf()))
    }
}

/// Parse the version token from `ffmpeg -version` / `ffprobe -version` output.
///
/// Handles `ffmpeg version 6.1.1 ...` and `ffmpeg version n6.1-...` forms.
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    let line = version_output.lines().next()?.to_lowercase();
    let (_, rest) = line.split_once(" version ")?;
    let token = rest.split_whitespace().next()?;
    let token = token.trim_start_matches('n');
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Check that `bin -version` runs successfully; returns the reported version.
pub fn check_tool_available(tool: &str, bin: &str) -> Result<Option<String>, StartupError> {
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!("{} -version failed; is it installed and in PATH? Error: {}", bin, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!("{} -version exited with {}", bin, output.status),
        });
    }

    Ok(parse_tool_version(&String::from_utf8_lossy(&output.stdout)))
}

/// Run all startup checks in order
///
/// 1. Root directory
/// 2. Resolver credentials
/// 3. ffmpeg and ffprobe, unless `check_tools` is false (dry runs, `--skip-checks`)
pub fn run_startup_checks(
    cfg: &Config,
    root: &Path,
    check_tools: bool,
) -> Result<(), StartupError> {
    check_root(root)?;
    check_credentials(cfg)?;

    if check_tools {
        for (tool, bin) in [
            ("ffmpeg", cfg.transcode.ffmpeg_bin.as_str()),
            ("ffprobe", cfg.transcode.ffprobe_bin.as_str()),
        ] {
            let version = check_tool_available(tool, bin)?;
            info!(
                "startup.tool name={} version={}",
                tool,
                version.as_deref().unwrap_or("unknown")
            );
        }
    }

    Ok(())
}
