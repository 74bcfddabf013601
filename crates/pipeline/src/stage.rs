//! Stage manager: carries out routing decisions.
//!
//! Moves are a rename when source and destination share a volume. Otherwise
//! the file is copied to a `.partial` sibling, the size is verified, the copy
//! is renamed into place and only then is the source removed. Existing
//! destinations are never overwritten; the new file gets a ` (n)` suffix.
//! In dry-run mode nothing is touched but collision suffixes are still
//! computed, so a dry run reports exactly the paths a real run would use.

use crate::layout::Layout;
use crate::routing::{Destination, RoutingDecision};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while moving a file.
#[derive(Debug, Error)]
pub enum StageError {
    /// Failed to create the destination directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// Rename and copy both failed.
    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The copied file does not match the source size.
    #[error("Copy verification failed: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Could not put the verified copy in place.
    #[error("Failed to finalize {path}: {source}")]
    Finalize { path: PathBuf, source: io::Error },
}

/// A (source, destination) pair, as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Moved,
    WouldMove,
    Failed {
        reason: String,
        /// Where the file ended up instead, if it could be moved at all.
        errored_to: Option<PathBuf>,
    },
}

/// One file's journey through phase 1. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub source: PathBuf,
    /// Final destination after collision handling.
    pub destination: PathBuf,
    pub decision: Destination,
    pub outcome: StageOutcome,
}

impl StageRecord {
    /// Where the file actually is (or would be) after staging.
    pub fn final_path(&self) -> Option<&Path> {
        match &self.outcome {
            StageOutcome::Moved | StageOutcome::WouldMove => Some(&self.destination),
            StageOutcome::Failed { errored_to, .. } => errored_to.as_deref(),
        }
    }
}

/// `name (n).ext` next to `path`.
pub fn suffixed_path(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn ensure_parent(dest: &Path) -> Result<(), StageError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| StageError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Move `source` to `dest`, creating parent directories.
///
/// Tries an atomic rename first, then falls back to copy-verify-rename and
/// removes the source last.
pub fn move_file(source: &Path, dest: &Path) -> Result<(), StageError> {
    ensure_parent(dest)?;

    match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) => debug!(
            "stage.rename_failed from={} to={} error={}, copying",
            source.display(),
            dest.display(),
            e
        ),
    }

    let partial = partial_path(dest);
    let copy_result = fs::copy(source, &partial).and_then(|copied| {
        let expected = fs::metadata(source)?.len();
        Ok((expected, copied, fs::metadata(&partial)?.len()))
    });

    let (expected, copied, on_disk) = match copy_result {
        Ok(sizes) => sizes,
        Err(source_err) => {
            let _ = fs::remove_file(&partial);
            return Err(StageError::Copy {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
                source: source_err,
            });
        }
    };

    if copied != expected || on_disk != expected {
        let _ = fs::remove_file(&partial);
        return Err(StageError::SizeMismatch {
            expected,
            actual: on_disk,
        });
    }

    fs::rename(&partial, dest).map_err(|source| {
        let _ = fs::remove_file(&partial);
        StageError::Finalize {
            path: dest.to_path_buf(),
            source,
        }
    })?;

    if let Err(e) = fs::remove_file(source) {
        // The file is delivered; the leftover source is swept up by cleanup.
        warn!(
            "stage.remove_source_failed path={} error={}",
            source.display(),
            e
        );
    }

    Ok(())
}

/// Executes routing decisions, one file at a time.
pub struct StageManager {
    dry_run: bool,
    /// Destinations handed out this run, so dry runs see their own "moves".
    reserved: HashSet<PathBuf>,
    layout: Layout,
}

impl StageManager {
    pub fn new(layout: Layout, dry_run: bool) -> Self {
        Self {
            dry_run,
            reserved: HashSet::new(),
            layout,
        }
    }

    /// Completed destinations handed out so far this run.
    pub fn delivered(&self) -> HashSet<PathBuf> {
        self.reserved
            .iter()
            .filter(|p| p.starts_with(&self.layout.completed))
            .cloned()
            .collect()
    }

    /// Reserve a collision-free path for `target`.
    pub fn claim(&mut self, target: &Path) -> PathBuf {
        let mut candidate = target.to_path_buf();
        let mut n = 1;
        while candidate.exists() || self.reserved.contains(&candidate) {
            candidate = suffixed_path(target, n);
            n += 1;
        }
        self.reserved.insert(candidate.clone());
        candidate
    }

    /// Carry out `decision`. Never fails: filesystem errors become a
    /// [`StageOutcome::Failed`] and the file is moved to Errors if possible.
    pub fn stage(&mut self, decision: &RoutingDecision) -> StageRecord {
        let destination = self.claim(&decision.target);

        if self.dry_run {
            info!(
                "stage.dry_run decision={} from={} to={}",
                decision.destination,
                decision.source.display(),
                destination.display()
            );
            return StageRecord {
                source: decision.source.clone(),
                destination,
                decision: decision.destination,
                outcome: StageOutcome::WouldMove,
            };
        }

        match move_file(&decision.source, &destination) {
            Ok(()) => {
                info!(
                    "stage.moved decision={} from={} to={}",
                    decision.destination,
                    decision.source.display(),
                    destination.display()
                );
                StageRecord {
                    source: decision.source.clone(),
                    destination,
                    decision: decision.destination,
                    outcome: StageOutcome::Moved,
                }
            }
            Err(e) => {
                warn!(
                    "stage.failed from={} to={} error={}",
                    decision.source.display(),
                    destination.display(),
                    e
                );
                self.reserved.remove(&destination);
                let errored_to = self.divert_to_errors(decision);
                StageRecord {
                    source: decision.source.clone(),
                    destination,
                    decision: decision.destination,
                    outcome: StageOutcome::Failed {
                        reason: e.to_string(),
                        errored_to,
                    },
                }
            }
        }
    }

    fn divert_to_errors(&mut self, decision: &RoutingDecision) -> Option<PathBuf> {
        if !decision.source.exists() {
            return None;
        }
        let fallback = self.claim(&decision.error_target);
        match move_file(&decision.source, &fallback) {
            Ok(()) => Some(fallback),
            Err(e) => {
                warn!(
                    "stage.errors_move_failed from={} error={}",
                    decision.source.display(),
                    e
                );
                self.reserved.remove(&fallback);
                None
            }
        }
    }
}
