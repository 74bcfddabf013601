//! End-of-run cleanup.
//!
//! 1. Visible files still in Staged or Queue go to Errors under their path
//!    relative to the area root (so `Queue/Movies/x` lands in `Errors/Movies/x`).
//! 2. The whole Staged tree is deleted. If a leftover could not be moved,
//!    it stays put and only hidden files and empty directories are removed.
//! 3. Queue is reset: hidden leftovers are deleted, empty directories are
//!    pruned bottom-up and the two content folders are recreated.
//!
//! Completed and Errors are only ever written to, never pruned.

use crate::layout::{ContentType, Layout};
use crate::scan::is_hidden;
use crate::stage::{move_file, suffixed_path, FileMove};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Leftovers moved (or, in dry-run, to be moved) to Errors.
    pub swept: Vec<FileMove>,
    /// Leftovers that could not be moved.
    pub failed: Vec<PathBuf>,
    pub staged_removed: bool,
    pub pruned_dirs: usize,
}

/// Runs the cleanup protocol over one library root.
pub struct Cleaner<'a> {
    layout: &'a Layout,
    dry_run: bool,
    reserved: HashSet<PathBuf>,
}

impl<'a> Cleaner<'a> {
    pub fn new(layout: &'a Layout, dry_run: bool) -> Self {
        Self {
            layout,
            dry_run,
            reserved: HashSet::new(),
        }
    }

    /// Run the whole protocol.
    ///
    /// `handled` are files earlier phases already moved or consumed (or, in
    /// a dry run, would have); they are not treated as leftovers.
    pub fn run(mut self, handled: &HashSet<PathBuf>) -> CleanupReport {
        let mut report = CleanupReport::default();

        let staged_root = self.layout.staged.clone();
        let staged_leftovers = visible_files(&staged_root)
            .into_iter()
            .filter(|p| !handled.contains(p))
            .collect();
        self.sweep(&staged_root, staged_leftovers, &mut report);
        let staged_stuck = report.failed.len();

        let queue_root = self.layout.queue.clone();
        let queue_leftovers = visible_files(&queue_root)
            .into_iter()
            .filter(|p| !handled.contains(p))
            .collect();
        self.sweep(&queue_root, queue_leftovers, &mut report);

        if staged_stuck > 0 {
            warn!(
                "cleanup.staged_kept stuck_files={} path={}",
                staged_stuck,
                staged_root.display()
            );
            report.pruned_dirs += self.prune(&staged_root, |_| false);
        } else {
            report.staged_removed = self.remove_staged();
        }
        report.pruned_dirs += self.reset_queue();

        info!(
            "cleanup.done swept={} failed={} pruned_dirs={} dry_run={}",
            report.swept.len(),
            report.failed.len(),
            report.pruned_dirs,
            self.dry_run
        );
        report
    }

    fn claim(&mut self, target: &Path) -> PathBuf {
        let mut candidate = target.to_path_buf();
        let mut n = 1;
        while candidate.exists() || self.reserved.contains(&candidate) {
            candidate = suffixed_path(target, n);
            n += 1;
        }
        self.reserved.insert(candidate.clone());
        candidate
    }

    fn sweep(&mut self, area_root: &Path, files: Vec<PathBuf>, report: &mut CleanupReport) {
        for path in files {
            let Ok(relative) = path.strip_prefix(area_root) else {
                continue;
            };
            let target = self.layout.errors.join(relative);
            let destination = self.claim(&target);

            if self.dry_run {
                info!(
                    "cleanup.dry_run from={} to={}",
                    path.display(),
                    destination.display()
                );
            } else if let Err(e) = move_file(&path, &destination) {
                warn!("cleanup.sweep_failed path={} error={}", path.display(), e);
                report.failed.push(path);
                continue;
            } else {
                warn!(
                    "cleanup.swept from={} to={}",
                    path.display(),
                    destination.display()
                );
            }

            report.swept.push(FileMove {
                source: path,
                destination,
            });
        }
    }

    fn remove_staged(&self) -> bool {
        let staged = &self.layout.staged;
        if !staged.exists() {
            return false;
        }
        if self.dry_run {
            info!("cleanup.dry_run remove={}", staged.display());
            return true;
        }
        match fs::remove_dir_all(staged) {
            Ok(()) => {
                debug!("cleanup.removed path={}", staged.display());
                true
            }
            Err(e) => {
                warn!("cleanup.remove_failed path={} error={}", staged.display(), e);
                false
            }
        }
    }

    /// Delete hidden files and empty directories below `root`, bottom-up.
    /// Visible files and directories for which `keep_dir` holds survive.
    /// Returns directories pruned.
    fn prune(&self, root: &Path, keep_dir: impl Fn(&Path) -> bool) -> usize {
        if self.dry_run || !root.is_dir() {
            return 0;
        }

        let mut pruned = 0;
        // Children are visited before their parents.
        for entry in WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if entry.file_type().is_dir() {
                if keep_dir(path) {
                    continue;
                }
                if fs::remove_dir(path).is_ok() {
                    pruned += 1;
                }
            } else if is_hidden(entry.file_name()) {
                if let Err(e) = fs::remove_file(path) {
                    debug!("cleanup.junk_remove_failed path={} error={}", path.display(), e);
                }
            }
        }
        pruned
    }

    /// Leave Queue holding only its content folders. Returns directories pruned.
    fn reset_queue(&self) -> usize {
        if self.dry_run {
            return 0;
        }

        let queue = &self.layout.queue;
        let pruned = self.prune(queue, |path| is_content_dir(queue, path));

        for content in ContentType::ALL {
            if let Err(e) = fs::create_dir_all(self.layout.queue_dir(content)) {
                warn!("cleanup.recreate_failed content={} error={}", content, e);
            }
        }

        pruned
    }
}

fn is_content_dir(queue: &Path, path: &Path) -> bool {
    path.parent() == Some(queue)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ContentType::from_dir_name)
            .is_some()
}

/// Visible files anywhere below `root`, sorted.
fn visible_files(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_leftovers_swept_and_queue_reset() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();

        let staged_left = layout.staged_dir(ContentType::Movies).join("Kept/Kept.avi");
        let queue_left = layout.queue_dir(ContentType::TvShows).join("Show/odd.mkv");
        let stray = layout.queue.join("stray.txt");
        let junk = layout.queue_dir(ContentType::Movies).join("Empty/.DS_Store");
        write_file(&staged_left);
        write_file(&queue_left);
        write_file(&stray);
        write_file(&junk);
        fs::create_dir_all(layout.queue.join("Random/Nested")).unwrap();

        let report = Cleaner::new(&layout, false).run(&HashSet::new());

        assert!(layout.errors.join("Movies/Kept/Kept.avi").exists());
        assert!(layout.errors.join("TV Shows/Show/odd.mkv").exists());
        assert!(layout.errors.join("stray.txt").exists());
        assert_eq!(report.swept.len(), 3);
        assert!(report.failed.is_empty());

        assert!(report.staged_removed);
        assert!(!layout.staged.exists());
        assert_eq!(entries(&layout.queue), vec!["Movies", "TV Shows"]);
        assert!(entries(&layout.queue_dir(ContentType::Movies)).is_empty());
        assert!(entries(&layout.queue_dir(ContentType::TvShows)).is_empty());
        assert!(layout.root.exists());
    }

    #[test]
    fn test_completed_untouched() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        let delivered = layout.completed_dir(ContentType::Movies).join("A (2000)/A (2000).mkv");
        write_file(&delivered);
        fs::create_dir_all(layout.completed_dir(ContentType::TvShows).join("EmptyShow")).unwrap();

        Cleaner::new(&layout, false).run(&HashSet::new());

        assert!(delivered.exists());
        assert!(layout.completed_dir(ContentType::TvShows).join("EmptyShow").exists());
    }

    #[test]
    fn test_sweep_collision_suffix() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        write_file(&layout.errors.join("Movies/a.mkv"));
        write_file(&layout.queue_dir(ContentType::Movies).join("a.mkv"));

        let report = Cleaner::new(&layout, false).run(&HashSet::new());
        assert_eq!(report.swept[0].destination, layout.errors.join("Movies/a (1).mkv"));
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let handled = layout.queue_dir(ContentType::Movies).join("Routed.2020.mkv");
        let leftover = layout.queue_dir(ContentType::Movies).join("Other/left.mkv");
        write_file(&handled);
        write_file(&leftover);

        let stale = layout.staged_dir(ContentType::Movies).join("M (2020)/M (2020).mkv");
        write_file(&stale);
        let handled_set: HashSet<PathBuf> = [handled.clone()].into_iter().collect();

        let report = Cleaner::new(&layout, true).run(&handled_set);

        let destinations: Vec<_> = report.swept.iter().map(|m| m.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                layout.errors.join("Movies/M (2020)/M (2020).mkv"),
                layout.errors.join("Movies/Other/left.mkv"),
            ]
        );
        assert!(handled.exists());
        assert!(leftover.exists());
        assert!(stale.exists());
        assert!(!layout.errors.exists());
        assert!(report.staged_removed);
    }

    #[test]
    fn test_unsweepable_staged_file_is_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let stuck = layout.staged_dir(ContentType::Movies).join("Old (1999)/Old (1999).mkv");
        let junk = layout.staged_dir(ContentType::TvShows).join("Empty/.DS_Store");
        write_file(&stuck);
        write_file(&junk);
        // a regular file where Errors/Movies should be
        write_file(&layout.errors_dir(ContentType::Movies));

        let report = Cleaner::new(&layout, false).run(&HashSet::new());

        assert_eq!(report.failed, vec![stuck.clone()]);
        assert!(report.swept.is_empty());
        assert!(!report.staged_removed);
        assert!(stuck.exists());
        assert!(!junk.exists());
        assert!(!layout.staged_dir(ContentType::TvShows).exists());
        assert_eq!(entries(&layout.queue), vec!["Movies", "TV Shows"]);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();

        Cleaner::new(&layout, false).run(&HashSet::new());
        let report = Cleaner::new(&layout, false).run(&HashSet::new());

        assert!(report.swept.is_empty());
        assert_eq!(report.pruned_dirs, 0);
        assert_eq!(entries(&layout.queue), vec!["Movies", "TV Shows"]);
    }
}
