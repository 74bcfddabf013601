//! Library root layout.
//!
//! ```text
//! Root/
//!   Queue/{Movies,TV Shows}/
//!   Staged/{Movies,TV Shows}/
//!   Completed/{Movies,TV Shows}/
//!   Errors/{Movies,TV Shows}/
//!   Kept Sources/{Movies,TV Shows}/
//! ```
//!
//! `Kept Sources` only exists after a keep-source run has converted
//! something; cleanup never looks at it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub const QUEUE_DIR: &str = "Queue";
pub const STAGED_DIR: &str = "Staged";
pub const COMPLETED_DIR: &str = "Completed";
pub const ERRORS_DIR: &str = "Errors";
pub const KEPT_DIR: &str = "Kept Sources";

/// Top-level content folder a file lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Movies,
    TvShows,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Movies, ContentType::TvShows];

    /// Folder name on disk.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ContentType::Movies => "Movies",
            ContentType::TvShows => "TV Shows",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.dir_name() == name)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Resolved paths of the areas under a library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub queue: PathBuf,
    pub staged: PathBuf,
    pub completed: PathBuf,
    pub errors: PathBuf,
    /// Transcode sources preserved by keep-source runs.
    pub kept: PathBuf,
}

impl Layout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            queue: root.join(QUEUE_DIR),
            staged: root.join(STAGED_DIR),
            completed: root.join(COMPLETED_DIR),
            errors: root.join(ERRORS_DIR),
            kept: root.join(KEPT_DIR),
            root,
        }
    }

    pub fn queue_dir(&self, content: ContentType) -> PathBuf {
        self.queue.join(content.dir_name())
    }

    pub fn staged_dir(&self, content: ContentType) -> PathBuf {
        self.staged.join(content.dir_name())
    }

    pub fn completed_dir(&self, content: ContentType) -> PathBuf {
        self.completed.join(content.dir_name())
    }

    pub fn errors_dir(&self, content: ContentType) -> PathBuf {
        self.errors.join(content.dir_name())
    }

    pub fn kept_dir(&self, content: ContentType) -> PathBuf {
        self.kept.join(content.dir_name())
    }

    /// Create Queue, Staged, Completed and Errors with their content folders.
    pub fn ensure(&self) -> io::Result<()> {
        for content in ContentType::ALL {
            std::fs::create_dir_all(self.queue_dir(content))?;
            std::fs::create_dir_all(self.staged_dir(content))?;
            std::fs::create_dir_all(self.completed_dir(content))?;
            std::fs::create_dir_all(self.errors_dir(content))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/media");
        assert_eq!(layout.queue_dir(ContentType::Movies), Path::new("/media/Queue/Movies"));
        assert_eq!(
            layout.errors_dir(ContentType::TvShows),
            Path::new("/media/Errors/TV Shows")
        );
        assert_eq!(
            layout.kept_dir(ContentType::Movies),
            Path::new("/media/Kept Sources/Movies")
        );
    }

    #[test]
    fn test_ensure_creates_all_areas() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();

        for content in ContentType::ALL {
            assert!(layout.queue_dir(content).is_dir());
            assert!(layout.staged_dir(content).is_dir());
            assert!(layout.completed_dir(content).is_dir());
            assert!(layout.errors_dir(content).is_dir());
        }
        assert!(!layout.kept.exists());
    }

    #[test]
    fn test_content_type_round_trip_dir_name() {
        assert_eq!(ContentType::from_dir_name("TV Shows"), Some(ContentType::TvShows));
        assert_eq!(ContentType::from_dir_name("Music"), None);
    }
}
