//! Scanner module for discovering media files in the Queue and Staged areas.
//!
//! Walks each content folder (`Movies`, `TV Shows`) of an area recursively,
//! skipping hidden directories and hidden files. Every visible regular file is
//! returned; deciding what to do with unsupported containers is left to routing.

use crate::layout::ContentType;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file discovered under an area's content folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// Content folder the file was found under.
    pub content: ContentType,
    /// Path relative to the content folder (e.g. `Show/Season 1/ep.mkv`).
    pub relative: PathBuf,
}

impl ScannedFile {
    /// Lowercase extension without the dot, empty when there is none.
    pub fn extension(&self) -> String {
        file_extension(&self.path)
    }
}

/// Lowercase extension of `path` without the leading dot.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

pub(crate) fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Scans `area/{Movies,TV Shows}` and returns the visible files, sorted by path.
///
/// Missing content folders are treated as empty.
pub fn scan_area(area: &Path) -> Vec<ScannedFile> {
    let mut files = Vec::new();

    for content in ContentType::ALL {
        let base = area.join(content.dir_name());
        if !base.is_dir() {
            continue;
        }

        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Allow the content folder itself even if it starts with '.'
                entry.depth() == 0 || !is_hidden(entry.file_name())
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = match path.strip_prefix(&base) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };

            files.push(ScannedFile {
                path: path.to_path_buf(),
                content,
                relative,
            });
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("/q/movie.MKV")), "mkv");
        assert_eq!(file_extension(Path::new("/q/Movie.Title.2020.avi")), "avi");
        assert_eq!(file_extension(Path::new("/q/movie")), "");
    }

    #[test]
    fn test_scan_area_reports_content_and_relative_path() {
        let tmp = TempDir::new().unwrap();
        let area = tmp.path();
        let show_dir = area.join("TV Shows").join("Show").join("Season 1");
        fs::create_dir_all(&show_dir).unwrap();
        fs::create_dir_all(area.join("Movies")).unwrap();
        File::create(show_dir.join("Show.S01E01.mkv")).unwrap();
        File::create(area.join("Movies").join("Film.2020.avi")).unwrap();

        let files = scan_area(area);
        assert_eq!(files.len(), 2);

        let movie = files.iter().find(|f| f.content == ContentType::Movies).unwrap();
        assert_eq!(movie.relative, PathBuf::from("Film.2020.avi"));
        assert_eq!(movie.extension(), "avi");

        let episode = files.iter().find(|f| f.content == ContentType::TvShows).unwrap();
        assert_eq!(
            episode.relative,
            PathBuf::from("Show").join("Season 1").join("Show.S01E01.mkv")
        );
    }

    #[test]
    fn test_scan_area_missing_area_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_area(&tmp.path().join("nope")).is_empty());
    }

    #[test]
    fn test_scan_area_ignores_files_outside_content_folders() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("Music")).unwrap();
        File::create(tmp.path().join("Music").join("song.mkv")).unwrap();
        File::create(tmp.path().join("loose.mkv")).unwrap();

        assert!(scan_area(tmp.path()).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_hidden_entries_are_skipped(
            visible_dir in "[a-zA-Z0-9]{1,10}",
            hidden_dir in "\\.[a-zA-Z0-9]{1,10}",
            filename in "[a-zA-Z0-9]{1,10}",
        ) {
            let tmp = TempDir::new().unwrap();
            let movies = tmp.path().join("Movies");

            let visible_path = movies.join(&visible_dir);
            fs::create_dir_all(&visible_path).unwrap();
            let visible_video = visible_path.join(format!("{}.mkv", filename));
            File::create(&visible_video).unwrap();

            let hidden_path = movies.join(&hidden_dir);
            fs::create_dir_all(&hidden_path).unwrap();
            let hidden_video = hidden_path.join(format!("{}.mkv", filename));
            File::create(&hidden_video).unwrap();

            let hidden_file = movies.join(format!(".{}.mkv", filename));
            File::create(&hidden_file).unwrap();

            let files = scan_area(tmp.path());

            prop_assert!(files.iter().any(|f| f.path == visible_video));
            prop_assert!(!files.iter().any(|f| f.path == hidden_video));
            prop_assert!(!files.iter().any(|f| f.path == hidden_file));
        }
    }
}
