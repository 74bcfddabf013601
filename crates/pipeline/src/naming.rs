//! Library naming rules.
//!
//! Movies: `Title (Year) {id}/Title (Year) {id}.ext`.
//! Episodes: `Series (years) {id}/Season NN/Series - sNNeNN - Episode Title.ext`,
//! with date-based episodes filed under `Season YYYY` as `Series - YYYY-MM-DD`.

use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip characters that are not allowed in file names on common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN.contains(c) && !c.is_control())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .trim()
        .to_string()
}

/// `Title (years) {tag}`, omitting the parts that are empty.
pub fn folder_name(title: &str, years: &str, tag: Option<&str>) -> String {
    let mut name = sanitize_filename(title);
    if !years.is_empty() {
        name.push_str(&format!(" ({})", years));
    }
    if let Some(tag) = tag {
        name.push(' ');
        name.push_str(tag);
    }
    name
}

/// `Folder/Folder.ext`
pub fn movie_path(title: &str, year: Option<i32>, tag: Option<&str>, ext: &str) -> PathBuf {
    let years = year.map(|y| y.to_string()).unwrap_or_default();
    let folder = folder_name(title, &years, tag);
    PathBuf::from(&folder).join(with_extension(&folder, ext))
}

/// Which episode a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeRef {
    Numbered { season: u32, episode: u32 },
    Dated(NaiveDate),
}

impl EpisodeRef {
    /// `s02e03` or `2021-03-04`
    pub fn token(&self) -> String {
        match self {
            EpisodeRef::Numbered { season, episode } => format!("s{:02}e{:02}", season, episode),
            EpisodeRef::Dated(date) => date.format("%Y-%m-%d").to_string(),
        }
    }

    /// `Season 02`, or `Season 2021` for date-based episodes
    pub fn season_folder(&self) -> String {
        match self {
            EpisodeRef::Numbered { season, .. } => format!("Season {:02}", season),
            EpisodeRef::Dated(date) => format!("Season {}", date.year()),
        }
    }
}

/// Inputs for an episode path.
#[derive(Debug, Clone)]
pub struct EpisodeName<'a> {
    /// Series name as it appears in file names.
    pub series: &'a str,
    /// Full series folder name (with years and tag when matched).
    pub series_folder: &'a str,
    pub episode: EpisodeRef,
    pub episode_title: Option<&'a str>,
    /// Use the episode title instead of the numeric token when one is known.
    pub title_only: bool,
    pub extension: &'a str,
}

/// `Series Folder/Season NN/<file>`
///
/// When `title_only` is set and a title is known the numeric token is
/// dropped; without a title the token is always kept.
pub fn episode_path(name: &EpisodeName<'_>) -> PathBuf {
    let series = sanitize_filename(name.series);
    let token = name.episode.token();
    let title = name
        .episode_title
        .map(sanitize_filename)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(&token));

    let stem = match (title, name.title_only) {
        (Some(title), true) => format!("{} - {}", series, title),
        (Some(title), false) => format!("{} - {} - {}", series, token, title),
        (None, _) => format!("{} - {}", series, token),
    };

    PathBuf::from(name.series_folder)
        .join(name.episode.season_folder())
        .join(with_extension(&stem, name.extension))
}

fn with_extension(stem: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    }
}
