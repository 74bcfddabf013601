//! Routing decision engine.
//!
//! [`Router::route`] maps one scanned file, its classification and the
//! resolver's answer to exactly one [`Destination`] and a target path. It is a
//! pure function: nothing is read from or written to disk.
//!
//! Rules, first hit wins:
//! 1. unsupported extension -> Errored
//! 2. already tagged -> ManualReview (left as-is for an operator)
//! 3. unclassifiable -> ManualReview
//! 4. accepted match of a consistent kind -> tagged name, then by container
//! 5. safe fallback title -> untagged name, then by container
//! 6. otherwise -> ManualReview
//!
//! "By container" means ReadyForDelivery for a deliverable extension and
//! NeedsTranscode for any other known one.

use crate::classify::{Classification, MediaCandidate, MediaKind};
use crate::config::{Config, EpisodeTitlesConfig, ExtensionsConfig, MatchingConfig};
use crate::layout::{ContentType, Layout};
use crate::naming::{self, EpisodeName, EpisodeRef};
use crate::resolver::MetadataMatch;
use crate::scan::ScannedFile;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Destination {
    ReadyForDelivery,
    NeedsTranscode,
    ManualReview,
    Errored,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::ReadyForDelivery => "ready",
            Destination::NeedsTranscode => "needs_transcode",
            Destination::ManualReview => "manual_review",
            Destination::Errored => "errored",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single outcome decided for one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub destination: Destination,
    /// Content folder under the destination area.
    pub content: ContentType,
    pub source: PathBuf,
    /// Path below the destination content folder.
    pub relative_path: PathBuf,
    /// Full destination path before collision handling.
    pub target: PathBuf,
    /// Where the file goes if the move fails: Errors, original relative path.
    pub error_target: PathBuf,
    pub reason: String,
}

/// Routing policy built once per run from the configuration.
#[derive(Debug, Clone)]
pub struct Router {
    layout: Layout,
    matching: MatchingConfig,
    extensions: ExtensionsConfig,
    episode_titles: EpisodeTitlesConfig,
}

impl Router {
    pub fn new(config: &Config, layout: Layout) -> Self {
        Self {
            layout,
            matching: config.matching.clone(),
            extensions: config.extensions.clone(),
            episode_titles: config.episode_titles.clone(),
        }
    }

    /// Decide where `file` goes.
    pub fn route(
        &self,
        file: &ScannedFile,
        classification: &Classification,
        matched: Option<&MetadataMatch>,
    ) -> RoutingDecision {
        let extension = file.extension();

        if !self.extensions.is_known(&extension) {
            return self.keep_relative(file, Destination::Errored, "unsupported container");
        }

        let candidate = match classification {
            Classification::AlreadyTagged => {
                return self.keep_relative(file, Destination::ManualReview, "already tagged");
            }
            Classification::Unclassifiable { reason, .. } => {
                return self.keep_relative(file, Destination::ManualReview, reason);
            }
            Classification::Candidate(candidate) => candidate,
        };

        let by_container = if self.extensions.is_deliverable(&extension) {
            Destination::ReadyForDelivery
        } else {
            Destination::NeedsTranscode
        };

        if let Some(m) = matched.filter(|m| self.accepts(m, candidate)) {
            let (content, relative) = self.matched_path(candidate, m, &extension);
            return self.decide(file, by_container, content, relative, "matched");
        }

        if !self.is_safe_fallback(candidate) {
            let reason = "no match and no safe title";
            return self.keep_relative(file, Destination::ManualReview, reason);
        }

        let (content, relative) = self.fallback_path(candidate, &extension);
        self.decide(file, by_container, content, relative, "fallback title")
    }

    /// Confidence at or above the threshold and a consistent record type.
    pub fn accepts(&self, m: &MetadataMatch, candidate: &MediaCandidate) -> bool {
        m.confidence >= self.matching.acceptance_threshold && m.kind.fits(candidate.kind)
    }

    /// Plausible title, anchored by a structural token when required.
    pub fn is_safe_fallback(&self, candidate: &MediaCandidate) -> bool {
        crate::classify::is_plausible_title(&candidate.title_guess, self.matching.min_title_len)
            && (candidate.anchored || !self.matching.require_structural_token)
    }

    fn matched_path(
        &self,
        candidate: &MediaCandidate,
        m: &MetadataMatch,
        ext: &str,
    ) -> (ContentType, PathBuf) {
        let tag = m.id_tag();
        match candidate.kind {
            MediaKind::Movie => (
                ContentType::Movies,
                naming::movie_path(&m.canonical_title, m.years.start, Some(&tag), ext),
            ),
            MediaKind::TvEpisode => {
                let years = m.years.to_string();
                let folder = naming::folder_name(&m.canonical_title, &years, Some(&tag));
                let title = m
                    .episode_title
                    .as_deref()
                    .or(candidate.episode_title_hint.as_deref());
                (
                    ContentType::TvShows,
                    self.episode_path(&m.canonical_title, &folder, candidate, title, ext),
                )
            }
        }
    }

    fn fallback_path(&self, candidate: &MediaCandidate, ext: &str) -> (ContentType, PathBuf) {
        match candidate.kind {
            MediaKind::Movie => (
                ContentType::Movies,
                naming::movie_path(&candidate.title_guess, candidate.year, None, ext),
            ),
            MediaKind::TvEpisode => {
                let years = candidate.year.map(|y| y.to_string()).unwrap_or_default();
                let folder = naming::folder_name(&candidate.title_guess, &years, None);
                (
                    ContentType::TvShows,
                    self.episode_path(
                        &candidate.title_guess,
                        &folder,
                        candidate,
                        candidate.episode_title_hint.as_deref(),
                        ext,
                    ),
                )
            }
        }
    }

    fn episode_path(
        &self,
        series: &str,
        folder: &str,
        candidate: &MediaCandidate,
        episode_title: Option<&str>,
        ext: &str,
    ) -> PathBuf {
        let episode = match (candidate.season, candidate.episode, candidate.air_date) {
            (Some(season), Some(episode), _) => EpisodeRef::Numbered { season, episode },
            (_, _, Some(date)) => EpisodeRef::Dated(date),
            // a TV candidate always carries one of the two tokens
            _ => EpisodeRef::Numbered {
                season: candidate.season.unwrap_or(0),
                episode: candidate.episode.unwrap_or(0),
            },
        };

        naming::episode_path(&EpisodeName {
            series,
            series_folder: folder,
            episode,
            episode_title,
            title_only: self.episode_titles.uses_episode_title(series),
            extension: ext,
        })
    }

    fn keep_relative(
        &self,
        file: &ScannedFile,
        destination: Destination,
        reason: &str,
    ) -> RoutingDecision {
        self.decide(file, destination, file.content, file.relative.clone(), reason)
    }

    fn decide(
        &self,
        file: &ScannedFile,
        destination: Destination,
        content: ContentType,
        relative_path: PathBuf,
        reason: &str,
    ) -> RoutingDecision {
        let area = match destination {
            Destination::ReadyForDelivery => self.layout.completed_dir(content),
            Destination::NeedsTranscode => self.layout.staged_dir(content),
            Destination::ManualReview | Destination::Errored => self.layout.errors_dir(content),
        };
        RoutingDecision {
            destination,
            content,
            source: file.path.clone(),
            target: area.join(&relative_path),
            error_target: self.layout.errors_dir(file.content).join(&file.relative),
            relative_path,
            reason: reason.to_string(),
        }
    }
}
