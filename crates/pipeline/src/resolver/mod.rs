//! Metadata resolver boundary.
//!
//! The pipeline only ever talks to a [`MetadataResolver`]: given a query built
//! from a [`MediaCandidate`] it returns at most one [`MetadataMatch`].
//! [`CatalogResolver`] is the production resolver. It asks a raw
//! [`MetadataProvider`] (the HTTP catalog) for search results and applies the
//! fuzzy decision logic from [`matching`]. Tests substitute either layer.

pub mod matching;
pub mod tmdb;

use crate::classify::{MediaCandidate, MediaKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use tmdb::TmdbProvider;

/// Error type for catalog lookups.
///
/// Every variant is treated as "no match" by the pipeline except
/// `MissingCredentials`, which is raised at startup.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Catalog returned HTTP {0}")]
    Status(u16),

    #[error("Rate limited by catalog")]
    RateLimited,

    #[error("Failed to parse catalog response: {0}")]
    Parse(String),

    #[error("Catalog API key is not configured")]
    MissingCredentials,
}

/// Catalog record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    Movie,
    Series,
}

impl MatchKind {
    /// Whether a match of this kind may name a candidate of `kind`.
    pub fn fits(&self, kind: MediaKind) -> bool {
        matches!(
            (self, kind),
            (MatchKind::Movie, MediaKind::Movie) | (MatchKind::Series, MediaKind::TvEpisode)
        )
    }
}

/// Release year or airing range.
///
/// Displays as `2020`, `2015-2020`, or `2019-` for a series still airing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct YearSpan {
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub ongoing: bool,
}

impl YearSpan {
    pub fn single(year: Option<i32>) -> Self {
        Self {
            start: year,
            end: year,
            ongoing: false,
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => (start..=end).contains(&year),
            (Some(start), None) => year >= start,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none()
    }
}

impl fmt::Display for YearSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (None, _) => Ok(()),
            (Some(start), _) if self.ongoing => write!(f, "{}-", start),
            (Some(start), None) => write!(f, "{}-", start),
            (Some(start), Some(end)) if end <= start => write!(f, "{}", start),
            (Some(start), Some(end)) => write!(f, "{}-{}", start, end),
        }
    }
}

/// A confirmed catalog record for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataMatch {
    /// Provider-qualified id such as `tmdb-42`.
    pub provider_id: String,
    pub kind: MatchKind,
    pub canonical_title: String,
    pub years: YearSpan,
    pub episode_title: Option<String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
}

impl MetadataMatch {
    /// `{tmdb-42}` style tag used in folder and file names.
    pub fn id_tag(&self) -> String {
        format!("{{{}}}", self.provider_id)
    }
}

/// What the resolver is asked about a file.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataQuery {
    pub kind: MediaKind,
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub air_date: Option<NaiveDate>,
}

impl From<&MediaCandidate> for MetadataQuery {
    fn from(candidate: &MediaCandidate) -> Self {
        Self {
            kind: candidate.kind,
            title: candidate.title_guess.clone(),
            year: candidate.year,
            season: candidate.season,
            episode: candidate.episode,
            air_date: candidate.air_date,
        }
    }
}

/// Resolves a candidate to zero or one catalog match.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Returns `Ok(None)` when nothing matches or the results are ambiguous.
    async fn resolve(&self, query: &MetadataQuery) -> Result<Option<MetadataMatch>, ResolverError>;
}

/// One search hit from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Provider-qualified id such as `tmdb-42`.
    pub id: String,
    pub title: String,
    pub original_title: Option<String>,
    /// Release year (movies) or first-air year (series).
    pub year: Option<i32>,
}

/// Raw catalog operations backing [`CatalogResolver`].
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search_movies(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<CatalogEntry>, ResolverError>;

    async fn search_series(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<CatalogEntry>, ResolverError>;

    /// Airing range of a series.
    async fn series_years(&self, id: &str) -> Result<YearSpan, ResolverError>;

    async fn episode_title(
        &self,
        id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Option<String>, ResolverError>;

    /// Title of the episode that aired on `date`.
    async fn episode_title_on(
        &self,
        id: &str,
        date: NaiveDate,
    ) -> Result<Option<String>, ResolverError>;
}

/// Resolver that scores provider search results.
pub struct CatalogResolver<P> {
    provider: P,
    ambiguity_margin: f32,
}

impl<P: MetadataProvider> CatalogResolver<P> {
    pub fn new(provider: P, ambiguity_margin: f32) -> Self {
        Self {
            provider,
            ambiguity_margin,
        }
    }

    async fn resolve_movie(
        &self,
        query: &MetadataQuery,
    ) -> Result<Option<MetadataMatch>, ResolverError> {
        let mut results = self.provider.search_movies(&query.title, query.year).await?;
        if results.is_empty() && query.year.is_some() {
            // year-restricted search can miss off-by-one release dates
            results = self.provider.search_movies(&query.title, None).await?;
        }

        let Some((entry, score)) =
            matching::pick_best(&query.title, query.year, &results, self.ambiguity_margin)
        else {
            return Ok(None);
        };

        Ok(Some(MetadataMatch {
            provider_id: entry.id.clone(),
            kind: MatchKind::Movie,
            canonical_title: entry.title.clone(),
            years: YearSpan::single(entry.year),
            episode_title: None,
            confidence: score,
        }))
    }

    async fn resolve_series(
        &self,
        query: &MetadataQuery,
    ) -> Result<Option<MetadataMatch>, ResolverError> {
        let results = self.provider.search_series(&query.title, None).await?;

        let Some((entry, score)) =
            matching::pick_best(&query.title, query.year, &results, self.ambiguity_margin)
        else {
            return Ok(None);
        };

        let years = match self.provider.series_years(&entry.id).await {
            Ok(span) => span,
            Err(e) => {
                warn!("resolver.series_years id={} error={}", entry.id, e);
                YearSpan {
                    start: entry.year,
                    end: None,
                    ongoing: true,
                }
            }
        };

        let episode_title = match (query.season, query.episode, query.air_date) {
            (Some(season), Some(episode), _) => {
                self.provider.episode_title(&entry.id, season, episode).await
            }
            (_, _, Some(date)) => self.provider.episode_title_on(&entry.id, date).await,
            _ => Ok(None),
        };
        let episode_title = episode_title.unwrap_or_else(|e| {
            warn!("resolver.episode_title id={} error={}", entry.id, e);
            None
        });

        Ok(Some(MetadataMatch {
            provider_id: entry.id.clone(),
            kind: MatchKind::Series,
            canonical_title: entry.title.clone(),
            years,
            episode_title: episode_title.filter(|t| !t.trim().is_empty()),
            confidence: score,
        }))
    }
}

#[async_trait]
impl<P: MetadataProvider> MetadataResolver for CatalogResolver<P> {
    async fn resolve(&self, query: &MetadataQuery) -> Result<Option<MetadataMatch>, ResolverError> {
        match query.kind {
            MediaKind::Movie => self.resolve_movie(query).await,
            MediaKind::TvEpisode => self.resolve_series(query).await,
        }
    }
}

/// Resolve a candidate, treating every resolver failure as "no match".
pub async fn resolve_candidate(
    resolver: &dyn MetadataResolver,
    candidate: &MediaCandidate,
) -> Option<MetadataMatch> {
    let query = MetadataQuery::from(candidate);
    match resolver.resolve(&query).await {
        Ok(Some(m)) => {
            debug!(
                "resolver.match file={} id={} confidence={:.2}",
                candidate.raw_path.display(),
                m.provider_id,
                m.confidence
            );
            Some(m)
        }
        Ok(None) => {
            debug!("resolver.no_match file={}", candidate.raw_path.display());
            None
        }
        Err(e) => {
            warn!(
                "resolver.error file={} error={}",
                candidate.raw_path.display(),
                e
            );
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;
    use std::path::PathBuf;

    fn query(kind: MediaKind, title: &str, year: Option<i32>) -> MetadataQuery {
        MetadataQuery {
            kind,
            title: title.to_string(),
            year,
            season: None,
            episode: None,
            air_date: None,
        }
    }

    #[test]
    fn test_year_span_display() {
        let returning = YearSpan {
            start: Some(2019),
            end: None,
            ongoing: true,
        };
        assert_eq!(returning.to_string(), "2019-");

        let ended = YearSpan {
            start: Some(2015),
            end: Some(2020),
            ongoing: false,
        };
        assert_eq!(ended.to_string(), "2015-2020");

        let single = YearSpan {
            start: Some(2019),
            end: Some(2019),
            ongoing: false,
        };
        assert_eq!(single.to_string(), "2019");
        assert_eq!(YearSpan::default().to_string(), "");
    }

    #[test]
    fn test_match_kind_fits() {
        assert!(MatchKind::Movie.fits(MediaKind::Movie));
        assert!(MatchKind::Series.fits(MediaKind::TvEpisode));
        assert!(!MatchKind::Series.fits(MediaKind::Movie));
        assert!(!MatchKind::Movie.fits(MediaKind::TvEpisode));
    }

    #[tokio::test]
    async fn test_catalog_resolver_movie_prefers_year() {
        let provider = FakeProvider {
            movies: vec![
                entry("tmdb-1", "The Thing", Some(1982)),
                entry("tmdb-2", "The Thing", Some(2011)),
            ],
            ..Default::default()
        };
        let resolver = CatalogResolver::new(provider, 0.05);

        let m = resolver
            .resolve(&query(MediaKind::Movie, "The Thing", Some(2011)))
            .await
            .unwrap()
            .expect("match");
        assert_eq!(m.provider_id, "tmdb-2");
        assert_eq!(m.years.to_string(), "2011");
        assert!(m.confidence > 0.99);
    }

    #[tokio::test]
    async fn test_catalog_resolver_ambiguous_returns_none() {
        let provider = FakeProvider {
            movies: vec![
                entry("tmdb-1", "The Thing", Some(1982)),
                entry("tmdb-2", "The Thing", Some(2011)),
            ],
            ..Default::default()
        };
        let resolver = CatalogResolver::new(provider, 0.05);

        let m = resolver
            .resolve(&query(MediaKind::Movie, "The Thing", None))
            .await
            .unwrap();
        assert!(m.is_none());
    }

    #[tokio::test]
    async fn test_catalog_resolver_series_with_episode_title() {
        let mut provider = FakeProvider {
            series: vec![entry("tmdb-42", "Show Name", Some(2019))],
            ..Default::default()
        };
        provider.years.insert(
            "tmdb-42".to_string(),
            YearSpan {
                start: Some(2019),
                end: None,
                ongoing: true,
            },
        );
        provider
            .episodes
            .insert(("tmdb-42".to_string(), 2, 3), "Lost Cause".to_string());
        let resolver = CatalogResolver::new(provider, 0.05);

        let mut q = query(MediaKind::TvEpisode, "Show Name", None);
        q.season = Some(2);
        q.episode = Some(3);
        let m = resolver.resolve(&q).await.unwrap().expect("match");
        assert_eq!(m.kind, MatchKind::Series);
        assert_eq!(m.years.to_string(), "2019-");
        assert_eq!(m.episode_title.as_deref(), Some("Lost Cause"));
    }

    #[tokio::test]
    async fn test_catalog_resolver_tolerates_detail_failures() {
        let provider = FakeProvider {
            series: vec![entry("tmdb-7", "Show Name", Some(2010))],
            fail_details: true,
            ..Default::default()
        };
        let resolver = CatalogResolver::new(provider, 0.05);

        let mut q = query(MediaKind::TvEpisode, "Show Name", None);
        q.season = Some(1);
        q.episode = Some(1);
        let m = resolver.resolve(&q).await.unwrap().expect("match");
        assert_eq!(m.years.to_string(), "2010-");
        assert_eq!(m.episode_title, None);
    }

    #[tokio::test]
    async fn test_catalog_resolver_air_date_lookup() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        let mut provider = FakeProvider {
            series: vec![entry("tmdb-9", "The Daily Show", Some(1996))],
            ..Default::default()
        };
        provider
            .dated
            .insert(("tmdb-9".to_string(), date), "Guest Night".to_string());
        let resolver = CatalogResolver::new(provider, 0.05);

        let mut q = query(MediaKind::TvEpisode, "The Daily Show", None);
        q.air_date = Some(date);
        let m = resolver.resolve(&q).await.unwrap().expect("match");
        assert_eq!(m.episode_title.as_deref(), Some("Guest Night"));
    }

    #[tokio::test]
    async fn test_resolve_candidate_maps_errors_to_none() {
        let resolver = FakeResolver::default().failing_on("Show Name");
        let candidate = MediaCandidate {
            kind: MediaKind::TvEpisode,
            title_guess: "Show Name".to_string(),
            year: None,
            season: Some(1),
            episode: Some(1),
            air_date: None,
            raw_path: PathBuf::from("Show.Name.S01E01.mkv"),
            extension: "mkv".to_string(),
            episode_title_hint: None,
            anchored: true,
        };

        assert_eq!(resolve_candidate(&resolver, &candidate).await, None);
        assert_eq!(resolver.call_count(), 1);
    }
}
