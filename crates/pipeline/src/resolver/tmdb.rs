//! TMDb HTTP provider.
//!
//! Thin adapter over the v3 REST API. It performs the requests and maps the
//! responses to catalog types; scoring and error tolerance live in
//! [`super::CatalogResolver`] and [`super::resolve_candidate`]. There is no
//! retry or rate limiting here: a 429 surfaces as [`ResolverError::RateLimited`].

use super::{CatalogEntry, MetadataProvider, ResolverError, YearSpan};
use crate::config::ResolverConfig;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("plexifier/", env!("CARGO_PKG_VERSION"));

/// Raw TMDb response structures.
mod dto {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct SearchResponse<T> {
        #[serde(default = "Vec::new")]
        pub results: Vec<T>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MovieResult {
        pub id: u64,
        pub title: Option<String>,
        pub original_title: Option<String>,
        pub release_date: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct TvResult {
        pub id: u64,
        pub name: Option<String>,
        pub original_name: Option<String>,
        pub first_air_date: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct TvDetails {
        pub first_air_date: Option<String>,
        pub last_air_date: Option<String>,
        pub status: Option<String>,
        #[serde(default)]
        pub in_production: bool,
        #[serde(default)]
        pub seasons: Vec<SeasonSummary>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SeasonSummary {
        pub season_number: u32,
        pub air_date: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Season {
        #[serde(default)]
        pub episodes: Vec<Episode>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Episode {
        pub name: Option<String>,
        pub air_date: Option<String>,
    }
}

/// Year from a `YYYY-MM-DD` date string.
fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

fn provider_id(id: u64) -> String {
    format!("tmdb-{}", id)
}

/// Strip the `tmdb-` prefix added by [`provider_id`].
fn raw_id(id: &str) -> &str {
    id.strip_prefix("tmdb-").unwrap_or(id)
}

/// Airing range from series details.
///
/// Returning, in-production and planned series (or series without an end
/// date) are open-ended.
fn series_span(details: &dto::TvDetails) -> YearSpan {
    let start = year_of(details.first_air_date.as_deref());
    let end = year_of(details.last_air_date.as_deref());
    let status_open = matches!(
        details.status.as_deref(),
        Some("Returning Series") | Some("In Production") | Some("Planned")
    );
    YearSpan {
        start,
        end,
        ongoing: status_open || details.in_production || end.is_none(),
    }
}

/// TMDb client implementing [`MetadataProvider`].
pub struct TmdbProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbProvider {
    /// Build a provider from resolver settings.
    ///
    /// # Returns
    /// * `Err(ResolverError::MissingCredentials)` - no API key configured
    pub fn new(config: &ResolverConfig) -> Result<Self, ResolverError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ResolverError::MissingCredentials)?
            .to_string();

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ResolverError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// GET `path` and decode JSON. A 404 yields `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, ResolverError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("tmdb.request path={}", path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| ResolverError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolverError::RateLimited);
        }

        if !status.is_success() {
            return Err(ResolverError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ResolverError::Parse(e.to_string()))
    }

    async fn tv_details(&self, id: &str) -> Result<Option<dto::TvDetails>, ResolverError> {
        self.get_json(&format!("/tv/{}", raw_id(id)), &[]).await
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    async fn search_movies(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<CatalogEntry>, ResolverError> {
        let mut params = vec![("query", title.to_string())];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }

        let response: Option<dto::SearchResponse<dto::MovieResult>> =
            self.get_json("/search/movie", &params).await?;

        Ok(response
            .map(|r| r.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                Some(CatalogEntry {
                    id: provider_id(m.id),
                    title: m.title?,
                    original_title: m.original_title,
                    year: year_of(m.release_date.as_deref()),
                })
            })
            .collect())
    }

    async fn search_series(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<CatalogEntry>, ResolverError> {
        let mut params = vec![("query", title.to_string())];
        if let Some(year) = year {
            params.push(("first_air_date_year", year.to_string()));
        }

        let response: Option<dto::SearchResponse<dto::TvResult>> =
            self.get_json("/search/tv", &params).await?;

        Ok(response
            .map(|r| r.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| {
                Some(CatalogEntry {
                    id: provider_id(s.id),
                    title: s.name?,
                    original_title: s.original_name,
                    year: year_of(s.first_air_date.as_deref()),
                })
            })
            .collect())
    }

    async fn series_years(&self, id: &str) -> Result<YearSpan, ResolverError> {
        Ok(self
            .tv_details(id)
            .await?
            .map(|d| series_span(&d))
            .unwrap_or_default())
    }

    async fn episode_title(
        &self,
        id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Option<String>, ResolverError> {
        let path = format!("/tv/{}/season/{}/episode/{}", raw_id(id), season, episode);
        let ep: Option<dto::Episode> = self.get_json(&path, &[]).await?;
        Ok(ep.and_then(|e| e.name))
    }

    async fn episode_title_on(
        &self,
        id: &str,
        date: NaiveDate,
    ) -> Result<Option<String>, ResolverError> {
        let Some(details) = self.tv_details(id).await? else {
            return Ok(None);
        };
        let wanted = date.format("%Y-%m-%d").to_string();

        // Seasons that started after the air date cannot contain it.
        let mut seasons: Vec<&dto::SeasonSummary> = details
            .seasons
            .iter()
            .filter(|s| match year_of(s.air_date.as_deref()) {
                Some(start) => start <= date.year(),
                None => true,
            })
            .collect();
        seasons.sort_by(|a, b| b.season_number.cmp(&a.season_number));

        for summary in seasons {
            let path = format!("/tv/{}/season/{}", raw_id(id), summary.season_number);
            let season: Option<dto::Season> = self.get_json(&path, &[]).await?;
            let found = season.and_then(|s| {
                s.episodes
                    .into_iter()
                    .find(|e| e.air_date.as_deref() == Some(wanted.as_str()))
            });
            if let Some(ep) = found {
                return Ok(ep.name);
            }
        }

        Ok(None)
    }
}
