//! Filename classifier.
//!
//! Turns a media path into a [`MediaCandidate`]: movie or TV episode, a
//! title guess and whatever structural tokens the name carries (season and
//! episode numbers, an air date, a release year). Classification is a pure
//! function of the path; nothing here touches the filesystem.
//!
//! Paths are expected relative to their content folder
//! (`Show/Season 1/Show.S01E01.mkv`) so ancestor folders can contribute a
//! title and so tags above the library root are not mistaken for
//! already-renamed output.

use crate::config::Config;
use crate::scan::file_extension;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

// ---------- Regex patterns ----------

static SEASON_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(s(\d{1,2})[ ._-]*e(\d{1,3}))").unwrap()
});

static CROSS_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])((\d{1,2})x(\d{2,3}))(?:[^a-z0-9]|$)").unwrap()
});

static DATE_YMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])(((?:19|20)\d{2})[-_. ](\d{1,2})[-_. ](\d{1,2}))(?:[^0-9]|$)").unwrap()
});

static DATE_DMY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])((\d{1,2})[-_. ](\d{1,2})[-_. ]((?:19|20)\d{2}))(?:[^0-9]|$)").unwrap()
});

static SEASON_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:season|series)[ ._-]*\d{1,4}$|^specials$").unwrap());

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]|\{[^}]*\}").unwrap());

static RESOLUTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\d{3,4}[pi]$").unwrap());

/// Release tokens that end a title wherever they appear.
const STRONG_NOISE: &[&str] = &[
    "4k", "uhd", "x264", "x265", "h264", "h265", "hevc", "avc", "xvid", "divx", "bluray",
    "bdrip", "brrip", "dvdrip", "webrip", "webdl", "hdtv", "hdrip", "remux", "ddp", "ddp5",
    "aac", "ac3", "eac3", "dts", "atmos", "truehd", "10bit", "8bit", "hdr10", "hdr10+",
];

/// Tokens only stripped from the end of a title.
const TRAILING_NOISE: &[&str] = &[
    "web", "dl", "rip", "hdr", "dv", "proper", "repack", "internal", "extended", "uncut",
    "unrated", "remastered", "multi", "subs", "complete", "season",
];

const YEAR_MIN: i32 = 1900;
const YEAR_MAX: i32 = 2100;

// ---------- Data structures ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaKind {
    Movie,
    TvEpisode,
}

/// The classifier's guess about a file before any catalog lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaCandidate {
    pub kind: MediaKind,
    pub title_guess: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub air_date: Option<NaiveDate>,
    /// Path the candidate was built from, relative to its content folder.
    pub raw_path: PathBuf,
    /// Lowercase extension without the dot.
    pub extension: String,
    /// Episode title already present in the name (`Show - S01E01 - Pilot`).
    pub episode_title_hint: Option<String>,
    /// A year, season/episode or date token backs the title.
    pub anchored: bool,
}

impl MediaCandidate {
    pub fn is_date_episode(&self) -> bool {
        self.kind == MediaKind::TvEpisode && self.air_date.is_some() && self.episode.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Classification {
    /// The name or an ancestor folder already carries a `{provider-id}` tag.
    AlreadyTagged,
    /// No usable title could be derived.
    Unclassifiable {
        raw_path: PathBuf,
        extension: String,
        reason: String,
    },
    Candidate(MediaCandidate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    SeasonEpisode { season: u32, episode: u32 },
    AirDate(NaiveDate),
    Year(i32),
}

/// Location of a structural token inside a name.
#[derive(Debug, Clone, Copy)]
struct TokenMatch {
    token: Token,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedName {
    kind: MediaKind,
    title: String,
    year: Option<i32>,
    season: Option<u32>,
    episode: Option<u32>,
    air_date: Option<NaiveDate>,
    episode_title_hint: Option<String>,
    anchored: bool,
}

// ---------- Classifier ----------

/// Filename classifier configured with the tag guard and title policy.
#[derive(Debug, Clone)]
pub struct Classifier {
    tag_pattern: Regex,
    min_title_len: usize,
}

impl Classifier {
    /// Build a classifier from the run configuration.
    ///
    /// The already-tagged guard recognises `{provider-id}` for every prefix
    /// in `resolver.tag_providers` (case-insensitive).
    pub fn new(config: &Config) -> Result<Self, regex::Error> {
        let providers: Vec<String> = config
            .resolver
            .tag_providers
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| regex::escape(p.trim()))
            .collect();
        let prefix = if providers.is_empty() {
            "[a-z]+".to_string()
        } else {
            providers.join("|")
        };
        let tag_pattern = Regex::new(&format!(r"(?i)\{{(?:{})-[^{{}}\s]+\}}", prefix))?;

        Ok(Self {
            tag_pattern,
            min_title_len: config.matching.min_title_len,
        })
    }

    /// True when any component of `path` carries a provider-ID tag.
    pub fn is_tagged(&self, path: &Path) -> bool {
        path.components().any(|c| match c {
            Component::Normal(part) => self.tag_pattern.is_match(&part.to_string_lossy()),
            _ => false,
        })
    }

    /// Classify a path relative to its content folder.
    pub fn classify(&self, path: &Path) -> Classification {
        if self.is_tagged(path) {
            return Classification::AlreadyTagged;
        }

        let extension = file_extension(path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut parsed = parse_name(&stem);
        let folders = ancestor_folders(path);

        match parsed.kind {
            MediaKind::TvEpisode if !is_plausible_title(&parsed.title, self.min_title_len) => {
                if let Some((title, year)) = series_from_folders(&folders, self.min_title_len) {
                    parsed.title = title;
                    parsed.year = parsed.year.or(year);
                }
            }
            MediaKind::Movie if !parsed.anchored => {
                // `Movie Title (2020)/movie.mkv`: the folder is better informed.
                if let Some(folder) = folders.first() {
                    let from_folder = parse_name(folder);
                    if from_folder.kind == MediaKind::Movie
                        && from_folder.anchored
                        && is_plausible_title(&from_folder.title, self.min_title_len)
                    {
                        parsed.title = from_folder.title;
                        parsed.year = from_folder.year;
                        parsed.anchored = true;
                    }
                }
            }
            _ => {}
        }

        if !is_plausible_title(&parsed.title, self.min_title_len) {
            return Classification::Unclassifiable {
                raw_path: path.to_path_buf(),
                extension,
                reason: if parsed.anchored {
                    "no title before structural token".to_string()
                } else {
                    "no structural token and no usable title".to_string()
                },
            };
        }

        Classification::Candidate(MediaCandidate {
            kind: parsed.kind,
            title_guess: parsed.title,
            year: parsed.year,
            season: parsed.season,
            episode: parsed.episode,
            air_date: parsed.air_date,
            raw_path: path.to_path_buf(),
            extension,
            episode_title_hint: parsed.episode_title_hint,
            anchored: parsed.anchored,
        })
    }
}

/// A title is usable when it has at least `min_len` characters, at least one
/// alphanumeric and no control characters.
pub fn is_plausible_title(title: &str, min_len: usize) -> bool {
    let title = title.trim();
    title.chars().count() >= min_len.max(1)
        && title.chars().any(|c| c.is_alphanumeric())
        && !title.chars().any(|c| c.is_control())
}

/// Folder names above the file, nearest first.
fn ancestor_folders(path: &Path) -> Vec<String> {
    let mut folders: Vec<String> = path
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    folders.reverse();
    folders
}

fn series_from_folders(folders: &[String], min_len: usize) -> Option<(String, Option<i32>)> {
    folders
        .iter()
        .filter(|f| !SEASON_FOLDER.is_match(f.trim()))
        .filter(|f| crate::layout::ContentType::from_dir_name(f).is_none())
        .map(|f| parse_name(f))
        .find(|p| is_plausible_title(&p.title, min_len))
        .map(|p| (p.title, p.year))
}

// ---------- Name parsing ----------

fn parse_name(name: &str) -> ParsedName {
    if let Some(m) = find_season_episode(name) {
        let (title, year) = split_trailing_year(&clean_title(&name[..m.start]));
        let (season, episode) = match m.token {
            Token::SeasonEpisode { season, episode } => (Some(season), Some(episode)),
            _ => (None, None),
        };
        return ParsedName {
            kind: MediaKind::TvEpisode,
            title,
            year,
            season,
            episode,
            air_date: None,
            episode_title_hint: episode_title_hint(&name[m.end..]),
            anchored: true,
        };
    }

    if let Some(m) = find_air_date(name) {
        let (title, year) = split_trailing_year(&clean_title(&name[..m.start]));
        let air_date = match m.token {
            Token::AirDate(date) => Some(date),
            _ => None,
        };
        return ParsedName {
            kind: MediaKind::TvEpisode,
            title,
            year,
            season: None,
            episode: None,
            air_date,
            episode_title_hint: episode_title_hint(&name[m.end..]),
            anchored: true,
        };
    }

    if let Some(m) = find_year(name) {
        let year = match m.token {
            Token::Year(y) => Some(y),
            _ => None,
        };
        return ParsedName {
            kind: MediaKind::Movie,
            title: clean_title(&name[..m.start]),
            year,
            season: None,
            episode: None,
            air_date: None,
            episode_title_hint: None,
            anchored: true,
        };
    }

    ParsedName {
        kind: MediaKind::Movie,
        title: clean_title(name),
        year: None,
        season: None,
        episode: None,
        air_date: None,
        episode_title_hint: None,
        anchored: false,
    }
}

/// Earliest `SxxEyy` or `NxNN` token, scanning left to right.
fn find_season_episode(name: &str) -> Option<TokenMatch> {
    let pick = |re: &Regex| {
        re.captures(name).and_then(|caps| {
            let whole = caps.get(1)?;
            let season = caps.get(2)?.as_str().parse().ok()?;
            let episode = caps.get(3)?.as_str().parse().ok()?;
            Some(TokenMatch {
                token: Token::SeasonEpisode { season, episode },
                start: whole.start(),
                end: whole.end(),
            })
        })
    };

    match (pick(&SEASON_EPISODE), pick(&CROSS_EPISODE)) {
        (Some(a), Some(b)) => Some(if b.start < a.start { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Earliest valid calendar date. Year-first dates win over day/month-first
/// ones; for `a-b-yyyy` the day comes first unless only `b` can be a day.
fn find_air_date(name: &str) -> Option<TokenMatch> {
    let ymd = DATE_YMD.captures_iter(name).find_map(|caps| {
        let whole = caps.get(1)?;
        let y = caps.get(2)?.as_str().parse().ok()?;
        let m = caps.get(3)?.as_str().parse().ok()?;
        let d = caps.get(4)?.as_str().parse().ok()?;
        let date = NaiveDate::from_ymd_opt(y, m, d)?;
        Some(TokenMatch {
            token: Token::AirDate(date),
            start: whole.start(),
            end: whole.end(),
        })
    });
    if ymd.is_some() {
        return ymd;
    }

    DATE_DMY.captures_iter(name).find_map(|caps| {
        let whole = caps.get(1)?;
        let a: u32 = caps.get(2)?.as_str().parse().ok()?;
        let b: u32 = caps.get(3)?.as_str().parse().ok()?;
        let y = caps.get(4)?.as_str().parse().ok()?;
        let (day, month) = if a <= 12 && b > 12 { (b, a) } else { (a, b) };
        let date = NaiveDate::from_ymd_opt(y, month, day)?;
        Some(TokenMatch {
            token: Token::AirDate(date),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

/// First four-digit year in range that has title text before it.
///
/// `2001.A.Space.Odyssey.1968` yields 1968 with the title kept intact.
fn find_year(name: &str) -> Option<TokenMatch> {
    year_positions(name)
        .into_iter()
        .find(|(start, _)| !clean_title(&name[..*start]).is_empty())
        .map(|(start, year)| TokenMatch {
            token: Token::Year(year),
            start,
            end: start + 4,
        })
}

/// Byte offsets of standalone years between 1900 and 2100.
fn year_positions(s: &str) -> Vec<(usize, i32)> {
    let bytes = s.as_bytes();
    let mut found = Vec::new();
    if bytes.len() < 4 {
        return found;
    }
    for i in 0..=bytes.len() - 4 {
        let window = &bytes[i..i + 4];
        if !window.iter().all(u8::is_ascii_digit) {
            continue;
        }
        if i > 0 && bytes[i - 1].is_ascii_alphanumeric() {
            continue;
        }
        if i + 4 < bytes.len() && bytes[i + 4].is_ascii_alphanumeric() {
            continue;
        }
        if let Ok(year) = s[i..i + 4].parse::<i32>() {
            if (YEAR_MIN..=YEAR_MAX).contains(&year) {
                found.push((i, year));
            }
        }
    }
    found
}

/// `Show Name 2019` -> (`Show Name`, 2019); a lone year is left alone.
fn split_trailing_year(title: &str) -> (String, Option<i32>) {
    let mut words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > 1 {
        if let Some(last) = words.last() {
            if last.len() == 4 {
                if let Ok(year) = last.parse::<i32>() {
                    if (YEAR_MIN..=YEAR_MAX).contains(&year) {
                        words.pop();
                        return (words.join(" "), Some(year));
                    }
                }
            }
        }
    }
    (title.to_string(), None)
}

/// Text after the token in `Show - S01E01 - Pilot` form.
fn episode_title_hint(rest: &str) -> Option<String> {
    let rest = rest.trim_start_matches(' ');
    let rest = rest.strip_prefix('-')?;
    if !rest.starts_with(' ') {
        return None;
    }
    let hint = clean_title(rest);
    if hint.is_empty() {
        None
    } else {
        Some(hint)
    }
}

fn is_strong_noise(word: &str) -> bool {
    let lower = word.to_lowercase();
    RESOLUTION.is_match(&lower) || STRONG_NOISE.contains(&lower.as_str())
}

fn is_trailing_noise(word: &str) -> bool {
    let lower = word.to_lowercase();
    if TRAILING_NOISE.contains(&lower.as_str()) {
        return true;
    }
    // season-pack marker such as `S01`
    let mut chars = lower.chars();
    chars.next() == Some('s')
        && (1..=2).contains(&chars.clone().count())
        && chars.all(|c| c.is_ascii_digit())
}

/// Normalise a raw title fragment.
///
/// Bracketed tags are dropped, `.`/`_`/`-` become spaces, whitespace is
/// collapsed, and release noise is cut. All-caps titles are title-cased.
pub fn clean_title(raw: &str) -> String {
    let without_tags = BRACKETED.replace_all(raw, " ");
    let spaced: String = without_tags
        .chars()
        .map(|c| match c {
            '.' | '_' | '-' | '(' | ')' | '[' | ']' | '{' | '}' => ' ',
            c => c,
        })
        .collect();

    let mut words: Vec<&str> = spaced.split_whitespace().collect();
    if let Some(cut) = words.iter().position(|w| is_strong_noise(w)) {
        words.truncate(cut);
    }
    while words.len() > 1 && words.last().map(|w| is_trailing_noise(w)).unwrap_or(false) {
        words.pop();
    }

    let title = words.join(" ");
    if is_shouting(&title) {
        title_case(&title)
    } else {
        title
    }
}

fn is_shouting(title: &str) -> bool {
    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() > 3 && title.contains(' ') && letters.iter().all(|c| c.is_uppercase())
}

fn title_case(title: &str) -> String {
    title
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
