//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Per-run behaviour switches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Report intended moves without touching the filesystem
    #[serde(default)]
    pub dry_run: bool,
    /// Keep the staged source after a successful transcode
    #[serde(default)]
    pub keep_source: bool,
    /// Allow a transcode to replace an existing output file
    #[serde(default = "default_true")]
    pub overwrite: bool,
    /// Transcode workers (0 = auto-derive)
    #[serde(default)]
    pub workers: u32,
}

fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            keep_source: false,
            overwrite: true,
            workers: 0,
        }
    }
}

/// Match acceptance policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingConfig {
    /// Minimum resolver confidence for a match to be used (0.0-1.0)
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,
    /// Results whose score is within this margin of the best are ambiguous
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f32,
    /// Minimum characters in a fallback title
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
    /// Fallback titles must be anchored by a year, episode or date token
    #[serde(default = "default_true")]
    pub require_structural_token: bool,
}

fn default_acceptance_threshold() -> f32 {
    0.75
}

fn default_ambiguity_margin() -> f32 {
    0.05
}

fn default_min_title_len() -> usize {
    2
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            ambiguity_margin: default_ambiguity_margin(),
            min_title_len: default_min_title_len(),
            require_structural_token: true,
        }
    }
}

/// Episode-title override set
///
/// In inclusion mode (the default) only the listed series get title-only
/// episode filenames. With `all_except_listed` every series does except
/// the listed ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EpisodeTitlesConfig {
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub all_except_listed: bool,
}

impl EpisodeTitlesConfig {
    /// Whether `series` should use the episode title instead of sNNeNN
    pub fn uses_episode_title(&self, series: &str) -> bool {
        let wanted = normalize_series_name(series);
        let listed = self
            .series
            .iter()
            .any(|s| normalize_series_name(s) == wanted);
        listed != self.all_except_listed
    }
}

/// Lowercase and collapse whitespace for series-name comparison
pub fn normalize_series_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Container extension tables (lowercase, no leading dot)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionsConfig {
    /// Containers delivered as-is
    #[serde(default = "default_deliverable")]
    pub deliverable: Vec<String>,
    /// Containers that must be transcoded before delivery
    #[serde(default = "default_transcode")]
    pub transcode: Vec<String>,
    /// Legacy containers whose audio is always re-encoded to AAC
    #[serde(default = "default_force_aac")]
    pub force_aac: Vec<String>,
}

fn default_deliverable() -> Vec<String> {
    ["mkv", "mp4", "m4v"].iter().map(|s| s.to_string()).collect()
}

fn default_transcode() -> Vec<String> {
    [
        "avi", "mov", "wmv", "mpg", "mpeg", "ts", "m2ts", "flv", "webm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_force_aac() -> Vec<String> {
    vec!["avi".to_string()]
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            deliverable: default_deliverable(),
            transcode: default_transcode(),
            force_aac: default_force_aac(),
        }
    }
}

impl ExtensionsConfig {
    pub fn is_deliverable(&self, ext: &str) -> bool {
        contains_ext(&self.deliverable, ext)
    }

    pub fn needs_transcode(&self, ext: &str) -> bool {
        contains_ext(&self.transcode, ext)
    }

    pub fn forces_aac(&self, ext: &str) -> bool {
        contains_ext(&self.force_aac, ext)
    }

    /// Any extension the pipeline knows how to handle
    pub fn is_known(&self, ext: &str) -> bool {
        self.is_deliverable(ext) || self.needs_transcode(ext)
    }
}

fn contains_ext(table: &[String], ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    table.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// ffmpeg video encoder name
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    /// 1080p target/max bitrate and buffer in kbps
    #[serde(default = "default_hd_target_kbps")]
    pub hd_target_kbps: u32,
    #[serde(default = "default_hd_max_kbps")]
    pub hd_max_kbps: u32,
    #[serde(default = "default_hd_buffer_kbps")]
    pub hd_buffer_kbps: u32,
    /// 4K / HDR target/max bitrate and buffer in kbps
    #[serde(default = "default_uhd_target_kbps")]
    pub uhd_target_kbps: u32,
    #[serde(default = "default_uhd_max_kbps")]
    pub uhd_max_kbps: u32,
    #[serde(default = "default_uhd_buffer_kbps")]
    pub uhd_buffer_kbps: u32,
    /// Re-encode audio to AAC for every file
    #[serde(default)]
    pub force_audio_aac: bool,
    /// Copy subtitle streams (false drops them)
    #[serde(default = "default_true")]
    pub keep_subtitles: bool,
    /// Container of transcoded output
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_video_encoder() -> String {
    "libx265".to_string()
}

fn default_hd_target_kbps() -> u32 {
    7000
}

fn default_hd_max_kbps() -> u32 {
    9000
}

fn default_hd_buffer_kbps() -> u32 {
    14000
}

fn default_uhd_target_kbps() -> u32 {
    20000
}

fn default_uhd_max_kbps() -> u32 {
    25000
}

fn default_uhd_buffer_kbps() -> u32 {
    40000
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            video_encoder: default_video_encoder(),
            hd_target_kbps: default_hd_target_kbps(),
            hd_max_kbps: default_hd_max_kbps(),
            hd_buffer_kbps: default_hd_buffer_kbps(),
            uhd_target_kbps: default_uhd_target_kbps(),
            uhd_max_kbps: default_uhd_max_kbps(),
            uhd_buffer_kbps: default_uhd_buffer_kbps(),
            force_audio_aac: false,
            keep_subtitles: true,
            output_extension: default_output_extension(),
        }
    }
}

/// Metadata resolver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfig {
    /// Catalog API key (usually supplied through TMDB_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider prefixes recognised in `{provider-id}` tags
    #[serde(default = "default_tag_providers")]
    pub tag_providers: Vec<String>,
}

fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_tag_providers() -> Vec<String> {
    ["tmdb", "tvdb", "imdb"].iter().map(|s| s.to_string()).collect()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            tag_providers: default_tag_providers(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub episode_titles: EpisodeTitlesConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    // Accept "true", "1", "yes" as true; "false", "0", "no" as false
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - TMDB_API_KEY -> resolver.api_key
    /// - PLEXIFIER_WORKERS -> run.workers
    /// - PLEXIFIER_KEEP_SOURCE -> run.keep_source
    /// - PLEXIFIER_ENCODER -> transcode.video_encoder
    /// - PLEXIFIER_FORCE_AUDIO_AAC -> transcode.force_audio_aac
    /// - PLEXIFIER_ACCEPT_THRESHOLD -> matching.acceptance_threshold
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("TMDB_API_KEY") {
            let val = val.trim();
            if !val.is_empty() {
                self.resolver.api_key = Some(val.to_string());
            }
        }

        if let Ok(val) = env::var("PLEXIFIER_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.run.workers = workers;
            }
        }

        if let Ok(val) = env::var("PLEXIFIER_KEEP_SOURCE") {
            if let Some(keep) = parse_bool(&val) {
                self.run.keep_source = keep;
            }
        }

        if let Ok(val) = env::var("PLEXIFIER_ENCODER") {
            if !val.trim().is_empty() {
                self.transcode.video_encoder = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("PLEXIFIER_FORCE_AUDIO_AAC") {
            if let Some(force) = parse_bool(&val) {
                self.transcode.force_audio_aac = force;
            }
        }

        if let Ok(val) = env::var("PLEXIFIER_ACCEPT_THRESHOLD") {
            if let Ok(threshold) = val.parse::<f32>() {
                self.matching.acceptance_threshold = threshold.clamp(0.0, 1.0);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
