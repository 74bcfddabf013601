//! Source probing with ffprobe.
//!
//! Only the first video stream matters: its dimensions decide 1080p vs 4K
//! and its colour tags decide whether the source is HDR.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported a failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no video stream.
    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),

    /// IO error (ffprobe missing, unreadable file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// First video stream of a source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoProbe {
    /// Codec name (e.g. "h264", "hevc").
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub pix_fmt: Option<String>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
    pub color_space: Option<String>,
}

impl VideoProbe {
    /// Width >= 3800 or height >= 2000.
    pub fn is_4k(&self) -> bool {
        self.width >= 3800 || self.height >= 2000
    }

    /// BT.2020 primaries or a PQ/HLG transfer function.
    pub fn looks_hdr(&self) -> bool {
        let primaries = self.color_primaries.as_deref().unwrap_or("");
        let transfer = self.color_transfer.as_deref().unwrap_or("");
        primaries.eq_ignore_ascii_case("bt2020")
            || transfer.eq_ignore_ascii_case("smpte2084")
            || transfer.eq_ignore_ascii_case("arib-std-b67")
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub pix_fmt: Option<String>,
        pub color_primaries: Option<String>,
        pub color_transfer: Option<String>,
        pub color_space: Option<String>,
    }
}

/// Parse `ffprobe -of json -show_streams` output into the first video stream.
///
/// Returns `Ok(None)` when there is no video stream.
pub fn parse_ffprobe_output(json_str: &str) -> Result<Option<VideoProbe>, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let video = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    Ok(video.map(|s| VideoProbe {
        codec: s.codec_name.unwrap_or_default(),
        width: s.width.unwrap_or(0),
        height: s.height.unwrap_or(0),
        pix_fmt: s.pix_fmt,
        color_primaries: s.color_primaries,
        color_transfer: s.color_transfer,
        color_space: s.color_space,
    }))
}

/// Probes a source file for resolution and HDR signal.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoProbe, ProbeError>;
}

/// [`Prober`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    bin: String,
}

impl FfprobeProber {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_type,codec_name,width,height,pix_fmt,color_primaries,color_transfer,color_space",
            "-of",
            "json",
        ])
        .arg(path)
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<VideoProbe, ProbeError> {
        let output = self.command(path).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)?.ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_ffprobe_output_hdr() {
        let json = r#"{
            "programs": [],
            "streams": [{
                "codec_type": "video",
                "codec_name": "hevc",
                "width": 3840,
                "height": 2160,
                "pix_fmt": "yuv420p10le",
                "color_space": "bt2020nc",
                "color_transfer": "smpte2084",
                "color_primaries": "bt2020"
            }]
        }"#;

        let probe = parse_ffprobe_output(json).unwrap().unwrap();
        assert_eq!(probe.codec, "hevc");
        assert!(probe.is_4k());
        assert!(probe.looks_hdr());
        assert_eq!(probe.color_space.as_deref(), Some("bt2020nc"));
    }

    #[test]
    fn test_parse_ffprobe_output_sdr_missing_fields() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}]}"#;
        let probe = parse_ffprobe_output(json).unwrap().unwrap();
        assert!(!probe.is_4k());
        assert!(!probe.looks_hdr());
        assert!(probe.pix_fmt.is_none());
    }

    #[test]
    fn test_parse_ffprobe_output_no_video() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "aac"}]}"#;
        assert!(parse_ffprobe_output(json).unwrap().is_none());
        assert!(parse_ffprobe_output("{}").unwrap().is_none());
    }

    #[test]
    fn test_parse_ffprobe_output_invalid() {
        assert!(matches!(
            parse_ffprobe_output("not json"),
            Err(ProbeError::ParseError(_))
        ));
    }

    #[test]
    fn test_hlg_counts_as_hdr() {
        let probe = VideoProbe {
            width: 1920,
            height: 1080,
            color_transfer: Some("arib-std-b67".to_string()),
            ..Default::default()
        };
        assert!(probe.looks_hdr());
        assert!(!probe.is_4k());
    }

    #[test]
    fn test_ffprobe_command_args() {
        let prober = FfprobeProber::new("/opt/ffprobe");
        let cmd = prober.command(Path::new("/media/in.avi"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/opt/ffprobe");
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w[0] == "-select_streams" && w[1] == "v:0"));
        assert!(args.windows(2).any(|w| w[0] == "-of" && w[1] == "json"));
        assert_eq!(args.last().map(String::as_str), Some("/media/in.avi"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe-binary");
        let result = prober.probe(Path::new("/tmp/none.mkv")).await;
        assert!(matches!(result, Err(ProbeError::Io(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_4k_threshold(width in 0u32..8000, height in 0u32..5000) {
            let probe = VideoProbe { width, height, ..Default::default() };
            prop_assert_eq!(probe.is_4k(), width >= 3800 || height >= 2000);
        }
    }
}
