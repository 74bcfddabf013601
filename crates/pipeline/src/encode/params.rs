//! Encode parameter derivation.
//!
//! 1080p sources get the HD bitrate pair and 8-bit output. 4K or HDR sources
//! get the UHD pair, 10-bit output and their colour tags carried over.

use crate::config::Config;
use crate::probe::VideoProbe;
use serde::Serialize;

/// Everything the transcoder needs for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeParams {
    /// ffmpeg video encoder name (e.g. "libx265").
    pub video_encoder: String,
    pub target_kbps: u32,
    pub max_kbps: u32,
    pub buffer_kbps: u32,
    pub pixel_format: String,
    pub profile: String,
    /// Copy primaries/transfer/matrix from the source.
    pub color: Option<ColorTags>,
    pub force_audio_aac: bool,
    pub keep_subtitles: bool,
}

/// Colour metadata passed through for HDR sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorTags {
    pub primaries: String,
    pub transfer: String,
    pub space: String,
}

impl ColorTags {
    fn from_probe(probe: &VideoProbe) -> Self {
        Self {
            primaries: probe
                .color_primaries
                .clone()
                .unwrap_or_else(|| "bt2020".to_string()),
            transfer: probe
                .color_transfer
                .clone()
                .unwrap_or_else(|| "smpte2084".to_string()),
            space: probe
                .color_space
                .clone()
                .unwrap_or_else(|| "bt2020nc".to_string()),
        }
    }
}

/// Derive [`EncodeParams`] for a probed source with extension `source_ext`.
pub fn derive_params(probe: &VideoProbe, source_ext: &str, config: &Config) -> EncodeParams {
    let t = &config.transcode;
    let high_tier = probe.is_4k() || probe.looks_hdr();

    let (target_kbps, max_kbps, buffer_kbps) = if high_tier {
        (t.uhd_target_kbps, t.uhd_max_kbps, t.uhd_buffer_kbps)
    } else {
        (t.hd_target_kbps, t.hd_max_kbps, t.hd_buffer_kbps)
    };

    let (pixel_format, profile) = if high_tier {
        ("yuv420p10le", "main10")
    } else {
        ("yuv420p", "main")
    };

    EncodeParams {
        video_encoder: t.video_encoder.clone(),
        target_kbps,
        max_kbps,
        buffer_kbps,
        pixel_format: pixel_format.to_string(),
        profile: profile.to_string(),
        color: high_tier.then(|| ColorTags::from_probe(probe)),
        force_audio_aac: t.force_audio_aac || config.extensions.forces_aac(source_ext),
        keep_subtitles: t.keep_subtitles,
    }
}
