//! ffmpeg transcoder backend.

use super::{EncodeError, EncodeParams};
use async_trait::async_trait;
use log::debug;
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs one transcode. Only the exit status is reported; the caller checks
/// the output file itself.
///
/// Dropping the returned future must stop the underlying process.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        params: &EncodeParams,
    ) -> Result<(), EncodeError>;
}

fn is_mp4_family(dest: &Path) -> bool {
    dest.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "mp4" | "m4v" | "mov"))
        .unwrap_or(false)
}

/// Build the ffmpeg invocation for one job.
///
/// All streams are mapped; video is re-encoded with a constrained bitrate,
/// audio is copied or converted to AAC, subtitles are copied (converted to
/// `mov_text` for mp4 outputs) or dropped.
pub fn build_ffmpeg_command(
    bin: &str,
    source: &Path,
    dest: &Path,
    params: &EncodeParams,
) -> Command {
    let mut cmd = Command::new(bin);

    cmd.arg("-hide_banner").arg("-nostdin").arg("-y");
    cmd.arg("-i").arg(source);
    cmd.arg("-map").arg("0");

    cmd.arg("-c:v").arg(&params.video_encoder);
    cmd.arg("-b:v").arg(format!("{}k", params.target_kbps));
    cmd.arg("-maxrate").arg(format!("{}k", params.max_kbps));
    cmd.arg("-bufsize").arg(format!("{}k", params.buffer_kbps));
    cmd.arg("-profile:v").arg(&params.profile);
    cmd.arg("-pix_fmt").arg(&params.pixel_format);

    if let Some(color) = &params.color {
        cmd.arg("-color_primaries").arg(&color.primaries);
        cmd.arg("-color_trc").arg(&color.transfer);
        cmd.arg("-colorspace").arg(&color.space);
    }

    if params.force_audio_aac {
        cmd.arg("-c:a").arg("aac").arg("-b:a").arg("192k");
    } else {
        cmd.arg("-c:a").arg("copy");
    }

    let mp4 = is_mp4_family(dest);
    if !params.keep_subtitles {
        cmd.arg("-sn");
    } else if mp4 {
        cmd.arg("-c:s").arg("mov_text");
    } else {
        cmd.arg("-c:s").arg("copy");
    }

    if mp4 {
        cmd.arg("-movflags").arg("+faststart");
    }

    cmd.arg(dest);
    cmd
}

/// [`Transcoder`] that shells out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    bin: String,
}

impl FfmpegTranscoder {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        params: &EncodeParams,
    ) -> Result<(), EncodeError> {
        let std_cmd = build_ffmpeg_command(&self.bin, source, dest, params);
        debug!("transcode.command {:?}", std_cmd);

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let status = cmd.status().await?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(EncodeError::Failed(code)),
                None => Err(EncodeError::Terminated),
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Writes a small file to `dest`, or fails for sources whose file name
    /// contains `fail_marker`. Tracks how many calls overlap.
    #[derive(Default)]
    pub struct FakeTranscoder {
        pub fail_marker: Option<String>,
        /// Exit zero without writing anything.
        pub write_nothing: bool,
        pub delay: Duration,
        pub running: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
        pub calls: AtomicUsize,
    }

    impl FakeTranscoder {
        pub fn failing_on(marker: &str) -> Self {
            Self {
                fail_marker: Some(marker.to_string()),
                ..Default::default()
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            source: &Path,
            dest: &Path,
            _params: &EncodeParams,
        ) -> Result<(), EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let name = source.to_string_lossy();
            let result = match &self.fail_marker {
                Some(marker) if name.contains(marker.as_str()) => {
                    // leave a partial file behind like a crashed encoder would
                    let _ = std::fs::write(dest, b"partial");
                    Err(EncodeError::Failed(1))
                }
                _ if self.write_nothing => Ok(()),
                _ => std::fs::write(dest, b"transcoded").map_err(EncodeError::from),
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
