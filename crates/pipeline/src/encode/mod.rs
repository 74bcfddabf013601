//! Transcoding: parameter derivation and the ffmpeg backend.

pub mod ffmpeg;
pub mod params;

pub use ffmpeg::{build_ffmpeg_command, FfmpegTranscoder, Transcoder};
pub use params::{derive_params, EncodeParams};

use thiserror::Error;

/// Error type for transcode operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Transcoder exited with non-zero status
    #[error("transcoder failed with exit code: {0}")]
    Failed(i32),

    /// Transcoder was terminated by a signal
    #[error("transcoder was terminated by signal")]
    Terminated,

    /// Exit status was zero but the output is missing or empty
    #[error("transcoder produced no output")]
    EmptyOutput,

    /// IO error while spawning or waiting on the transcoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
