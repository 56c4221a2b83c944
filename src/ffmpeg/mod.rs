mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod runner;
pub mod temp;

pub use builder::{
    audio_fingerprint_filter, build_audio_filter_args, build_clip_args, build_concat_args,
    build_extract_args, build_fps_args, build_metadata_remux_args, build_video_filter_args,
    format_args_for_display, frame_rate_arg,
};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error, stderr_tail};
pub use ffprobe::{DEFAULT_FPS, MediaInfo, probe_media};
pub use runner::run_ffmpeg_blocking;
pub use temp::{CopyScratch, cleanup_stale_artifacts, move_file};

use std::path::Path;

use crate::error::AppError;

/// Everything the wash pipeline needs from the external transcoder.
///
/// `transcode` takes the full argument list (without the program name) and blocks
/// until the process exits. `probe` never fails; unknown values come back as defaults.
pub trait MediaEngine: Send + Sync {
    fn transcode(&self, args: &[String]) -> Result<(), AppError>;
    fn probe(&self, path: &Path) -> MediaInfo;
}

/// Engine backed by the system `ffmpeg`/`ffprobe` binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Self {
        Self
    }

    /// Fails early when `ffmpeg` cannot be located.
    pub fn ensure_available(&self) -> Result<(), AppError> {
        discovery::get_ffmpeg_path().map(|_| ())
    }
}

impl MediaEngine for FfmpegEngine {
    fn transcode(&self, args: &[String]) -> Result<(), AppError> {
        let ffmpeg = discovery::get_ffmpeg_path()?;
        run_ffmpeg_blocking(ffmpeg, args)
    }

    fn probe(&self, path: &Path) -> MediaInfo {
        match discovery::get_ffprobe_path() {
            Ok(ffprobe) => probe_media(&ffprobe, path),
            Err(e) => {
                log::warn!(
                    target: "reels_washer::ffmpeg",
                    "Cannot probe {}: {}",
                    path.display(),
                    e
                );
                MediaInfo::default()
            }
        }
    }
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
