//! Whole-file transform stages.
//!
//! One FFmpeg invocation per effect. A stage never propagates an error: on failure
//! it hands back its input path so the chain continues without that effect.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::ffmpeg::{
    MediaEngine, audio_fingerprint_filter, build_audio_filter_args, build_clip_args,
    build_fps_args, build_video_filter_args, format_args_for_display, path_to_string, stderr_tail,
};
use crate::job::EffectConfig;

/// Seconds at the tail of the file the clipping percentage applies to.
pub const CLIP_WINDOW_SECONDS: f64 = 2.0;
pub const MIN_CLIPPED_DURATION: f64 = 1.0;
pub const MIN_FPS: f64 = 15.0;
pub const MAX_FPS: f64 = 60.0;
pub const FALLBACK_DIMENSIONS: (u32, u32) = (1920, 1080);

/// Whole-file stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Clip,
    Flip,
    Color,
    Hue,
    Blur,
    Resize,
    Noise,
    Fps,
    Audio,
}

impl StageKind {
    pub const ORDER: [StageKind; 9] = [
        StageKind::Clip,
        StageKind::Flip,
        StageKind::Color,
        StageKind::Hue,
        StageKind::Blur,
        StageKind::Resize,
        StageKind::Noise,
        StageKind::Fps,
        StageKind::Audio,
    ];

    /// Used in temp names: `temp_{tag}_{copy}.mp4`.
    pub fn tag(self) -> &'static str {
        match self {
            StageKind::Clip => "clipped",
            StageKind::Flip => "flipped",
            StageKind::Color => "color",
            StageKind::Hue => "hue",
            StageKind::Blur => "blur",
            StageKind::Resize => "resize",
            StageKind::Noise => "noise",
            StageKind::Fps => "fps",
            StageKind::Audio => "audio",
        }
    }

    /// Stages whose planning needs duration, dimensions or frame rate of the current file.
    pub fn needs_probe(self) -> bool {
        matches!(self, StageKind::Clip | StageKind::Resize | StageKind::Fps)
    }

    pub fn is_enabled(self, effects: &EffectConfig) -> bool {
        match self {
            StageKind::Clip => effects.clipping.enabled,
            StageKind::Flip => effects.flip.enabled,
            StageKind::Color => {
                effects.brightness.enabled || effects.contrast.enabled || effects.saturation.enabled
            }
            StageKind::Hue => effects.hue.enabled,
            StageKind::Blur => effects.blur.enabled,
            StageKind::Resize => effects.resize.enabled,
            StageKind::Noise => effects.noise.enabled,
            StageKind::Fps => effects.fps_change.enabled,
            StageKind::Audio => effects.audio_fingerprint.enabled,
        }
    }
}

/// A fully sampled whole-file effect, ready to turn into FFmpeg args.
#[derive(Debug, Clone, PartialEq)]
pub enum WholeFileEffect {
    Clip {
        duration: f64,
    },
    Flip,
    ColorEq {
        brightness: f64,
        contrast: f64,
        saturation: f64,
    },
    Hue {
        degrees: f64,
    },
    Blur {
        sigma: f64,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Noise {
        level: f64,
    },
    Fps {
        fps: f64,
    },
    Audio {
        pitch_percent: f64,
        tempo_percent: f64,
        low_db: f64,
        mid_db: f64,
        high_db: f64,
    },
}

impl WholeFileEffect {
    pub fn kind(&self) -> StageKind {
        match self {
            WholeFileEffect::Clip { .. } => StageKind::Clip,
            WholeFileEffect::Flip => StageKind::Flip,
            WholeFileEffect::ColorEq { .. } => StageKind::Color,
            WholeFileEffect::Hue { .. } => StageKind::Hue,
            WholeFileEffect::Blur { .. } => StageKind::Blur,
            WholeFileEffect::Resize { .. } => StageKind::Resize,
            WholeFileEffect::Noise { .. } => StageKind::Noise,
            WholeFileEffect::Fps { .. } => StageKind::Fps,
            WholeFileEffect::Audio { .. } => StageKind::Audio,
        }
    }

    pub fn to_args(&self, input_path: &str, output_path: &str) -> Vec<String> {
        match *self {
            WholeFileEffect::Clip { duration } => build_clip_args(input_path, output_path, duration),
            WholeFileEffect::Flip => build_video_filter_args(input_path, output_path, "hflip"),
            WholeFileEffect::ColorEq {
                brightness,
                contrast,
                saturation,
            } => {
                let filter = format!(
                    "eq=brightness={:.3}:contrast={:.3}:saturation={:.3}",
                    brightness - 1.0,
                    contrast,
                    saturation
                );
                build_video_filter_args(input_path, output_path, &filter)
            }
            WholeFileEffect::Hue { degrees } => {
                build_video_filter_args(input_path, output_path, &format!("hue=h={:.1}", degrees))
            }
            WholeFileEffect::Blur { sigma } => build_video_filter_args(
                input_path,
                output_path,
                &format!("gblur=sigma={:.2}", sigma),
            ),
            WholeFileEffect::Resize { width, height } => {
                build_video_filter_args(input_path, output_path, &format!("scale={}:{}", width, height))
            }
            WholeFileEffect::Noise { level } => build_video_filter_args(
                input_path,
                output_path,
                &format!("noise=alls={}:allf=t", (level * 100.0) as i64),
            ),
            WholeFileEffect::Fps { fps } => build_fps_args(input_path, output_path, fps),
            WholeFileEffect::Audio {
                pitch_percent,
                tempo_percent,
                low_db,
                mid_db,
                high_db,
            } => {
                let filter =
                    audio_fingerprint_filter(pitch_percent, tempo_percent, low_db, mid_db, high_db);
                build_audio_filter_args(input_path, output_path, &filter)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub output_path: PathBuf,
    pub produced_new_file: bool,
    pub failure: Option<String>,
}

impl StageResult {
    fn produced(output_path: PathBuf) -> Self {
        Self {
            output_path,
            produced_new_file: true,
            failure: None,
        }
    }

    fn skipped(input_path: &Path, reason: String) -> Self {
        Self {
            output_path: input_path.to_path_buf(),
            produced_new_file: false,
            failure: Some(reason),
        }
    }
}

/// Run one whole-file effect from `input` into `output`.
pub fn apply_stage(
    engine: &dyn MediaEngine,
    effect: &WholeFileEffect,
    input: &Path,
    output: &Path,
) -> StageResult {
    let args = effect.to_args(&path_to_string(input), &path_to_string(output));
    log::debug!(
        target: "reels_washer::stage",
        "{}: ffmpeg {}",
        effect.kind().tag(),
        format_args_for_display(&args)
    );

    match engine.transcode(&args) {
        Ok(()) if output.exists() => StageResult::produced(output.to_path_buf()),
        Ok(()) => {
            let reason = format!("{} produced no output file", effect.kind().tag());
            log::warn!(target: "reels_washer::stage", "{}", reason);
            StageResult::skipped(input, reason)
        }
        Err(e) => {
            let reason = match &e {
                AppError::FfmpegFailed { stderr, .. } => {
                    let tail = stderr_tail(stderr, 3);
                    if tail.is_empty() {
                        e.summary()
                    } else {
                        format!("{} {}", e.summary(), tail)
                    }
                }
                _ => e.summary(),
            };
            log::warn!(
                target: "reels_washer::stage",
                "{} stage failed, continuing without it: {}",
                effect.kind().tag(),
                reason
            );
            StageResult::skipped(input, reason)
        }
    }
}

/// Duration after cutting `percent`% of the final two seconds, floored at one second.
/// `None` when the duration is unknown.
pub fn clipped_duration(total: f64, percent: f64) -> Option<f64> {
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let cut = total.min(CLIP_WINDOW_SECONDS) * percent / 100.0;
    Some((total - cut).max(MIN_CLIPPED_DURATION))
}

/// Scale by `factor`, round, then clear the low bit so both sides stay even.
/// Unknown dimensions fall back to 1920x1080.
pub fn resized_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let (w, h) = if width == 0 || height == 0 {
        FALLBACK_DIMENSIONS
    } else {
        (width, height)
    };
    let scale = |v: u32| -> u32 {
        let scaled = (v as f64 * factor).round().max(2.0) as u32;
        scaled & !1
    };
    (scale(w), scale(h))
}

pub fn retimed_fps(original: f64, delta: f64) -> f64 {
    (original + delta).clamp(MIN_FPS, MAX_FPS)
}
