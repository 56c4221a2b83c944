//! Job descriptor and effect configuration.
//!
//! A `Job` is a value snapshot: the boundary layer (sidecar, GUI) builds it once and
//! hands it to the pipeline by value. Optional knobs resolve through `effective_*`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_CODEC: &str = "libx264";
pub const DEFAULT_BITRATE_KBPS: u32 = 2000;
pub const DEFAULT_GIF_FPS: f64 = 10.0;
pub const DEFAULT_GIF_QUALITY: u32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Video,
    Gif,
}

impl OutputMode {
    pub fn extension(self) -> &'static str {
        match self {
            OutputMode::Video => "mp4",
            OutputMode::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    #[default]
    Exact,
    Variations,
}

/// One effect entry: a switch plus its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Effect<P> {
    pub enabled: bool,
    pub parameters: P,
}

impl<P: Default> Effect<P> {
    pub fn on(parameters: P) -> Self {
        Self {
            enabled: true,
            parameters,
        }
    }
}

/// Parameters for effects whose values are drawn from `WholeFileBands` at run time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoParameters {}

pub type Toggle = Effect<NoParameters>;

impl Toggle {
    pub fn enabled() -> Self {
        Effect::on(NoParameters {})
    }
}

/// Percentage of the final two seconds to cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClippingParams {
    pub min: f64,
    pub max: f64,
}

impl Default for ClippingParams {
    fn default() -> Self {
        Self {
            min: 5.0,
            max: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitplaneParams {
    pub intensity: f64,
    pub planes: u32,
}

impl Default for BitplaneParams {
    fn default() -> Self {
        Self {
            intensity: 0.5,
            planes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionMode {
    Brighten,
    Darken,
    #[default]
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    pub width: u32,
    pub height: u32,
    pub mode: RegionMode,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            mode: RegionMode::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayParams {
    /// Every Nth frame (1-indexed) gets the overlay.
    pub interval: u32,
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self { interval: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShadowLineParams {
    pub horizontal: u32,
    pub vertical: u32,
    pub intensity: f64,
    pub line_width: u32,
    pub speed: f64,
}

impl Default for ShadowLineParams {
    fn default() -> Self {
        Self {
            horizontal: 0,
            vertical: 0,
            intensity: 0.1,
            line_width: 1,
            speed: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectConfig {
    pub clipping: Effect<ClippingParams>,
    pub flip: Toggle,
    pub brightness: Toggle,
    pub contrast: Toggle,
    pub saturation: Toggle,
    pub hue: Toggle,
    pub blur: Toggle,
    pub resize: Toggle,
    pub noise: Toggle,
    pub fps_change: Toggle,
    pub audio_fingerprint: Toggle,

    pub bitplane: Effect<BitplaneParams>,
    pub region: Effect<RegionParams>,
    pub overlay: Effect<OverlayParams>,
    pub shadow_lines: Effect<ShadowLineParams>,

    /// Reseed frame effects from `effect_seed` on every frame.
    pub consistent_effects: bool,
    pub effect_seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickWash {
    Normal,
    Deep,
    Extreme,
}

impl EffectConfig {
    pub fn frame_level_enabled(&self) -> bool {
        self.bitplane.enabled
            || self.region.enabled
            || self.overlay.enabled
            || self.shadow_lines.enabled
    }

    pub fn frame_seed(&self) -> Option<u64> {
        self.consistent_effects.then_some(self.effect_seed)
    }

    /// Canned effect sets. Everything not named by the preset starts disabled.
    pub fn preset(kind: QuickWash) -> Self {
        let mut config = EffectConfig::default();
        match kind {
            QuickWash::Normal => {
                config.brightness = Toggle::enabled();
                config.contrast = Toggle::enabled();
                config.saturation = Toggle::enabled();
                config.noise = Toggle::enabled();
                config.fps_change = Toggle::enabled();
                config.resize = Toggle::enabled();
                config.flip = Toggle::enabled();
                config.audio_fingerprint = Toggle::enabled();
                config.clipping = Effect::on(ClippingParams { min: 3.0, max: 7.0 });
            }
            QuickWash::Deep => {
                config.brightness = Toggle::enabled();
                config.contrast = Toggle::enabled();
                config.saturation = Toggle::enabled();
                config.noise = Toggle::enabled();
                config.fps_change = Toggle::enabled();
            }
            QuickWash::Extreme => {
                config.brightness = Toggle::enabled();
                config.contrast = Toggle::enabled();
                config.saturation = Toggle::enabled();
                config.hue = Toggle::enabled();
                config.noise = Toggle::enabled();
                config.fps_change = Toggle::enabled();
                config.bitplane = Effect::on(BitplaneParams {
                    intensity: 0.3,
                    planes: 2,
                });
                config.clipping = Effect::on(ClippingParams {
                    min: 8.0,
                    max: 12.0,
                });
                config.flip = Toggle::enabled();
            }
        }
        config
    }
}

/// Inclusive uniform range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bounds in ascending order, so a reversed band still samples.
    pub fn ordered(self) -> (f64, f64) {
        if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        }
    }
}

/// Ranges for whole-file values drawn at the moment each stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WholeFileBands {
    pub brightness: Band,
    pub contrast: Band,
    pub saturation: Band,
    pub hue_degrees: Band,
    pub blur_sigma: Band,
    pub resize_factor: Band,
    pub noise_level: Band,
    pub fps_delta: Band,
    pub pitch_percent: Band,
    pub tempo_percent: Band,
    pub eq_low_db: Band,
    pub eq_mid_db: Band,
    pub eq_high_db: Band,
}

impl Default for WholeFileBands {
    fn default() -> Self {
        Self {
            brightness: Band::new(0.9, 1.1),
            contrast: Band::new(0.95, 1.1),
            saturation: Band::new(0.9, 1.1),
            hue_degrees: Band::new(-15.0, 15.0),
            blur_sigma: Band::new(0.5, 3.0),
            resize_factor: Band::new(0.98, 1.02),
            noise_level: Band::new(0.01, 0.05),
            fps_delta: Band::new(-1.5, 1.5),
            pitch_percent: Band::new(-2.0, 2.0),
            tempo_percent: Band::new(-2.0, 2.0),
            eq_low_db: Band::new(-1.5, 1.5),
            eq_mid_db: Band::new(-1.0, 1.0),
            eq_high_db: Band::new(-1.5, 1.5),
        }
    }
}

/// Jitter applied per copy in `CopyMode::Variations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VariationBands {
    pub bitplane_intensity_factor: Band,
    pub bitplane_intensity_limits: Band,
    pub bitplane_plane_shift: i32,
    pub bitplane_plane_limits: (u32, u32),
    pub shadow_line_shift: i32,
    pub shadow_intensity_factor: Band,
    pub shadow_intensity_limits: Band,
    pub shadow_width_shift: i32,
    pub shadow_width_limits: (u32, u32),
    pub shadow_speed_factor: Band,
    pub shadow_speed_limits: Band,
    pub clipping_shift: f64,
    pub flip_keep_probability: f64,
}

impl Default for VariationBands {
    fn default() -> Self {
        Self {
            bitplane_intensity_factor: Band::new(0.8, 1.2),
            bitplane_intensity_limits: Band::new(0.1, 1.0),
            bitplane_plane_shift: 1,
            bitplane_plane_limits: (1, 3),
            shadow_line_shift: 2,
            shadow_intensity_factor: Band::new(0.8, 1.2),
            shadow_intensity_limits: Band::new(0.1, 0.5),
            shadow_width_shift: 1,
            shadow_width_limits: (1, 5),
            shadow_speed_factor: Band::new(0.9, 1.1),
            shadow_speed_limits: Band::new(0.5, 2.0),
            clipping_shift: 2.0,
            flip_keep_probability: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplingBands {
    pub whole_file: WholeFileBands,
    pub variation: VariationBands,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub source_path: PathBuf,
    pub output_folder: PathBuf,
    pub filename_prefix: String,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default)]
    pub effects: EffectConfig,
    #[serde(default = "default_copy_count")]
    pub copy_count: u32,
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,
    #[serde(default)]
    pub copy_mode: CopyMode,
    pub fps: Option<f64>,
    pub quality: Option<u32>,
    pub codec: Option<String>,
    /// Video bitrate in kbps.
    pub bitrate: Option<u32>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    #[serde(default)]
    pub sampling: SamplingBands,
}

fn default_copy_count() -> u32 {
    1
}

fn default_playback_speed() -> f64 {
    1.0
}

impl Job {
    pub fn new(
        source_path: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
        filename_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            output_folder: output_folder.into(),
            filename_prefix: filename_prefix.into(),
            output_mode: OutputMode::Video,
            effects: EffectConfig::default(),
            copy_count: 1,
            playback_speed: 1.0,
            copy_mode: CopyMode::Exact,
            fps: None,
            quality: None,
            codec: None,
            bitrate: None,
            start_time: None,
            end_time: None,
            sampling: SamplingBands::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            AppError::invalid_job(format!("{}: {}", path.display(), e))
        })
    }

    /// Checks that do not touch the filesystem.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.copy_count < 1 {
            return Err(AppError::invalid_job("copyCount must be at least 1"));
        }
        if !(self.playback_speed.is_finite() && self.playback_speed > 0.0) {
            return Err(AppError::invalid_job("playbackSpeed must be greater than 0"));
        }
        if let Some(fps) = self.fps
            && !(fps.is_finite() && fps > 0.0)
        {
            return Err(AppError::invalid_job("fps must be greater than 0"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && end <= start
        {
            return Err(AppError::invalid_job("endTime must be after startTime"));
        }
        Ok(())
    }

    pub fn effective_codec(&self) -> &str {
        self.codec
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CODEC)
    }

    pub fn effective_bitrate(&self) -> u32 {
        self.bitrate.filter(|&b| b > 0).unwrap_or(DEFAULT_BITRATE_KBPS)
    }

    pub fn effective_gif_fps(&self) -> f64 {
        self.fps.unwrap_or(DEFAULT_GIF_FPS)
    }

    pub fn effective_video_fps(&self, source_fps: f64) -> f64 {
        self.fps.unwrap_or(source_fps)
    }

    pub fn effective_quality(&self) -> u32 {
        self.quality.unwrap_or(DEFAULT_GIF_QUALITY).min(100)
    }

    /// Output file name (without folder) for copy `copy_index` (0-based).
    pub fn output_file_name(&self, copy_index: u32, unique_id: &str) -> String {
        let ext = self.output_mode.extension();
        if self.copy_count > 1 {
            format!(
                "{}_copy_{:03}_{}.{}",
                self.filename_prefix,
                copy_index + 1,
                unique_id,
                ext
            )
        } else {
            format!("{}_{}.{}", self.filename_prefix, unique_id, ext)
        }
    }
}
