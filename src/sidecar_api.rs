use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::{FfmpegEngine, MediaEngine, cleanup_stale_artifacts, discovery, path_to_string};
use crate::job::{EffectConfig, Job, QuickWash};
use crate::pipeline::{WashCallbacks, Washer};

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    pub output_modes: Vec<&'static str>,
    pub presets: Vec<&'static str>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInspectResult {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
    pub size: u64,
    pub size_mb: f64,
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    let ffmpeg_path = discovery::get_ffmpeg_path().ok().map(path_to_string);
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg_available: ffmpeg_path.is_some(),
        ffmpeg_path,
        output_modes: vec!["video", "gif"],
        presets: vec!["normal", "deep", "extreme"],
    }
}

pub fn inspect_media(engine: &dyn MediaEngine, path: &Path) -> Result<MediaInspectResult, AppError> {
    let size = fs::metadata(path)
        .map_err(|e| AppError::invalid_job(format!("Cannot read {}: {}", path.display(), e)))?
        .len();
    let info = engine.probe(path);
    Ok(MediaInspectResult {
        duration: info.duration_seconds,
        width: info.width,
        height: info.height,
        fps: info.fps,
        codec_name: info.codec_name,
        size,
        size_mb: size as f64 / 1024.0 / 1024.0,
    })
}

pub fn quick_wash_preset(kind: QuickWash) -> EffectConfig {
    EffectConfig::preset(kind)
}

/// Sweep leftovers from an interrupted run in the job's output folder, then build a
/// washer for it. The caller decides which thread runs it.
pub fn prepare_wash(
    job: Job,
    engine: Arc<dyn MediaEngine>,
    callbacks: WashCallbacks,
) -> Washer {
    if job.output_folder.is_dir() {
        cleanup_stale_artifacts(&job.output_folder);
    }
    Washer::new(job, engine).with_callbacks(callbacks)
}

/// Engine used by the sidecar. Fails when ffmpeg cannot be located.
pub fn default_engine() -> Result<Arc<dyn MediaEngine>, AppError> {
    let engine = FfmpegEngine::new();
    engine.ensure_available()?;
    Ok(Arc::new(engine))
}

pub fn load_job(path: PathBuf) -> Result<Job, AppError> {
    Job::from_json_file(&path)
}
