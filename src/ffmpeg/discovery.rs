//! Locate the `ffmpeg` and `ffprobe` executables.
//!
//! Order: `FFMPEG_PATH` env override, common install locations, then PATH lookup
//! via `which`/`where`. `ffprobe` is expected next to `ffmpeg`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::AppError;

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn find_in_path(program: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Ok(env_path) = std::env::var("FFMPEG_PATH") {
        let p = PathBuf::from(&env_path);
        if p.exists() {
            log::debug!(
                target: "reels_washer::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "reels_washer::ffmpeg::discovery",
            "FFMPEG_PATH={} does not exist, falling back to discovery",
            env_path
        );
    }

    if let Some(path) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "reels_washer::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            path.display()
        );
        return Ok(path);
    }

    if let Some(p) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "reels_washer::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "reels_washer::ffmpeg::discovery",
        "FFmpeg not found in FFMPEG_PATH, common locations or PATH"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// FFmpeg path, resolved once per process.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let resolved = resolve_ffmpeg_path()?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| resolved).as_path())
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(target_os = "windows") { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    // `file_stem` would cut version suffixes such as `ffmpeg-7.1` at the last dot.
    let name = ffmpeg_path
        .file_name()
        .and_then(|s| s.to_str())
        .map(|n| n.strip_suffix(exe).unwrap_or(n));
    if let Some(suffix) = name
        .and_then(|name| name.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    find_in_path("ffprobe").ok_or_else(|| {
        AppError::FfmpegNotFound(format!(
            "ffprobe not found next to {} or in PATH",
            ffmpeg.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_plain_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/usr/bin/ffmpeg"));
        assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_suffixed_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/opt/tools/ffmpeg-7.1"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/tools/ffprobe-7.1"),
                PathBuf::from("/opt/tools/ffprobe"),
            ]
        );
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_keep_dotted_version() {
        let candidates = ffprobe_candidates(Path::new("/opt/ffmpeg-6.0.1"));
        assert_eq!(candidates[0], PathBuf::from("/opt/ffprobe-6.0.1"));
    }

    #[test]
    fn ffprobe_candidates_without_parent_is_empty() {
        assert!(ffprobe_candidates(Path::new("")).is_empty());
    }
}
