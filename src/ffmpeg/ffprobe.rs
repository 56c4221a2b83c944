//! FFprobe-based media inspection.
//!
//! Queries the first video stream and the container duration in ffprobe's flat
//! `key=value` output. Missing or `N/A` values fall back to defaults; the caller
//! always gets a record back.

use std::path::Path;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Frame rate assumed when the source does not report a usable one.
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
    pub fps: f64,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration_seconds: 0.0,
            width: 0,
            height: 0,
            codec_name: None,
            fps: DEFAULT_FPS,
        }
    }
}

fn present(value: &str) -> Option<&str> {
    let v = value.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("N/A") {
        None
    } else {
        Some(v)
    }
}

/// Parses `30000/1001`, `25/1` or a bare number. Zero or negative rates are rejected.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then(|| (rate * 100.0).round() / 100.0)
}

/// Parse `ffprobe -of default=noprint_wrappers=1` output. First occurrence of a key wins.
pub fn parse_probe_output(text: &str) -> MediaInfo {
    let mut info = MediaInfo::default();
    let mut seen_duration = false;
    let mut seen_width = false;
    let mut seen_height = false;
    let mut seen_rate = false;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some(value) = present(value) else {
            continue;
        };
        match key.trim() {
            "duration" if !seen_duration => {
                if let Ok(d) = value.parse::<f64>() {
                    info.duration_seconds = d.max(0.0);
                    seen_duration = true;
                }
            }
            "width" if !seen_width => {
                if let Ok(w) = value.parse() {
                    info.width = w;
                    seen_width = true;
                }
            }
            "height" if !seen_height => {
                if let Ok(h) = value.parse() {
                    info.height = h;
                    seen_height = true;
                }
            }
            "codec_name" if info.codec_name.is_none() => {
                info.codec_name = Some(value.to_string());
            }
            "avg_frame_rate" if !seen_rate => {
                if let Some(fps) = parse_frame_rate(value) {
                    info.fps = fps;
                    seen_rate = true;
                }
            }
            _ => {}
        }
    }
    info
}

/// Run ffprobe on `path`. Any failure degrades to `MediaInfo::default()`.
pub fn probe_media(ffprobe: &Path, path: &Path) -> MediaInfo {
    let path_str = path.to_string_lossy();
    log::debug!(
        target: "reels_washer::ffmpeg::ffprobe",
        "probe_media: path={}",
        path_str
    );

    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "format=duration:stream=width,height,codec_name,avg_frame_rate",
        "-of",
        "default=noprint_wrappers=1",
        path_str.as_ref(),
    ]);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) => {
            log::warn!(
                target: "reels_washer::ffmpeg::ffprobe",
                "Failed to run ffprobe on {}: {}",
                path_str,
                e
            );
            return MediaInfo::default();
        }
    };
    if !output.status.success() {
        log::warn!(
            target: "reels_washer::ffmpeg::ffprobe",
            "ffprobe failed on {}: {}",
            path_str,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return MediaInfo::default();
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}
