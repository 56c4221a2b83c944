//! Frame extraction and reassembly.
//!
//! Frames are numbered PNG stills in a per-copy scratch directory. Reassembly goes
//! back to MP4 through the concat demuxer, or to an animated GIF encoded in-process.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use gif::{AnyExtension, Encoder, Frame, Repeat};
use regex::Regex;

use crate::error::AppError;
use crate::ffmpeg::{MediaEngine, build_concat_args, build_extract_args, path_to_string};
use crate::fx::FrameEffectEngine;
use crate::metadata::SpoofedMetadata;
use crate::pipeline::CancellationToken;

pub const FRAME_PATTERN: &str = "frame_%06d.png";
pub const CONCAT_LIST_NAME: &str = "file_list.txt";
const GIF_COMMENT_LABEL: u8 = 0xFE;
const GIF_SUB_BLOCK_MAX: usize = 255;

/// How a reassembly attempt ended. Failures are logged where they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassembly {
    Written,
    Failed,
    Cancelled,
}

static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^frame_(\d+)\.png$").expect("invalid frame regex"));

/// Numbered source frames in `dir`, in presentation order.
pub fn list_frames(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut numbered: Vec<(u64, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = FRAME_RE.captures(name.to_str()?)?;
            let number = caps.get(1)?.as_str().parse().ok()?;
            Some((number, entry.path()))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    numbered.into_iter().map(|(_, p)| p).collect()
}

/// Decode `input` into `dir/frame_%06d.png`, optionally limited to `[start, end)`.
/// Returns the frames and the source frame rate; an empty list on failure.
pub fn extract_frames(
    engine: &dyn MediaEngine,
    input: &Path,
    start: Option<f64>,
    end: Option<f64>,
    dir: &Path,
) -> (Vec<PathBuf>, f64) {
    let fps = engine.probe(input).fps;
    let window = match (start, end) {
        (_, Some(end)) => Some(end - start.unwrap_or(0.0)),
        _ => None,
    };
    let pattern = path_to_string(&dir.join(FRAME_PATTERN));
    let args = build_extract_args(&path_to_string(input), start, window, &pattern);

    if let Err(e) = engine.transcode(&args) {
        log::warn!(
            target: "reels_washer::frames",
            "Frame extraction failed for {}: {}",
            input.display(),
            e.summary()
        );
        return (Vec::new(), fps);
    }
    let frames = list_frames(dir);
    log::debug!(
        target: "reels_washer::frames",
        "Extracted {} frame(s) at {:.2} fps from {}",
        frames.len(),
        fps,
        input.display()
    );
    (frames, fps)
}

fn processed_path(frame: &Path) -> PathBuf {
    let stem = frame
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());
    frame.with_file_name(format!("{}_processed.png", stem))
}

/// Run the frame effects over every frame. Each source frame is deleted once its
/// processed copy exists; a frame that fails to load or save passes through as is.
///
/// Calls `on_frame(done, total)` after each frame. Returns `AppError::Cancelled`
/// as soon as the token is set between frames.
pub fn apply_frame_effects(
    frames: Vec<PathBuf>,
    fx: &mut FrameEffectEngine,
    cancel: &CancellationToken,
    mut on_frame: impl FnMut(usize, usize),
) -> Result<Vec<PathBuf>, AppError> {
    let total = frames.len();
    let mut processed = Vec::with_capacity(total);
    for (index, frame) in frames.into_iter().enumerate() {
        if cancel.is_stopped() {
            return Err(AppError::cancelled());
        }
        let out = processed_path(&frame);
        let result = image::open(&frame)
            .map_err(AppError::from)
            .and_then(|img| fx.apply(img, index).save(&out).map_err(AppError::from));
        match result {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&frame) {
                    log::warn!(
                        target: "reels_washer::frames",
                        "Failed to remove source frame {}: {}",
                        frame.display(),
                        e
                    );
                }
                processed.push(out);
            }
            Err(e) => {
                log::warn!(
                    target: "reels_washer::frames",
                    "Frame {} left unprocessed: {}",
                    frame.display(),
                    e
                );
                processed.push(frame);
            }
        }
        on_frame(index + 1, total);
    }
    Ok(processed)
}

/// Drop or repeat frames so playback runs `speed` times faster.
pub fn resample_for_speed(frames: Vec<PathBuf>, speed: f64) -> Vec<PathBuf> {
    if !(speed.is_finite() && speed > 0.0) || speed == 1.0 {
        return frames;
    }
    if speed > 1.0 {
        let step = (speed.floor() as usize).max(1);
        frames.into_iter().step_by(step).collect()
    } else {
        let repeat = ((1.0 / speed).floor() as usize).max(1);
        frames
            .into_iter()
            .flat_map(|f| std::iter::repeat_n(f, repeat))
            .collect()
    }
}

/// Delete a partial output or scratch file. A missing file is not an error.
pub fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        log::warn!(
            target: "reels_washer::frames",
            "Failed to remove {}: {}",
            path.display(),
            e
        );
    }
}

fn escape_concat_path(path: &Path) -> String {
    path_to_string(path).replace('\'', "'\\''")
}

/// Concat-demuxer list: one `file` line per frame, each shown for `1/fps` seconds.
pub fn write_concat_list(
    frames: &[PathBuf],
    fps: f64,
    list_path: &Path,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let duration = 1.0 / fps;
    let mut writer = BufWriter::new(File::create(list_path)?);
    for frame in frames {
        if cancel.is_stopped() {
            return Err(AppError::cancelled());
        }
        let abs = fs::canonicalize(frame).unwrap_or_else(|_| frame.clone());
        writeln!(writer, "file '{}'", escape_concat_path(&abs))?;
        writeln!(writer, "duration {:.6}", duration)?;
    }
    writer.flush()?;
    Ok(())
}

/// Encode `frames` into an MP4 at `output` with the copy's metadata embedded.
///
/// The token is checked per list entry and again once the encoder returns; a stop
/// at either point discards the output.
#[allow(clippy::too_many_arguments)]
pub fn reassemble_video(
    engine: &dyn MediaEngine,
    frames: &[PathBuf],
    fps: f64,
    codec: &str,
    bitrate_kbps: u32,
    metadata: &SpoofedMetadata,
    list_dir: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Reassembly {
    if frames.is_empty() {
        log::warn!(target: "reels_washer::frames", "No frames to reassemble");
        return Reassembly::Failed;
    }
    if !(fps.is_finite() && fps > 0.0) {
        log::warn!(target: "reels_washer::frames", "Invalid frame rate {}", fps);
        return Reassembly::Failed;
    }
    let list_path = list_dir.join(CONCAT_LIST_NAME);
    match write_concat_list(frames, fps, &list_path, cancel) {
        Ok(()) => {}
        Err(AppError::Cancelled) => {
            remove_partial(&list_path);
            return Reassembly::Cancelled;
        }
        Err(e) => {
            log::warn!(
                target: "reels_washer::frames",
                "Failed to write concat list {}: {}",
                list_path.display(),
                e
            );
            remove_partial(&list_path);
            return Reassembly::Failed;
        }
    }

    let args = build_concat_args(
        &path_to_string(&list_path),
        codec,
        bitrate_kbps,
        fps,
        &metadata.video_tags(),
        &path_to_string(output),
    );
    let result = engine.transcode(&args);
    remove_partial(&list_path);

    match result {
        _ if cancel.is_stopped() => {
            remove_partial(output);
            Reassembly::Cancelled
        }
        Ok(()) if output.exists() => Reassembly::Written,
        Ok(()) => {
            log::warn!(
                target: "reels_washer::frames",
                "Reassembly produced no file at {}",
                output.display()
            );
            Reassembly::Failed
        }
        Err(e) => {
            log::warn!(
                target: "reels_washer::frames",
                "Video reassembly failed: {}",
                e.summary()
            );
            remove_partial(output);
            Reassembly::Failed
        }
    }
}

/// GIF frame delay in centiseconds for `fps`, via whole milliseconds.
pub fn gif_delay_centiseconds(fps: f64) -> u16 {
    let millis = (1000.0 / fps).round();
    (millis / 10.0).round().clamp(1.0, f64::from(u16::MAX)) as u16
}

/// Map quality 0..=100 to the quantizer speed 30..=1 (higher quality, slower).
pub fn gif_speed_for_quality(quality: u32) -> i32 {
    let q = quality.min(100) as i32;
    (30 - q * 29 / 100).clamp(1, 30)
}

fn gif_err(e: gif::EncodingError) -> AppError {
    AppError::Io(io::Error::other(e.to_string()))
}

fn encode_gif(
    frames: &[PathBuf],
    fps: f64,
    quality: u32,
    comment: &str,
    output: &Path,
    cancel: &CancellationToken,
    mut on_frame: impl FnMut(usize, usize),
) -> Result<usize, AppError> {
    let first = image::open(&frames[0])?.to_rgba8();
    let (width, height) = first.dimensions();
    let (Ok(w16), Ok(h16)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(AppError::Io(io::Error::other(format!(
            "{}x{} exceeds GIF dimensions",
            width, height
        ))));
    };
    drop(first);

    let writer = BufWriter::new(File::create(output)?);
    let mut encoder = Encoder::new(writer, w16, h16, &[]).map_err(gif_err)?;
    encoder.set_repeat(Repeat::Infinite).map_err(gif_err)?;
    let blocks: Vec<&[u8]> = comment.as_bytes().chunks(GIF_SUB_BLOCK_MAX).collect();
    encoder.write_raw_extension(AnyExtension(GIF_COMMENT_LABEL), &blocks)?;

    let delay = gif_delay_centiseconds(fps);
    let speed = gif_speed_for_quality(quality);
    let total = frames.len();
    let mut written = 0;
    for (index, path) in frames.iter().enumerate() {
        if cancel.is_stopped() {
            return Err(AppError::cancelled());
        }
        let rgba = match image::open(path) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                log::warn!(
                    target: "reels_washer::frames",
                    "Skipping unreadable frame {}: {}",
                    path.display(),
                    e
                );
                on_frame(index + 1, total);
                continue;
            }
        };
        if rgba.dimensions() != (width, height) {
            log::debug!(
                target: "reels_washer::frames",
                "Skipping frame {} with size {:?}",
                path.display(),
                rgba.dimensions()
            );
            on_frame(index + 1, total);
            continue;
        }
        let mut pixels = rgba.into_raw();
        let mut frame = Frame::from_rgba_speed(w16, h16, &mut pixels, speed);
        frame.delay = delay;
        encoder.write_frame(&frame).map_err(gif_err)?;
        written += 1;
        on_frame(index + 1, total);
    }

    let mut writer = encoder.into_inner()?;
    writer.flush()?;
    Ok(written)
}

/// Encode `frames` into an infinitely looping GIF with a comment naming the spoofed
/// device, encoder and date.
///
/// Calls `on_frame(done, total)` after each source frame and checks the token
/// before each one. A stopped or failed encode leaves no file behind.
pub fn reassemble_gif(
    frames: &[PathBuf],
    fps: f64,
    quality: u32,
    metadata: &SpoofedMetadata,
    output: &Path,
    cancel: &CancellationToken,
    on_frame: impl FnMut(usize, usize),
) -> Reassembly {
    if frames.is_empty() {
        log::warn!(target: "reels_washer::frames", "No frames to encode as GIF");
        return Reassembly::Failed;
    }
    if !(fps.is_finite() && fps > 0.0) {
        log::warn!(target: "reels_washer::frames", "Invalid GIF frame rate {}", fps);
        return Reassembly::Failed;
    }
    let comment = metadata.gif_comment();
    match encode_gif(frames, fps, quality, &comment, output, cancel, on_frame) {
        Ok(0) => {
            log::warn!(target: "reels_washer::frames", "GIF had no usable frames");
            remove_partial(output);
            Reassembly::Failed
        }
        Ok(written) => {
            log::debug!(
                target: "reels_washer::frames",
                "Wrote GIF {} with {} frame(s)",
                output.display(),
                written
            );
            Reassembly::Written
        }
        Err(AppError::Cancelled) => {
            remove_partial(output);
            Reassembly::Cancelled
        }
        Err(e) => {
            log::warn!(
                target: "reels_washer::frames",
                "GIF encoding failed for {}: {}",
                output.display(),
                e
            );
            remove_partial(output);
            Reassembly::Failed
        }
    }
}
