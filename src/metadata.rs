//! Fabricated container metadata.
//!
//! A fresh `SpoofedMetadata` is sampled for every copy. Injection is a stream-copy
//! remux into `<stem>_temp.<ext>` followed by a rename over the original, so the
//! original file is untouched unless the remux succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeDelta, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::ffmpeg::{MediaEngine, build_metadata_remux_args, path_to_string};

pub const ENCODERS: [&str; 10] = [
    "Adobe Premiere Pro 2023",
    "Final Cut Pro 10.6",
    "DaVinci Resolve 18",
    "Handbrake 1.6.1",
    "FFmpeg 5.1.2",
    "VLC media player",
    "Shotcut 22.12",
    "OpenShot 3.0",
    "Blender VSE",
    "Avidemux 2.8",
];

pub const DEVICES: [&str; 9] = [
    "iPhone 14 Pro",
    "Samsung Galaxy S23",
    "Google Pixel 7",
    "Canon EOS R5",
    "Sony A7IV",
    "GoPro Hero 11",
    "DJI Pocket 2",
    "MacBook Pro M2",
    "Windows PC",
];

const CREATION_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpoofedMetadata {
    pub creation_time: String,
    pub encoder: String,
    pub device: String,
    pub software_version: String,
    pub unique_id: String,
    pub timecode: String,
}

impl SpoofedMetadata {
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        let days_ago = rng.random_range(1..=365);
        let created = Utc::now() - TimeDelta::days(days_ago);
        let encoder = ENCODERS.choose(rng).copied().unwrap_or(ENCODERS[0]);
        let device = DEVICES.choose(rng).copied().unwrap_or(DEVICES[0]);
        let software_version = format!(
            "{}.{}.{}",
            rng.random_range(1..=10),
            rng.random_range(0..=99),
            rng.random_range(0..=999)
        );
        let unique_id = format!(
            "{}-{}",
            rng.random_range(10_000_000..=99_999_999),
            rng.random_range(1000..=9999)
        );
        let timecode = format!(
            "{:02}:{:02}:{:02}:{:02}",
            rng.random_range(0..=23),
            rng.random_range(0..=59),
            rng.random_range(0..=59),
            rng.random_range(0..=29)
        );
        Self {
            creation_time: created.format(CREATION_TIME_FORMAT).to_string(),
            encoder: encoder.to_string(),
            device: device.to_string(),
            software_version,
            unique_id,
            timecode,
        }
    }

    /// First word of the device name, or "Unknown" for single-word names.
    pub fn device_manufacturer(&self) -> &str {
        match self.device.split_once(' ') {
            Some((maker, _)) => maker,
            None => "Unknown",
        }
    }

    pub fn year(&self) -> &str {
        self.creation_time.get(..4).unwrap_or("")
    }

    pub fn date(&self) -> &str {
        self.creation_time.get(..10).unwrap_or("")
    }

    /// Tags embedded in every video output.
    pub fn video_tags(&self) -> Vec<(String, String)> {
        vec![
            ("creation_time".into(), self.creation_time.clone()),
            ("encoder".into(), self.encoder.clone()),
            ("title".into(), format!("Video_{}", self.unique_id)),
            ("comment".into(), format!("Created with {}", self.device)),
            (
                "software".into(),
                format!("{} v{}", self.encoder, self.software_version),
            ),
            ("timecode".into(), self.timecode.clone()),
            (
                "device_manufacturer".into(),
                self.device_manufacturer().to_string(),
            ),
            ("device_model".into(), self.device.clone()),
        ]
    }

    /// Second pass of descriptive tags. Album and track numbers are drawn from `rng`.
    pub fn extended_tags<R: Rng>(&self, rng: &mut R) -> Vec<(String, String)> {
        let year = self.year();
        vec![
            ("artist".into(), self.device.clone()),
            (
                "album".into(),
                format!("Video Collection {}", rng.random_range(1..=100)),
            ),
            ("date".into(), year.to_string()),
            ("genre".into(), "Video".into()),
            ("track".into(), rng.random_range(1..=50).to_string()),
            ("copyright".into(), format!("© {} User", year)),
        ]
    }

    pub fn gif_comment(&self) -> String {
        format!(
            "Created with {} using {} on {}",
            self.device,
            self.encoder,
            self.date()
        )
    }
}

/// `<stem>_temp.<ext>` next to `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_temp.{}", stem, ext.to_string_lossy()),
        None => format!("{}_temp", stem),
    };
    path.with_file_name(name)
}

fn remux_with_tags(engine: &dyn MediaEngine, path: &Path, tags: &[(String, String)]) -> bool {
    let temp = temp_path_for(path);
    let args = build_metadata_remux_args(&path_to_string(path), &path_to_string(&temp), tags);

    let outcome = match engine.transcode(&args) {
        Ok(()) if temp.exists() => fs::rename(&temp, path).map_err(|e| e.to_string()),
        Ok(()) => Err("remux produced no file".to_string()),
        Err(e) => Err(e.summary()),
    };
    match outcome {
        Ok(()) => true,
        Err(reason) => {
            log::warn!(
                target: "reels_washer::metadata",
                "Metadata not applied to {}: {}",
                path.display(),
                reason
            );
            if let Err(e) = fs::remove_file(&temp)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!(
                    target: "reels_washer::metadata",
                    "Failed to remove {}: {}",
                    temp.display(),
                    e
                );
            }
            false
        }
    }
}

/// Embed the primary spoofed tags into `path` in place.
pub fn apply_metadata(engine: &dyn MediaEngine, path: &Path, metadata: &SpoofedMetadata) -> bool {
    remux_with_tags(engine, path, &metadata.video_tags())
}

/// Embed the descriptive second-pass tags into `path` in place.
pub fn apply_extended_metadata<R: Rng>(
    engine: &dyn MediaEngine,
    path: &Path,
    metadata: &SpoofedMetadata,
    rng: &mut R,
) -> bool {
    remux_with_tags(engine, path, &metadata.extended_tags(rng))
}
