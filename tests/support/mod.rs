#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use reels_washer_core::error::AppError;
use reels_washer_core::ffmpeg::{MediaEngine, MediaInfo};
use reels_washer_core::job::Job;
use reels_washer_core::pipeline::WashCallbacks;

/// Scripted stand-in for ffmpeg/ffprobe.
///
/// * frame extraction (last arg ends with the frame pattern) writes `frame_count` PNGs
/// * concat reassembly keeps a copy of the list and writes a small placeholder file
/// * everything else copies the `-i` input to the last argument
/// * a call whose args contain any string in `fail_on` fails without output
pub struct FakeEngine {
    pub info: MediaInfo,
    pub frame_count: usize,
    pub frame_size: (u32, u32),
    pub fail_on: Vec<String>,
    calls: Mutex<Vec<Vec<String>>>,
    concat_lists: Mutex<Vec<String>>,
    probes: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            info: MediaInfo {
                duration_seconds: 10.0,
                width: 1280,
                height: 720,
                codec_name: Some("h264".to_string()),
                fps: 30.0,
            },
            frame_count: 5,
            frame_size: (32, 24),
            fail_on: Vec::new(),
            calls: Mutex::new(Vec::new()),
            concat_lists: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_frames(mut self, count: usize) -> Self {
        self.frame_count = count;
        self
    }

    pub fn with_info(mut self, info: MediaInfo) -> Self {
        self.info = info;
        self
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of `file` entries in each concat list handed to the encoder.
    pub fn concat_entry_counts(&self) -> Vec<usize> {
        self.concat_lists
            .lock()
            .iter()
            .map(|list| list.lines().filter(|l| l.starts_with("file '")).count())
            .collect()
    }

    /// Value of the first `-vf` argument containing `needle`.
    pub fn filter_containing(&self, needle: &str) -> Option<String> {
        self.calls().into_iter().find_map(|args| {
            args.windows(2)
                .find(|pair| pair[0] == "-vf" && pair[1].contains(needle))
                .map(|pair| pair[1].clone())
        })
    }

    fn write_frames(&self, pattern: &str) -> Result<(), AppError> {
        let dir = Path::new(pattern)
            .parent()
            .ok_or_else(|| AppError::from("frame pattern without folder"))?;
        let (w, h) = self.frame_size;
        for n in 1..=self.frame_count {
            let img = image::RgbImage::from_fn(w, h, |x, y| {
                image::Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, (n * 13 % 256) as u8])
            });
            img.save(dir.join(format!("frame_{:06}.png", n)))?;
        }
        Ok(())
    }
}

impl MediaEngine for FakeEngine {
    fn transcode(&self, args: &[String]) -> Result<(), AppError> {
        self.calls.lock().push(args.to_vec());
        if args
            .iter()
            .any(|a| self.fail_on.iter().any(|needle| a.contains(needle.as_str())))
        {
            return Err(AppError::ffmpeg_failed(1, "Error: simulated failure"));
        }
        let output = args.last().ok_or_else(|| AppError::from("missing output"))?;
        if output.ends_with("frame_%06d.png") {
            return self.write_frames(output);
        }
        let input = args
            .windows(2)
            .find(|pair| pair[0] == "-i")
            .map(|pair| pair[1].clone())
            .ok_or_else(|| AppError::from("missing input"))?;
        if args.windows(2).any(|pair| pair[0] == "-f" && pair[1] == "concat") {
            self.concat_lists.lock().push(fs::read_to_string(&input)?);
            fs::write(output, b"reassembled")?;
            return Ok(());
        }
        fs::copy(input, output)?;
        Ok(())
    }

    fn probe(&self, _path: &Path) -> MediaInfo {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.info.clone()
    }
}

pub struct WashEnv {
    pub dir: tempfile::TempDir,
    pub source: PathBuf,
    pub out: PathBuf,
}

impl WashEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source.mp4");
        fs::write(&source, b"source video bytes").expect("write source");
        let out = dir.path().join("out");
        Self { dir, source, out }
    }

    pub fn job(&self, prefix: &str) -> Job {
        Job::new(&self.source, &self.out, prefix)
    }

    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.out)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Callbacks that record every status message.
pub fn recording_callbacks() -> (WashCallbacks, Arc<Mutex<Vec<String>>>) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let callbacks = WashCallbacks {
        on_progress: None,
        on_status: Some(Arc::new(move |m: &str| sink.lock().push(m.to_string()))),
    };
    (callbacks, messages)
}

/// Temp folder holding a real `testsrc` clip rendered by the discovered ffmpeg.
pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = reels_washer_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_test_video(&self, name: &str, duration_secs: f32) -> PathBuf {
        let output_path = self.path(name);
        let status = std::process::Command::new(&self.ffmpeg)
            .args([
                "-loglevel",
                "error",
                "-y",
                "-f",
                "lavfi",
                "-i",
                &format!("testsrc=duration={}:size=320x240:rate=30", duration_secs),
                "-f",
                "lavfi",
                "-i",
                &format!("sine=frequency=440:duration={}", duration_secs),
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                output_path.to_string_lossy().as_ref(),
            ])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}
