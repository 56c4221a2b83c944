//! Per-copy scratch artifacts in the output folder.
//!
//! `CopyScratch` hands out every intermediate path a copy uses and deletes all of
//! them when dropped, so success, failure, cancellation and panics unwind the same
//! way. Deletion failures are logged and never escalate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static STALE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(temp_(clipped|flipped|color|hue|blur|resize|noise|fps|audio)_\d+\.mp4|.+_\d{8}-\d{4}_temp\.(mp4|gif))$",
    )
    .expect("invalid stale file regex")
});
static STALE_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^temp_frames_\d+$").expect("invalid stale dir regex"));

pub struct CopyScratch {
    folder: PathBuf,
    copy_index: u32,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl CopyScratch {
    pub fn new(folder: impl Into<PathBuf>, copy_index: u32) -> Self {
        Self {
            folder: folder.into(),
            copy_index,
            files: Vec::new(),
            dirs: Vec::new(),
        }
    }

    /// `temp_{tag}_{copy}.mp4` in the output folder, tracked for deletion.
    pub fn temp_file(&mut self, tag: &str) -> PathBuf {
        let path = self
            .folder
            .join(format!("temp_{}_{}.mp4", tag, self.copy_index));
        self.track(path.clone());
        path
    }

    /// Creates `temp_frames_{copy}/` and tracks it for recursive deletion.
    pub fn frames_dir(&mut self) -> io::Result<PathBuf> {
        let dir = self
            .folder
            .join(format!("temp_frames_{}", self.copy_index));
        fs::create_dir_all(&dir)?;
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir.clone());
        }
        Ok(dir)
    }

    pub fn track(&mut self, path: PathBuf) {
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    /// Stop tracking `path`, e.g. once it has become a final output.
    pub fn release(&mut self, path: &Path) {
        self.files.retain(|p| p != path);
    }

    pub fn is_scratch(&self, path: &Path) -> bool {
        self.files.iter().any(|p| p == path)
    }

    pub fn copy_index(&self) -> u32 {
        self.copy_index
    }

    pub fn cleanup(&mut self) {
        for path in self.files.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    target: "reels_washer::ffmpeg::temp",
                    "Failed to remove temp file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        for dir in self.dirs.drain(..) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    target: "reels_washer::ffmpeg::temp",
                    "Failed to remove temp dir {}: {}",
                    dir.display(),
                    e
                ),
            }
        }
    }
}

impl Drop for CopyScratch {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Remove leftovers of an interrupted run from `folder`. Only names this crate
/// produces are touched. Returns how many entries were removed.
pub fn cleanup_stale_artifacts(folder: &Path) -> usize {
    let Ok(entries) = fs::read_dir(folder) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();
        let result = if path.is_dir() && STALE_DIR_RE.is_match(name) {
            fs::remove_dir_all(&path)
        } else if path.is_file() && STALE_FILE_RE.is_match(name) {
            fs::remove_file(&path)
        } else {
            continue;
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => log::warn!(
                target: "reels_washer::ffmpeg::temp",
                "Failed to remove stale artifact {}: {}",
                path.display(),
                e
            ),
        }
    }
    if removed > 0 {
        log::info!(
            target: "reels_washer::ffmpeg::temp",
            "Removed {} stale artifact(s) from {}",
            removed,
            folder.display()
        );
    }
    removed
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Rename, falling back to copy + delete across filesystems.
pub fn move_file(source: &Path, dest: &Path) -> Result<(), AppError> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            if is_cross_device_rename_error(&e) {
                fs::copy(source, dest)?;
                fs::remove_file(source)?;
                return Ok(());
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_removes_everything_it_handed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (file_a, file_b, frames);
        {
            let mut scratch = CopyScratch::new(dir.path(), 2);
            file_a = scratch.temp_file("color");
            file_b = scratch.temp_file("noise");
            frames = scratch.frames_dir().expect("frames dir");
            fs::write(&file_a, b"a").expect("write a");
            fs::write(&file_b, b"b").expect("write b");
            fs::write(frames.join("frame_000001.png"), b"png").expect("write frame");
            assert!(scratch.is_scratch(&file_a));
        }
        assert_eq!(file_a.file_name().unwrap(), "temp_color_2.mp4");
        assert!(!file_a.exists());
        assert!(!file_b.exists());
        assert!(!frames.exists());
    }

    #[test]
    fn released_paths_survive_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kept;
        {
            let mut scratch = CopyScratch::new(dir.path(), 0);
            kept = scratch.temp_file("fps");
            fs::write(&kept, b"x").expect("write");
            scratch.release(&kept);
        }
        assert!(kept.exists());
    }

    #[test]
    fn missing_files_are_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scratch = CopyScratch::new(dir.path(), 1);
        let _never_written = scratch.temp_file("blur");
        scratch.cleanup();
        scratch.cleanup();
    }

    #[test]
    fn stale_sweep_only_touches_own_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let own = [
            "temp_clipped_0.mp4",
            "temp_audio_12.mp4",
            "reel_copy_002_12345678-1234_temp.mp4",
        ];
        let foreign = ["temp_notes.txt", "holiday.mp4", "reel_12345678-1234.mp4"];
        for name in own.iter().chain(foreign.iter()) {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        fs::create_dir(dir.path().join("temp_frames_3")).expect("mkdir");
        fs::create_dir(dir.path().join("temp_frames_mine")).expect("mkdir");

        let removed = cleanup_stale_artifacts(dir.path());
        assert_eq!(removed, own.len() + 1);
        for name in own {
            assert!(!dir.path().join(name).exists(), "{name} should be removed");
        }
        for name in foreign {
            assert!(dir.path().join(name).exists(), "{name} should be kept");
        }
        assert!(dir.path().join("temp_frames_mine").exists());
    }

    #[test]
    fn move_file_renames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("a.mp4");
        let dest = dir.path().join("b.mp4");
        fs::write(&src, b"video").expect("write");
        move_file(&src, &dest).expect("move");
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).expect("read"), b"video");
    }
}
