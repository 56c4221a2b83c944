//! FFmpeg process spawning.
//!
//! Every stage call is a synchronous child process from the worker's point of view.
//! Stderr is drained on a helper thread into a bounded buffer so a chatty encode
//! cannot block on a full pipe or grow memory without limit.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::error::stderr_tail;
use crate::error::AppError;

/// Keep only the last N bytes of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

fn collect_stderr<R: Read + Send + 'static>(
    reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let mut guard = buffer.lock();
            guard.extend_from_slice(&line_buf);
            if guard.len() > MAX_STDERR_BYTES {
                let excess = guard.len() - MAX_STDERR_BYTES;
                guard.drain(..excess);
            }
            drop(guard);
            line_buf.clear();
        }
    })
}

/// Run `program` with `args` and block until it exits.
///
/// Non-zero exit maps to `AppError::FfmpegFailed` carrying the captured stderr tail;
/// spawn failures map to code -1.
pub fn run_ffmpeg_blocking(program: &Path, args: &[String]) -> Result<(), AppError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "reels_washer::ffmpeg::runner",
        "Spawning {}: input={:?}, output={:?}",
        program.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn {}: {}", program.display(), e))?;

    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
    let stderr_handle = match child.stderr.take() {
        Some(stderr) => collect_stderr(stderr, Arc::clone(&stderr_buffer)),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stderr"));
        }
    };

    let status = child.wait()?;
    let _ = stderr_handle.join();

    let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();
    if status.success() {
        log::debug!(
            target: "reels_washer::ffmpeg::runner",
            "{} completed successfully",
            program.display()
        );
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    log::error!(
        target: "reels_washer::ffmpeg::runner",
        "{} failed (code={}): {}",
        program.display(),
        code,
        stderr_tail(&stderr_str, 3)
    );
    Err(AppError::ffmpeg_failed(code, stderr_str))
}
