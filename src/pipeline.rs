//! Wash orchestrator: per-copy sampling, whole-file stage chain, fast/slow branch,
//! cleanup, progress and cancellation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::{StdRng, ThreadRng};
use serde::Serialize;

use crate::error::AppError;
use crate::ffmpeg::{CopyScratch, MediaEngine, MediaInfo, move_file};
use crate::frames::{
    Reassembly, apply_frame_effects, extract_frames, reassemble_gif, reassemble_video,
    remove_partial, resample_for_speed,
};
use crate::fx::FrameEffectEngine;
use crate::job::{EffectConfig, Job, OutputMode};
use crate::metadata::{SpoofedMetadata, apply_extended_metadata, apply_metadata};
use crate::sampler::{effects_for_copy, plan_stage, variation_seed};
use crate::stage::{StageKind, apply_stage};

/// Sticky stop flag shared between the caller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the owner can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    #[serde(rename_all = "camelCase")]
    Running {
        copy_index: u32,
    },
    Completed,
    Cancelled,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed(_)
        )
    }
}

pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Hooks invoked on the worker thread. `on_progress(done, total)` fires per frame in
/// the frame path, once while frame effects run and again while frames are encoded
/// to GIF; `on_status` fires at every stage transition.
#[derive(Clone, Default)]
pub struct WashCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_status: Option<StatusCallback>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CopyOutcome {
    Produced(PathBuf),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub state: RunState,
    pub succeeded: u32,
    pub requested: u32,
    pub outputs: Vec<PathBuf>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.succeeded >= 1
    }
}

pub struct Washer {
    job: Job,
    engine: Arc<dyn MediaEngine>,
    callbacks: WashCallbacks,
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
}

/// Per-copy sampling state. The seeded stream drives effect values; `independent`
/// covers clipping, flip and metadata draws.
struct CopyContext {
    index: u32,
    seed: u64,
    rng: StdRng,
    independent: ThreadRng,
    effects: EffectConfig,
    metadata: SpoofedMetadata,
    output: PathBuf,
}

impl Washer {
    pub fn new(job: Job, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            job,
            engine,
            callbacks: WashCallbacks::default(),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(RunState::Idle)),
        }
    }

    pub fn with_callbacks(mut self, callbacks: WashCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Share an externally owned stop flag.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.lock().clone()
    }

    pub fn request_stop(&self) {
        self.cancel.request_stop();
    }

    /// Run on a dedicated worker thread.
    pub fn spawn(self) -> Result<WashHandle, AppError> {
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        let thread = thread::Builder::new()
            .name("reels-washer".to_string())
            .spawn(move || self.run())?;
        Ok(WashHandle {
            cancel,
            state,
            thread,
        })
    }

    /// Run the whole generation on the calling thread.
    pub fn run(&self) -> RunReport {
        let requested = self.job.copy_count;
        if let Err(e) = self.prepare() {
            let reason = e.to_string();
            log::error!(target: "reels_washer::pipeline", "Wash aborted: {}", reason);
            self.set_state(RunState::Failed(reason.clone()));
            self.status(&format!("Error: {}", reason));
            self.cancel.reset();
            return self.report(0, requested, Vec::new());
        }

        log::info!(
            target: "reels_washer::pipeline",
            "Washing {} into {} copies ({:?}, {:?})",
            self.job.source_path.display(),
            requested,
            self.job.output_mode,
            self.job.copy_mode
        );

        let mut outputs = Vec::new();
        let mut cancelled = false;
        for index in 0..requested {
            if self.cancel.is_stopped() {
                cancelled = true;
                break;
            }
            self.set_state(RunState::Running { copy_index: index });
            match self.wash_copy(index) {
                CopyOutcome::Produced(path) => {
                    log::info!(
                        target: "reels_washer::pipeline",
                        "Copy {}/{} written to {}",
                        index + 1,
                        requested,
                        path.display()
                    );
                    outputs.push(path);
                }
                CopyOutcome::Failed(reason) => {
                    log::warn!(
                        target: "reels_washer::pipeline",
                        "Copy {}/{} failed: {}",
                        index + 1,
                        requested,
                        reason
                    );
                    self.status(&format!(
                        "Copy {}/{} failed: {}",
                        index + 1,
                        requested,
                        reason
                    ));
                }
                CopyOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        let succeeded = outputs.len() as u32;
        if cancelled {
            self.set_state(RunState::Cancelled);
            self.status(&format!(
                "Cancelled. Generated {}/{} files before stopping",
                succeeded, requested
            ));
        } else {
            self.set_state(RunState::Completed);
            self.status(&format!(
                "Completed! Generated {}/{} files with spoofed metadata",
                succeeded, requested
            ));
        }
        // A stop applies to one run; the next `run` starts clean.
        self.cancel.reset();
        self.report(succeeded, requested, outputs)
    }

    fn prepare(&self) -> Result<(), AppError> {
        self.job.validate()?;
        if !self.job.source_path.is_file() {
            return Err(AppError::invalid_job(format!(
                "Source file not found: {}",
                self.job.source_path.display()
            )));
        }
        fs::create_dir_all(&self.job.output_folder).map_err(|e| {
            AppError::invalid_job(format!(
                "Cannot create output folder {}: {}",
                self.job.output_folder.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn wash_copy(&self, index: u32) -> CopyOutcome {
        let total = self.job.copy_count;
        self.status(&format!("Processing copy {}/{}...", index + 1, total));

        let seed = variation_seed(index);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut independent = rand::rng();
        let effects = effects_for_copy(
            &self.job.effects,
            self.job.copy_mode,
            &self.job.sampling.variation,
            &mut rng,
            &mut independent,
        );
        let metadata = SpoofedMetadata::sample(&mut independent);
        let output = self
            .job
            .output_folder
            .join(self.job.output_file_name(index, &metadata.unique_id));
        let mut ctx = CopyContext {
            index,
            seed,
            rng,
            independent,
            effects,
            metadata,
            output,
        };

        // Dropped on every return path below, deleting all intermediates.
        let mut scratch = CopyScratch::new(&self.job.output_folder, index);
        let current = self.run_whole_file_stages(&mut ctx, &mut scratch);

        let needs_frames =
            self.job.output_mode == OutputMode::Gif || ctx.effects.frame_level_enabled();
        if needs_frames {
            self.slow_path(&mut ctx, &mut scratch, current)
        } else {
            self.fast_path(&mut ctx, &mut scratch, current)
        }
    }

    fn run_whole_file_stages(&self, ctx: &mut CopyContext, scratch: &mut CopyScratch) -> PathBuf {
        let mut current = self.job.source_path.clone();
        for kind in StageKind::ORDER {
            let info = if kind.needs_probe() && kind.is_enabled(&ctx.effects) {
                self.engine.probe(&current)
            } else {
                MediaInfo::default()
            };
            let Some(effect) = plan_stage(
                kind,
                &ctx.effects,
                &self.job.sampling.whole_file,
                &info,
                &mut ctx.rng,
                &mut ctx.independent,
            ) else {
                continue;
            };
            self.status(&format!(
                "Applying {} to copy {}/{}...",
                stage_label(kind),
                ctx.index + 1,
                self.job.copy_count
            ));
            let out = scratch.temp_file(kind.tag());
            let result = apply_stage(self.engine.as_ref(), &effect, &current, &out);
            if let Some(reason) = &result.failure {
                self.status(&format!(
                    "Skipped {} for copy {}/{}: {}",
                    stage_label(kind),
                    ctx.index + 1,
                    self.job.copy_count,
                    reason
                ));
            }
            if result.produced_new_file {
                current = result.output_path;
            }
        }
        current
    }

    fn fast_path(
        &self,
        ctx: &mut CopyContext,
        scratch: &mut CopyScratch,
        current: PathBuf,
    ) -> CopyOutcome {
        let placed = if scratch.is_scratch(&current) {
            let moved = move_file(&current, &ctx.output);
            if moved.is_ok() {
                scratch.release(&current);
            }
            moved
        } else {
            fs::copy(&current, &ctx.output)
                .map(|_| ())
                .map_err(AppError::from)
        };
        if let Err(e) = placed {
            return CopyOutcome::Failed(format!(
                "could not write {}: {}",
                ctx.output.display(),
                e
            ));
        }

        self.status(&format!(
            "Applying metadata to copy {}/{}...",
            ctx.index + 1,
            self.job.copy_count
        ));
        let engine = self.engine.as_ref();
        apply_metadata(engine, &ctx.output, &ctx.metadata);
        apply_extended_metadata(engine, &ctx.output, &ctx.metadata, &mut ctx.independent);
        CopyOutcome::Produced(ctx.output.clone())
    }

    fn slow_path(
        &self,
        ctx: &mut CopyContext,
        scratch: &mut CopyScratch,
        current: PathBuf,
    ) -> CopyOutcome {
        let total = self.job.copy_count;
        let frames_dir = match scratch.frames_dir() {
            Ok(dir) => dir,
            Err(e) => return CopyOutcome::Failed(format!("cannot create frame folder: {}", e)),
        };

        self.status(&format!(
            "Extracting frames for copy {}/{}...",
            ctx.index + 1,
            total
        ));
        let (frames, source_fps) = extract_frames(
            self.engine.as_ref(),
            &current,
            self.job.start_time,
            self.job.end_time,
            &frames_dir,
        );
        if self.cancel.is_stopped() {
            return CopyOutcome::Cancelled;
        }
        if frames.is_empty() {
            return CopyOutcome::Failed("no frames extracted".to_string());
        }

        let mut fx = FrameEffectEngine::new(&ctx.effects, ctx.seed);
        let frames = if fx.is_active() {
            self.status(&format!(
                "Applying frame effects to copy {}/{} ({} frames)...",
                ctx.index + 1,
                total,
                frames.len()
            ));
            match apply_frame_effects(frames, &mut fx, &self.cancel, |done, n| {
                self.progress(done, n)
            }) {
                Ok(processed) => processed,
                Err(AppError::Cancelled) => return CopyOutcome::Cancelled,
                Err(e) => return CopyOutcome::Failed(e.to_string()),
            }
        } else {
            frames
        };
        let frames = resample_for_speed(frames, self.job.playback_speed);

        self.status(&format!(
            "Reassembling copy {}/{}...",
            ctx.index + 1,
            total
        ));
        let written = match self.job.output_mode {
            OutputMode::Gif => reassemble_gif(
                &frames,
                self.job.effective_gif_fps(),
                self.job.effective_quality(),
                &ctx.metadata,
                &ctx.output,
                &self.cancel,
                |done, n| self.progress(done, n),
            ),
            OutputMode::Video => reassemble_video(
                self.engine.as_ref(),
                &frames,
                self.job.effective_video_fps(source_fps),
                self.job.effective_codec(),
                self.job.effective_bitrate(),
                &ctx.metadata,
                &frames_dir,
                &ctx.output,
                &self.cancel,
            ),
        };
        match written {
            Reassembly::Written => {}
            Reassembly::Cancelled => return CopyOutcome::Cancelled,
            Reassembly::Failed => {
                remove_partial(&ctx.output);
                return CopyOutcome::Failed("reassembly failed".to_string());
            }
        }

        if self.job.output_mode == OutputMode::Video {
            self.status(&format!(
                "Applying metadata to copy {}/{}...",
                ctx.index + 1,
                total
            ));
            apply_extended_metadata(
                self.engine.as_ref(),
                &ctx.output,
                &ctx.metadata,
                &mut ctx.independent,
            );
        }
        CopyOutcome::Produced(ctx.output.clone())
    }

    fn progress(&self, done: usize, total: usize) {
        if let Some(cb) = &self.callbacks.on_progress {
            cb(done, total);
        }
    }

    fn status(&self, message: &str) {
        log::info!(target: "reels_washer::pipeline", "{}", message);
        if let Some(cb) = &self.callbacks.on_status {
            cb(message);
        }
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    fn report(&self, succeeded: u32, requested: u32, outputs: Vec<PathBuf>) -> RunReport {
        RunReport {
            state: self.state(),
            succeeded,
            requested,
            outputs,
        }
    }
}

fn stage_label(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Clip => "clipping",
        StageKind::Flip => "flip",
        StageKind::Color => "color adjustment",
        StageKind::Hue => "hue shift",
        StageKind::Blur => "blur",
        StageKind::Resize => "resize",
        StageKind::Noise => "noise",
        StageKind::Fps => "frame rate change",
        StageKind::Audio => "audio fingerprint change",
    }
}

/// Handle to a run started with `Washer::spawn`.
pub struct WashHandle {
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
    thread: thread::JoinHandle<RunReport>,
}

impl WashHandle {
    pub fn request_stop(&self) {
        self.cancel.request_stop();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> RunReport {
        match self.thread.join() {
            Ok(report) => report,
            Err(_) => {
                let reason = "wash worker panicked".to_string();
                *self.state.lock() = RunState::Failed(reason.clone());
                RunReport {
                    state: RunState::Failed(reason),
                    succeeded: 0,
                    requested: 0,
                    outputs: Vec::new(),
                }
            }
        }
    }
}
