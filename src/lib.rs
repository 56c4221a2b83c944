pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod fx;
pub mod job;
pub mod metadata;
pub mod pipeline;
pub mod sampler;
pub mod sidecar_api;
pub mod stage;

pub use error::AppError;
pub use ffmpeg::{FfmpegEngine, MediaEngine, MediaInfo};
pub use job::{CopyMode, EffectConfig, Job, OutputMode, QuickWash};
pub use pipeline::{CancellationToken, RunReport, RunState, WashCallbacks, WashHandle, Washer};
