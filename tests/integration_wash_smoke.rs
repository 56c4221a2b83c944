#![cfg(feature = "integration-test-api")]

mod support;

use std::fs;
use std::sync::Arc;

use reels_washer_core::ffmpeg::{FfmpegEngine, MediaEngine};
use reels_washer_core::job::{
    CopyMode, Effect, EffectConfig, Job, OutputMode, QuickWash, Toggle,
};
use reels_washer_core::pipeline::{RunState, Washer};
use serial_test::serial;
use support::IntegrationEnv;

fn washer_for(job: Job) -> Washer {
    let engine = FfmpegEngine::new();
    engine.ensure_available().expect("ffmpeg available");
    Washer::new(job, Arc::new(engine))
}

#[test]
#[serial]
fn quick_wash_video_copies_probe_as_video() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 3.0);
    let out = env.path("out");
    let mut job = Job::new(&input, &out, "smoke");
    job.copy_count = 2;
    job.copy_mode = CopyMode::Variations;
    job.effects = EffectConfig::preset(QuickWash::Normal);

    let report = washer_for(job).run();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.succeeded, 2, "report: {:?}", report);
    for output in &report.outputs {
        let info = FfmpegEngine::new().probe(output);
        assert!(info.duration_seconds > 0.5, "{} too short", output.display());
        assert_eq!(info.width % 2, 0);
        assert_eq!(info.height % 2, 0);
    }
    let leftovers: Vec<_> = fs::read_dir(&out)
        .expect("read out")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with("temp_") || n.contains("_temp."))
        .collect();
    assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
}

#[test]
#[serial]
fn frame_effects_reassemble_to_video() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 1.0);
    let mut job = Job::new(&input, env.path("out"), "frames");
    job.effects.overlay = Effect::on(Default::default());
    job.effects.brightness = Toggle::enabled();

    let report = washer_for(job).run();

    assert_eq!(report.succeeded, 1, "report: {:?}", report);
    let info = FfmpegEngine::new().probe(&report.outputs[0]);
    assert_eq!((info.width, info.height), (320, 240));
}

#[test]
#[serial]
fn gif_output_starts_with_gif_header() {
    let env = IntegrationEnv::new();
    let input = env.with_test_video("input.mp4", 1.0);
    let mut job = Job::new(&input, env.path("out"), "anim");
    job.output_mode = OutputMode::Gif;
    job.fps = Some(5.0);
    job.effects.region = Effect::on(Default::default());

    let report = washer_for(job).run();

    assert_eq!(report.succeeded, 1, "report: {:?}", report);
    let bytes = fs::read(&report.outputs[0]).expect("read gif");
    assert!(bytes.starts_with(b"GIF89a"));
}
