//! Randomized parameters for each copy.
//!
//! Two streams are involved. The per-copy stream is a `StdRng` seeded from
//! `variation_seed` and drives frame-level jitter and whole-file draws. Clipping and
//! flip decisions come from an independent stream that the consistent-effects seed
//! never touches.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::ffmpeg::MediaInfo;
use crate::job::{Band, ClippingParams, CopyMode, EffectConfig, VariationBands, WholeFileBands};
use crate::stage::{StageKind, WholeFileEffect, clipped_duration, resized_dimensions, retimed_fps};

/// Seed for copy `copy_index`: wall clock micros + pid + index offset + a hash of the
/// timestamp text. Wrapping arithmetic throughout.
pub fn variation_seed(copy_index: u32) -> u64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let mut hasher = DefaultHasher::new();
    micros.to_string().hash(&mut hasher);
    let text_hash = hasher.finish() % 1_000_000;

    micros
        .wrapping_add(u64::from(std::process::id()))
        .wrapping_add(u64::from(copy_index).wrapping_mul(1000))
        .wrapping_add(text_hash)
}

pub fn draw<R: Rng>(band: Band, rng: &mut R) -> f64 {
    let (lo, hi) = band.ordered();
    if lo == hi {
        return lo;
    }
    rng.random_range(lo..=hi)
}

fn clamp_band(value: f64, limits: Band) -> f64 {
    let (lo, hi) = limits.ordered();
    value.clamp(lo, hi)
}

fn shift_count<R: Rng>(value: u32, shift: i32, rng: &mut R) -> i64 {
    let shift = shift.abs();
    i64::from(value) + i64::from(rng.random_range(-shift..=shift))
}

/// Effect config for one copy. `Exact` reuses the job's config verbatim.
pub fn effects_for_copy<R: Rng, I: Rng>(
    config: &EffectConfig,
    mode: CopyMode,
    bands: &VariationBands,
    rng: &mut R,
    independent: &mut I,
) -> EffectConfig {
    match mode {
        CopyMode::Exact => config.clone(),
        CopyMode::Variations => vary_effects(config, bands, rng, independent),
    }
}

/// Jitter enabled frame-level, clipping and flip parameters within `bands`.
pub fn vary_effects<R: Rng, I: Rng>(
    config: &EffectConfig,
    bands: &VariationBands,
    rng: &mut R,
    independent: &mut I,
) -> EffectConfig {
    let mut varied = config.clone();

    if config.bitplane.enabled {
        let p = &mut varied.bitplane.parameters;
        p.intensity = clamp_band(
            p.intensity * draw(bands.bitplane_intensity_factor, rng),
            bands.bitplane_intensity_limits,
        );
        let (lo, hi) = bands.bitplane_plane_limits;
        p.planes = shift_count(p.planes, bands.bitplane_plane_shift, rng)
            .clamp(i64::from(lo), i64::from(hi.max(lo))) as u32;
    }

    if config.shadow_lines.enabled {
        let p = &mut varied.shadow_lines.parameters;
        p.horizontal = shift_count(p.horizontal, bands.shadow_line_shift, rng).max(0) as u32;
        p.vertical = shift_count(p.vertical, bands.shadow_line_shift, rng).max(0) as u32;
        p.intensity = clamp_band(
            p.intensity * draw(bands.shadow_intensity_factor, rng),
            bands.shadow_intensity_limits,
        );
        let (lo, hi) = bands.shadow_width_limits;
        p.line_width = shift_count(p.line_width, bands.shadow_width_shift, rng)
            .clamp(i64::from(lo), i64::from(hi.max(lo))) as u32;
        p.speed = clamp_band(
            p.speed * draw(bands.shadow_speed_factor, rng),
            bands.shadow_speed_limits,
        );
    }

    if config.clipping.enabled {
        let shift = Band::new(-bands.clipping_shift, bands.clipping_shift);
        let p = &mut varied.clipping.parameters;
        p.min = (p.min + draw(shift, independent)).max(1.0);
        p.max = (p.max + draw(shift, independent)).max(p.min + 1.0);
    }

    if config.flip.enabled {
        let keep = bands.flip_keep_probability.clamp(0.0, 1.0);
        varied.flip.enabled = independent.random_bool(keep);
    }

    varied
}

/// Clip percentage in `[min, max]` inclusive, from the independent stream.
pub fn sample_clip_percent<I: Rng>(params: &ClippingParams, independent: &mut I) -> f64 {
    draw(Band::new(params.min, params.max), independent)
}

/// Sample the concrete effect for `kind`, or `None` when it is disabled or cannot run.
///
/// Whole-file values are drawn here, per copy, in both copy modes.
pub fn plan_stage<R: Rng, I: Rng>(
    kind: StageKind,
    effects: &EffectConfig,
    bands: &WholeFileBands,
    info: &MediaInfo,
    rng: &mut R,
    independent: &mut I,
) -> Option<WholeFileEffect> {
    match kind {
        StageKind::Clip => {
            if !effects.clipping.enabled {
                return None;
            }
            let percent = sample_clip_percent(&effects.clipping.parameters, independent);
            let duration = clipped_duration(info.duration_seconds, percent)?;
            Some(WholeFileEffect::Clip { duration })
        }
        StageKind::Flip => effects.flip.enabled.then_some(WholeFileEffect::Flip),
        StageKind::Color => {
            if !(effects.brightness.enabled || effects.contrast.enabled || effects.saturation.enabled)
            {
                return None;
            }
            let mut pick = |enabled: bool, band: Band| if enabled { draw(band, rng) } else { 1.0 };
            let brightness = pick(effects.brightness.enabled, bands.brightness);
            let contrast = pick(effects.contrast.enabled, bands.contrast);
            let saturation = pick(effects.saturation.enabled, bands.saturation);
            Some(WholeFileEffect::ColorEq {
                brightness,
                contrast,
                saturation,
            })
        }
        StageKind::Hue => effects.hue.enabled.then(|| WholeFileEffect::Hue {
            degrees: draw(bands.hue_degrees, rng),
        }),
        StageKind::Blur => effects.blur.enabled.then(|| WholeFileEffect::Blur {
            sigma: draw(bands.blur_sigma, rng),
        }),
        StageKind::Resize => effects.resize.enabled.then(|| {
            let factor = draw(bands.resize_factor, rng);
            let (width, height) = resized_dimensions(info.width, info.height, factor);
            WholeFileEffect::Resize { width, height }
        }),
        StageKind::Noise => effects.noise.enabled.then(|| WholeFileEffect::Noise {
            level: draw(bands.noise_level, rng),
        }),
        StageKind::Fps => effects.fps_change.enabled.then(|| WholeFileEffect::Fps {
            fps: retimed_fps(info.fps, draw(bands.fps_delta, rng)),
        }),
        StageKind::Audio => effects.audio_fingerprint.enabled.then(|| WholeFileEffect::Audio {
            pitch_percent: draw(bands.pitch_percent, rng),
            tempo_percent: draw(bands.tempo_percent, rng),
            low_db: draw(bands.eq_low_db, rng),
            mid_db: draw(bands.eq_mid_db, rng),
            high_db: draw(bands.eq_high_db, rng),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BitplaneParams, Effect, ShadowLineParams, Toggle};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn frame_config() -> EffectConfig {
        let mut config = EffectConfig::default();
        config.bitplane = Effect::on(BitplaneParams {
            intensity: 0.5,
            planes: 2,
        });
        config.shadow_lines = Effect::on(ShadowLineParams {
            horizontal: 3,
            vertical: 1,
            intensity: 0.3,
            line_width: 2,
            speed: 1.0,
        });
        config.clipping = Effect::on(ClippingParams { min: 2.0, max: 4.0 });
        config.flip = Toggle::enabled();
        config
    }

    #[test]
    fn seeds_are_distinct_across_copies() {
        let seeds: HashSet<u64> = (0..20).map(variation_seed).collect();
        assert_eq!(seeds.len(), 20);
    }

    #[test]
    fn variations_stay_within_limits() {
        let config = frame_config();
        let bands = VariationBands::default();
        let mut independent = StdRng::seed_from_u64(99);
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let v = vary_effects(&config, &bands, &mut rng, &mut independent);
            let bp = v.bitplane.parameters;
            assert!((0.1..=1.0).contains(&bp.intensity));
            assert!((1..=3).contains(&bp.planes));
            let sl = v.shadow_lines.parameters;
            assert!(sl.horizontal <= 5);
            assert!(sl.vertical <= 3);
            assert!((0.1..=0.5).contains(&sl.intensity));
            assert!((1..=5).contains(&sl.line_width));
            assert!((0.5..=2.0).contains(&sl.speed));
            let clip = v.clipping.parameters;
            assert!(clip.min >= 1.0);
            assert!(clip.max >= clip.min + 1.0);
        }
    }

    #[test]
    fn distinct_seeds_give_distinct_parameter_sets() {
        let config = frame_config();
        let bands = VariationBands::default();
        let mut independent = StdRng::seed_from_u64(1);
        let mut rng_a = StdRng::seed_from_u64(variation_seed(0));
        let mut rng_b = StdRng::seed_from_u64(variation_seed(1));
        let a = vary_effects(&config, &bands, &mut rng_a, &mut independent);
        let b = vary_effects(&config, &bands, &mut rng_b, &mut independent);
        assert_ne!(
            a.bitplane.parameters.intensity,
            b.bitplane.parameters.intensity
        );
    }

    #[test]
    fn exact_mode_reuses_config() {
        let config = frame_config();
        let mut rng = StdRng::seed_from_u64(5);
        let mut independent = StdRng::seed_from_u64(6);
        let copy = effects_for_copy(
            &config,
            CopyMode::Exact,
            &VariationBands::default(),
            &mut rng,
            &mut independent,
        );
        assert_eq!(copy, config);
    }

    #[test]
    fn flip_is_kept_about_seventy_percent_of_the_time() {
        let config = frame_config();
        let bands = VariationBands::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut independent = StdRng::seed_from_u64(4);
        let kept = (0..1000)
            .filter(|_| vary_effects(&config, &bands, &mut rng, &mut independent).flip.enabled)
            .count();
        assert!((600..=800).contains(&kept), "kept={kept}");
    }

    #[test]
    fn consistent_effect_seed_leaves_clip_and_flip_random() {
        let mut config = frame_config();
        config.consistent_effects = true;
        config.effect_seed = 42;
        let bands = VariationBands::default();
        let info = MediaInfo {
            duration_seconds: 10.0,
            ..MediaInfo::default()
        };
        let mut independent = rand::rng();
        let mut durations = Vec::new();
        let mut flips = HashSet::new();
        for _ in 0..40 {
            // Same per-copy stream every time: only the independent stream may differ.
            let mut rng = StdRng::seed_from_u64(config.effect_seed);
            let copy = vary_effects(&config, &bands, &mut rng, &mut independent);
            flips.insert(copy.flip.enabled);
            if let Some(WholeFileEffect::Clip { duration }) = plan_stage(
                StageKind::Clip,
                &copy,
                &WholeFileBands::default(),
                &info,
                &mut rng,
                &mut independent,
            ) {
                durations.push(duration.to_bits());
            }
        }
        durations.sort_unstable();
        durations.dedup();
        assert!(durations.len() > 1, "clip durations never changed");
        assert_eq!(flips.len(), 2, "flip decision never changed");
    }

    #[test]
    fn whole_file_values_vary_per_copy_in_exact_mode() {
        let mut config = EffectConfig::default();
        config.brightness = Toggle::enabled();
        let bands = WholeFileBands::default();
        let info = MediaInfo::default();
        let mut independent = StdRng::seed_from_u64(0);

        let mut planned = Vec::new();
        for copy_index in 0..2u64 {
            let mut rng = StdRng::seed_from_u64(1000 + copy_index);
            let copy_config = effects_for_copy(
                &config,
                CopyMode::Exact,
                &VariationBands::default(),
                &mut rng,
                &mut independent,
            );
            assert_eq!(copy_config, config);
            let effect =
                plan_stage(StageKind::Color, &copy_config, &bands, &info, &mut rng, &mut independent)
                    .expect("color stage planned");
            planned.push(effect);
        }
        assert_ne!(planned[0], planned[1]);
    }

    #[test]
    fn color_stage_keeps_disabled_members_neutral() {
        let mut config = EffectConfig::default();
        config.contrast = Toggle::enabled();
        let mut rng = StdRng::seed_from_u64(7);
        let mut independent = StdRng::seed_from_u64(8);
        let effect = plan_stage(
            StageKind::Color,
            &config,
            &WholeFileBands::default(),
            &MediaInfo::default(),
            &mut rng,
            &mut independent,
        );
        match effect {
            Some(WholeFileEffect::ColorEq {
                brightness,
                contrast,
                saturation,
            }) => {
                assert_eq!(brightness, 1.0);
                assert_eq!(saturation, 1.0);
                assert!((0.95..=1.1).contains(&contrast));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn disabled_stages_are_not_planned() {
        let config = EffectConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut independent = StdRng::seed_from_u64(8);
        for kind in StageKind::ORDER {
            assert!(
                plan_stage(
                    kind,
                    &config,
                    &WholeFileBands::default(),
                    &MediaInfo::default(),
                    &mut rng,
                    &mut independent
                )
                .is_none()
            );
        }
    }

    #[test]
    fn clip_needs_known_duration_and_respects_bounds() {
        let mut config = EffectConfig::default();
        config.clipping = Effect::on(ClippingParams { min: 5.0, max: 10.0 });
        let bands = WholeFileBands::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut independent = StdRng::seed_from_u64(2);

        let unknown = MediaInfo::default();
        assert!(
            plan_stage(StageKind::Clip, &config, &bands, &unknown, &mut rng, &mut independent)
                .is_none()
        );

        let info = MediaInfo {
            duration_seconds: 10.0,
            ..MediaInfo::default()
        };
        for _ in 0..100 {
            match plan_stage(StageKind::Clip, &config, &bands, &info, &mut rng, &mut independent) {
                Some(WholeFileEffect::Clip { duration }) => {
                    assert!((9.8 - 1e-9..=9.9 + 1e-9).contains(&duration), "{duration}");
                }
                other => panic!("unexpected plan: {other:?}"),
            }
        }
    }

    #[test]
    fn clip_percent_is_inclusive_band() {
        let params = ClippingParams { min: 3.0, max: 3.0 };
        let mut independent = StdRng::seed_from_u64(0);
        assert_eq!(sample_clip_percent(&params, &mut independent), 3.0);
    }
}
