//! Per-frame pixel effects: bitplane noise, region brightness, periodic overlay and
//! moving shadow lines, applied in that order.

use image::{ColorType, DynamicImage, RgbaImage};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::job::{
    BitplaneParams, EffectConfig, OverlayParams, RegionMode, RegionParams, ShadowLineParams,
};

/// Highest bit plane the bitplane effect may touch (exclusive).
const BITPLANE_CANDIDATES: usize = 4;
const BRIGHTEN_FACTOR: f64 = 1.5;
const DARKEN_FACTOR: f64 = 0.7;
/// Alpha of the black overlay, out of 255.
const OVERLAY_ALPHA: u32 = 10;
const PIXEL_STREAM_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

pub struct FrameEffectEngine {
    bitplane: Option<BitplaneParams>,
    region: Option<RegionParams>,
    overlay: Option<OverlayParams>,
    shadow_lines: Option<ShadowLineParams>,
    frame_seed: Option<u64>,
    general: StdRng,
    pixel: StdRng,
}

impl FrameEffectEngine {
    /// `copy_seed` drives both generators unless the config asks for a fixed per-frame seed.
    pub fn new(effects: &EffectConfig, copy_seed: u64) -> Self {
        Self {
            bitplane: effects.bitplane.enabled.then_some(effects.bitplane.parameters),
            region: effects.region.enabled.then_some(effects.region.parameters),
            overlay: effects.overlay.enabled.then_some(effects.overlay.parameters),
            shadow_lines: effects
                .shadow_lines
                .enabled
                .then_some(effects.shadow_lines.parameters),
            frame_seed: effects.frame_seed(),
            general: StdRng::seed_from_u64(copy_seed),
            pixel: StdRng::seed_from_u64(copy_seed ^ PIXEL_STREAM_SALT),
        }
    }

    pub fn is_active(&self) -> bool {
        self.bitplane.is_some()
            || self.region.is_some()
            || self.overlay.is_some()
            || self.shadow_lines.is_some()
    }

    /// Apply every enabled effect to frame `index` (0-based). The color type of the
    /// input is preserved.
    pub fn apply(&mut self, image: DynamicImage, index: usize) -> DynamicImage {
        if !self.is_active() {
            return image;
        }
        if let Some(seed) = self.frame_seed {
            self.general = StdRng::seed_from_u64(seed);
            self.pixel = StdRng::seed_from_u64(seed ^ PIXEL_STREAM_SALT);
        }

        let color = image.color();
        let mut rgba = image.to_rgba8();

        if let Some(params) = self.bitplane {
            self.apply_bitplane(&mut rgba, &params);
        }
        if let Some(params) = self.region {
            self.apply_region(&mut rgba, &params);
        }
        if let Some(params) = self.overlay {
            apply_overlay(&mut rgba, &params, index);
        }
        if let Some(params) = self.shadow_lines {
            apply_shadow_lines(&mut rgba, &params, index);
        }

        restore_color_type(DynamicImage::ImageRgba8(rgba), color)
    }

    fn apply_bitplane(&mut self, img: &mut RgbaImage, params: &BitplaneParams) {
        let count = (params.planes as usize).min(BITPLANE_CANDIDATES);
        if count == 0 {
            return;
        }
        let bits: Vec<usize> =
            rand::seq::index::sample(&mut self.general, BITPLANE_CANDIDATES, count).into_vec();
        let intensity = params.intensity.clamp(0.0, 1.0);

        let mut modified = img.clone();
        for channel in 0..3 {
            for &bit in &bits {
                let mask = 1u8 << bit;
                for px in modified.pixels_mut() {
                    if self.pixel.random_bool(0.5) {
                        px.0[channel] ^= mask;
                    }
                }
            }
        }

        for (orig, noisy) in img.pixels_mut().zip(modified.pixels()) {
            for channel in 0..3 {
                let blended = f64::from(orig.0[channel]) * (1.0 - intensity)
                    + f64::from(noisy.0[channel]) * intensity;
                orig.0[channel] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    fn apply_region(&mut self, img: &mut RgbaImage, params: &RegionParams) {
        let (img_w, img_h) = img.dimensions();
        let w = params.width.min(img_w);
        let h = params.height.min(img_h);
        if w == 0 || h == 0 {
            return;
        }
        let x0 = self.general.random_range(0..=img_w - w);
        let y0 = self.general.random_range(0..=img_h - h);
        let factor = match params.mode {
            RegionMode::Brighten => BRIGHTEN_FACTOR,
            RegionMode::Darken => DARKEN_FACTOR,
            RegionMode::Random => *[BRIGHTEN_FACTOR, DARKEN_FACTOR]
                .choose(&mut self.general)
                .unwrap_or(&BRIGHTEN_FACTOR),
        };

        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let px = img.get_pixel_mut(x, y);
                for channel in 0..3 {
                    let v = (f64::from(px.0[channel]) * factor).round();
                    px.0[channel] = v.clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

/// Darken every `interval`-th frame slightly, as if a faint black layer sat on top.
fn apply_overlay(img: &mut RgbaImage, params: &OverlayParams, index: usize) {
    let interval = params.interval.max(1) as usize;
    if (index + 1) % interval != 0 {
        return;
    }
    let keep = 255 - OVERLAY_ALPHA;
    for px in img.pixels_mut() {
        for channel in 0..3 {
            px.0[channel] = ((u32::from(px.0[channel]) * keep + 127) / 255) as u8;
        }
    }
}

fn apply_shadow_lines(img: &mut RgbaImage, params: &ShadowLineParams, index: usize) {
    let (width, height) = img.dimensions();
    if (params.horizontal == 0 && params.vertical == 0) || width == 0 || height == 0 {
        return;
    }
    let h_spacing = height / params.horizontal.max(1);
    let v_spacing = width / params.vertical.max(1);
    let period = u64::from(h_spacing.max(v_spacing).max(1));
    let offset = ((index as f64 * params.speed.max(0.0)).floor() as u64 % period) as u32;
    let alpha = (255.0 * params.intensity.clamp(0.0, 1.0)).floor() / 255.0;
    let thickness = params.line_width.max(1);

    let darken = |v: u8| -> u8 { (f64::from(v) * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8 };

    for i in 0..params.horizontal {
        let y = (u64::from(i) * u64::from(h_spacing) + u64::from(offset)) % u64::from(height);
        let y = y as u32;
        for row in y..y.saturating_add(thickness).min(height) {
            for x in 0..width {
                let px = img.get_pixel_mut(x, row);
                for channel in 0..3 {
                    px.0[channel] = darken(px.0[channel]);
                }
            }
        }
    }

    for i in 0..params.vertical {
        let x = (u64::from(i) * u64::from(v_spacing) + u64::from(offset)) % u64::from(width);
        let x = x as u32;
        for col in x..x.saturating_add(thickness).min(width) {
            for y in 0..height {
                let px = img.get_pixel_mut(col, y);
                for channel in 0..3 {
                    px.0[channel] = darken(px.0[channel]);
                }
            }
        }
    }
}

fn restore_color_type(img: DynamicImage, color: ColorType) -> DynamicImage {
    match color {
        ColorType::L8 => DynamicImage::ImageLuma8(img.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(img.to_rgb8()),
        ColorType::L16 => DynamicImage::ImageLuma16(img.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(img.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(img.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(img.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(img.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(img.to_rgba32f()),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Effect;
    use image::{Rgb, RgbImage, Rgba};

    fn flat_rgb(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
    }

    fn changed_pixels(a: &DynamicImage, b: &DynamicImage) -> usize {
        a.to_rgba8()
            .pixels()
            .zip(b.to_rgba8().pixels())
            .filter(|(x, y)| x != y)
            .count()
    }

    #[test]
    fn no_frame_effects_is_identity() {
        let mut engine = FrameEffectEngine::new(&EffectConfig::default(), 1);
        assert!(!engine.is_active());
        let img = flat_rgb(8, 8, 77);
        let out = engine.apply(img.clone(), 0);
        assert_eq!(out, img);
    }

    #[test]
    fn color_type_is_preserved() {
        let mut config = EffectConfig::default();
        config.overlay = Effect::on(OverlayParams { interval: 1 });
        let mut engine = FrameEffectEngine::new(&config, 1);
        let out = engine.apply(flat_rgb(4, 4, 200), 0);
        assert_eq!(out.color(), ColorType::Rgb8);

        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(4, 4, image::Luma([200])));
        assert_eq!(engine.apply(gray, 0).color(), ColorType::L8);
    }

    #[test]
    fn overlay_hits_every_nth_frame() {
        let mut config = EffectConfig::default();
        config.overlay = Effect::on(OverlayParams { interval: 2 });
        let mut engine = FrameEffectEngine::new(&config, 1);
        let img = flat_rgb(4, 4, 255);

        let first = engine.apply(img.clone(), 0);
        assert_eq!(first, img);
        let second = engine.apply(img.clone(), 1).to_rgb8();
        assert_eq!(second.get_pixel(0, 0), &Rgb([245, 245, 245]));
    }

    #[test]
    fn bitplane_only_touches_low_planes_and_keeps_alpha() {
        let mut config = EffectConfig::default();
        config.bitplane = Effect::on(BitplaneParams {
            intensity: 1.0,
            planes: 4,
        });
        let mut engine = FrameEffectEngine::new(&config, 42);
        let src = RgbaImage::from_pixel(16, 16, Rgba([128, 64, 200, 90]));
        let out = engine
            .apply(DynamicImage::ImageRgba8(src.clone()), 0)
            .to_rgba8();

        let mut any_changed = false;
        for (a, b) in src.pixels().zip(out.pixels()) {
            for channel in 0..3 {
                assert_eq!(a.0[channel] & 0xF0, b.0[channel] & 0xF0);
                any_changed |= a.0[channel] != b.0[channel];
            }
            assert_eq!(a.0[3], b.0[3]);
        }
        assert!(any_changed);
    }

    #[test]
    fn zero_intensity_bitplane_is_identity() {
        let mut config = EffectConfig::default();
        config.bitplane = Effect::on(BitplaneParams {
            intensity: 0.0,
            planes: 2,
        });
        let mut engine = FrameEffectEngine::new(&config, 3);
        let img = flat_rgb(8, 8, 99);
        assert_eq!(engine.apply(img.clone(), 0), img);
    }

    #[test]
    fn region_changes_only_the_rectangle() {
        let mut config = EffectConfig::default();
        config.region = Effect::on(RegionParams {
            width: 10,
            height: 5,
            mode: RegionMode::Brighten,
        });
        let mut engine = FrameEffectEngine::new(&config, 9);
        let img = flat_rgb(40, 30, 100);
        let out = engine.apply(img.clone(), 0);
        assert_eq!(changed_pixels(&img, &out), 50);
        assert!(out.to_rgb8().pixels().any(|p| p.0 == [150, 150, 150]));
    }

    #[test]
    fn region_larger_than_frame_is_clamped() {
        let mut config = EffectConfig::default();
        config.region = Effect::on(RegionParams {
            width: 500,
            height: 500,
            mode: RegionMode::Darken,
        });
        let mut engine = FrameEffectEngine::new(&config, 9);
        let img = flat_rgb(6, 4, 100);
        let out = engine.apply(img.clone(), 0).to_rgb8();
        assert!(out.pixels().all(|p| p.0 == [70, 70, 70]));
    }

    #[test]
    fn shadow_line_rows_are_darkened() {
        let mut config = EffectConfig::default();
        config.shadow_lines = Effect::on(ShadowLineParams {
            horizontal: 1,
            vertical: 0,
            intensity: 0.5,
            line_width: 2,
            speed: 0.0,
        });
        let mut engine = FrameEffectEngine::new(&config, 1);
        let out = engine.apply(flat_rgb(10, 10, 200), 5).to_rgb8();
        // alpha = 127/255
        assert_eq!(out.get_pixel(3, 0).0, [100, 100, 100]);
        assert_eq!(out.get_pixel(3, 1).0, [100, 100, 100]);
        assert_eq!(out.get_pixel(3, 2).0, [200, 200, 200]);
    }

    #[test]
    fn oversized_shadow_line_width_covers_frame() {
        let mut config = EffectConfig::default();
        config.shadow_lines = Effect::on(ShadowLineParams {
            horizontal: 1,
            vertical: 1,
            intensity: 0.5,
            line_width: u32::MAX,
            speed: 3.0,
        });
        let mut engine = FrameEffectEngine::new(&config, 1);
        let out = engine.apply(flat_rgb(8, 6, 200), 7).to_rgb8();
        assert_eq!(out.dimensions(), (8, 6));
        assert!(out.pixels().all(|p| p.0[0] < 200));
    }

    #[test]
    fn shadow_lines_move_with_frame_index() {
        let mut config = EffectConfig::default();
        config.shadow_lines = Effect::on(ShadowLineParams {
            horizontal: 2,
            vertical: 0,
            intensity: 0.3,
            line_width: 1,
            speed: 1.0,
        });
        let mut engine = FrameEffectEngine::new(&config, 1);
        let a = engine.apply(flat_rgb(10, 20, 200), 0).to_rgb8();
        let b = engine.apply(flat_rgb(10, 20, 200), 3).to_rgb8();
        assert_ne!(a.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(b.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_ne!(b.get_pixel(0, 3), &Rgb([200, 200, 200]));
    }

    #[test]
    fn consistent_effects_repeat_per_frame() {
        let mut config = EffectConfig::default();
        config.bitplane = Effect::on(BitplaneParams {
            intensity: 1.0,
            planes: 2,
        });
        config.region = Effect::on(RegionParams::default());
        config.consistent_effects = true;
        config.effect_seed = 1234;

        let mut engine = FrameEffectEngine::new(&config, 1);
        let img = flat_rgb(200, 150, 120);
        let first = engine.apply(img.clone(), 0);
        let second = engine.apply(img.clone(), 1);
        assert_eq!(first, second);

        config.consistent_effects = false;
        let mut engine = FrameEffectEngine::new(&config, 1);
        let first = engine.apply(img.clone(), 0);
        let second = engine.apply(img, 1);
        assert_ne!(first, second);
    }
}
