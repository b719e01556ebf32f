//! Skin-likelihood gate.
//!
//! A pixel-statistics pre-filter that decides whether an upload plausibly
//! shows human skin before any model inference happens. Two heuristics are
//! combined: an HSV per-pixel skin mask and a mean-color check. Any failure
//! while computing them rejects the image.

use std::ops::RangeInclusive;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

// Tunables. These were calibrated by hand and are expected to move.
pub const ANALYSIS_SIZE: u32 = 200;
pub const MEAN_RED_RANGE: RangeInclusive<f64> = 95.0..=255.0;
pub const MEAN_GREEN_RANGE: RangeInclusive<f64> = 40.0..=200.0;
pub const MEAN_BLUE_RANGE: RangeInclusive<f64> = 20.0..=170.0;
pub const MEAN_BRIGHTNESS_RANGE: RangeInclusive<f64> = 60.0..=220.0;
/// HSV channels on a 0-255 scale.
pub const SKIN_HUE_RANGE: RangeInclusive<u8> = 0..=50;
pub const SKIN_SATURATION_RANGE: RangeInclusive<u8> = 58..=173;
pub const SKIN_VALUE_RANGE: RangeInclusive<u8> = 89..=255;
/// Strictly greater than this fraction of skin pixels accepts the image.
pub const MIN_SKIN_PIXEL_FRACTION: f64 = 0.15;
pub const SKIN_FRACTION_CONFIDENCE_SCALE: f64 = 2.0;
pub const MAX_SKIN_CONFIDENCE: f64 = 0.95;
pub const MEAN_COLOR_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct SkinThresholds {
    pub analysis_size: u32,
    pub mean_red: RangeInclusive<f64>,
    pub mean_green: RangeInclusive<f64>,
    pub mean_blue: RangeInclusive<f64>,
    pub mean_brightness: RangeInclusive<f64>,
    pub hue: RangeInclusive<u8>,
    pub saturation: RangeInclusive<u8>,
    pub value: RangeInclusive<u8>,
    pub min_skin_fraction: f64,
    pub fraction_confidence_scale: f64,
    pub max_confidence: f64,
    pub mean_color_confidence: f64,
}

impl Default for SkinThresholds {
    fn default() -> Self {
        Self {
            analysis_size: ANALYSIS_SIZE,
            mean_red: MEAN_RED_RANGE,
            mean_green: MEAN_GREEN_RANGE,
            mean_blue: MEAN_BLUE_RANGE,
            mean_brightness: MEAN_BRIGHTNESS_RANGE,
            hue: SKIN_HUE_RANGE,
            saturation: SKIN_SATURATION_RANGE,
            value: SKIN_VALUE_RANGE,
            min_skin_fraction: MIN_SKIN_PIXEL_FRACTION,
            fraction_confidence_scale: SKIN_FRACTION_CONFIDENCE_SCALE,
            max_confidence: MAX_SKIN_CONFIDENCE,
            mean_color_confidence: MEAN_COLOR_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkinVerdict {
    pub is_skin: bool,
    pub confidence: f64,
    pub reason: String,
    #[serde(rename = "skin_percentage")]
    pub skin_pixel_fraction: f64,
}

impl SkinVerdict {
    /// Fail-closed verdict for an image that could not be analyzed.
    pub fn failed(err: &SkinAnalysisError) -> Self {
        Self {
            is_skin: false,
            confidence: 0.0,
            reason: format!("Validation failed: {}", err),
            skin_pixel_fraction: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum SkinAnalysisError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColorStatistics {
    mean_red: f64,
    mean_green: f64,
    mean_blue: f64,
    skin_pixel_fraction: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SkinGate {
    thresholds: SkinThresholds,
}

impl SkinGate {
    /// Decides whether `image` plausibly depicts skin. Never fails: analysis
    /// errors come back as a rejection carrying the error in `reason`.
    pub fn assess(&self, image: &DynamicImage) -> SkinVerdict {
        match self.statistics(image) {
            Ok(stats) => self.decide(stats),
            Err(err) => {
                debug!(error = %err, "skin analysis failed, rejecting");
                SkinVerdict::failed(&err)
            }
        }
    }

    /// Decodes an encoded upload and assesses it. Bytes that do not decode
    /// yield no image and a failed verdict.
    pub fn decode_and_assess(&self, bytes: &[u8]) -> (Option<DynamicImage>, SkinVerdict) {
        match image::load_from_memory(bytes) {
            Ok(image) => {
                let verdict = self.assess(&image);
                (Some(image), verdict)
            }
            Err(err) => (None, SkinVerdict::failed(&SkinAnalysisError::Decode(err))),
        }
    }

    fn statistics(&self, image: &DynamicImage) -> Result<ColorStatistics, SkinAnalysisError> {
        let (width, height) = image.dimensions();
        let size = self.thresholds.analysis_size;
        if width == 0 || height == 0 || size == 0 {
            return Err(SkinAnalysisError::Empty { width, height });
        }

        let rgb: RgbImage = if (width, height) == (size, size) {
            image.to_rgb8()
        } else {
            image
                .resize_exact(size, size, FilterType::CatmullRom)
                .to_rgb8()
        };

        let (mut red, mut green, mut blue) = (0u64, 0u64, 0u64);
        let mut skin_pixels = 0u64;
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            red += r as u64;
            green += g as u64;
            blue += b as u64;

            let (h, s, v) = rgb_to_hsv(r, g, b);
            if self.thresholds.hue.contains(&h)
                && self.thresholds.saturation.contains(&s)
                && self.thresholds.value.contains(&v)
            {
                skin_pixels += 1;
            }
        }

        let total = (rgb.width() as u64 * rgb.height() as u64) as f64;
        Ok(ColorStatistics {
            mean_red: red as f64 / total,
            mean_green: green as f64 / total,
            mean_blue: blue as f64 / total,
            skin_pixel_fraction: skin_pixels as f64 / total,
        })
    }

    fn mean_color_is_skin(&self, stats: &ColorStatistics) -> bool {
        let t = &self.thresholds;
        let (r, g, b) = (stats.mean_red, stats.mean_green, stats.mean_blue);
        let brightness = (r + g + b) / 3.0;

        t.mean_red.contains(&r)
            && t.mean_green.contains(&g)
            && t.mean_blue.contains(&b)
            && r > g
            && g > b
            && t.mean_brightness.contains(&brightness)
    }

    fn decide(&self, stats: ColorStatistics) -> SkinVerdict {
        let t = &self.thresholds;
        let fraction = stats.skin_pixel_fraction;
        debug!(
            mean_red = stats.mean_red,
            mean_green = stats.mean_green,
            mean_blue = stats.mean_blue,
            skin_pixel_fraction = fraction,
            "color statistics"
        );

        if fraction > t.min_skin_fraction {
            return SkinVerdict {
                is_skin: true,
                confidence: (fraction * t.fraction_confidence_scale).min(t.max_confidence),
                reason: format!("Detected {:.1}% skin area", fraction * 100.0),
                skin_pixel_fraction: fraction,
            };
        }

        if self.mean_color_is_skin(&stats) {
            return SkinVerdict {
                is_skin: true,
                confidence: t.mean_color_confidence,
                reason: "Average color is consistent with skin".to_string(),
                skin_pixel_fraction: fraction,
            };
        }

        SkinVerdict {
            is_skin: false,
            confidence: 0.0,
            reason: format!(
                "Colors are not consistent with skin (RGB: {:.0},{:.0},{:.0}, skin: {:.1}%)",
                stats.mean_red,
                stats.mean_green,
                stats.mean_blue,
                fraction * 100.0
            ),
            skin_pixel_fraction: fraction,
        }
    }
}

/// RGB to HSV with every channel on a 0-255 scale. Hue wraps to [0, 1)
/// before scaling and both hue and saturation truncate.
///
/// Intermediates are stored as `f32` but the sector offset, the wrap and the
/// final scaling run in `f64`, the same as PIL's `HSV` conversion. Doing the
/// whole thing in either precision moves some hues by one step.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == min {
        return (0, 0, max);
    }

    let maxf = max as f32;
    let chroma = maxf - min as f32;
    let saturation: f32 = chroma / maxf;

    let rc = (maxf - r as f32) / chroma;
    let gc = (maxf - g as f32) / chroma;
    let bc = (maxf - b as f32) / chroma;
    let hue: f32 = if r == max {
        bc - gc
    } else if g == max {
        (2.0 + rc as f64 - bc as f64) as f32
    } else {
        (4.0 + gc as f64 - rc as f64) as f32
    };
    let hue = ((hue as f64 / 6.0 + 1.0) % 1.0) as f32;

    (
        to_channel(hue as f64 * 255.0),
        to_channel(saturation as f64 * 255.0),
        max,
    )
}

fn to_channel(scaled: f64) -> u8 {
    (scaled as i32).clamp(0, 255) as u8
}
