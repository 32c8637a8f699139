//! Glossy-surface reflection synthesis
//!
//! The reflection is a vertically mirrored copy of the clean cutout, squeezed
//! to a fraction of the subject height and anchored directly below it. It is
//! faded top to bottom, pushed through a fixed photometric curve and softened
//! with a Gaussian blur confined to the reflection band.

use crate::error::{Result, StudioError};
use crate::types::{Dimensions, PixelBuffer, PixelRect, Rect};
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, span, Level};

/// Tunables for reflection synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionOptions {
    /// Reflection height as a fraction of the subject height
    pub height_fraction: f64,

    /// Alpha multipliers spaced evenly from the top row to the bottom row
    pub fade_stops: Vec<f32>,

    pub brightness: f32,

    /// Contrast factor pivoted at mid-gray
    pub contrast: f32,

    /// Saturation factor pivoted at each pixel's luminance
    pub saturation: f32,

    /// Overall opacity applied after the color adjustment
    pub opacity: f32,

    /// Gaussian sigma in canvas pixels, 0 disables the blur
    pub blur_radius: f32,
}

impl Default for ReflectionOptions {
    fn default() -> Self {
        Self {
            height_fraction: 0.6,
            fade_stops: vec![0.5, 0.35, 0.15, 0.05, 0.0],
            brightness: 1.3,
            contrast: 1.7,
            saturation: 1.6,
            opacity: 0.9,
            blur_radius: 4.0,
        }
    }
}

impl ReflectionOptions {
    /// Check that the options describe a subtle, downward-fading reflection
    ///
    /// # Errors
    /// - `InvalidConfig` naming the first offending option
    pub fn validate(&self) -> Result<()> {
        if !(self.height_fraction > 0.0 && self.height_fraction <= 1.0) {
            return Err(StudioError::config_value_error(
                "reflection height fraction",
                self.height_fraction,
                "(0.0, 1.0]",
                Some(0.6),
            ));
        }

        let (Some(&first), Some(&last)) = (self.fade_stops.first(), self.fade_stops.last()) else {
            return Err(StudioError::invalid_config(
                "reflection fade needs at least two stops",
            ));
        };
        if self.fade_stops.len() < 2 {
            return Err(StudioError::invalid_config(
                "reflection fade needs at least two stops",
            ));
        }
        if first > 0.5 {
            return Err(StudioError::config_value_error(
                "reflection top fade stop",
                first,
                "0.0-0.5",
                Some(0.5),
            ));
        }
        if last != 0.0 {
            return Err(StudioError::invalid_config(
                "reflection fade must reach zero at the bottom",
            ));
        }
        if self
            .fade_stops
            .windows(2)
            .any(|pair| matches!(pair, [a, b] if b > a || *b < 0.0))
        {
            return Err(StudioError::invalid_config(
                "reflection fade stops must be non-negative and non-increasing",
            ));
        }

        for (name, value) in [
            ("reflection brightness", self.brightness),
            ("reflection contrast", self.contrast),
            ("reflection saturation", self.saturation),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(StudioError::config_value_error(name, value, ">= 0.0", None));
            }
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(StudioError::config_value_error(
                "reflection opacity",
                self.opacity,
                "0.0-1.0",
                Some(0.9),
            ));
        }
        if !(self.blur_radius.is_finite() && self.blur_radius >= 0.0) {
            return Err(StudioError::config_value_error(
                "reflection blur radius",
                self.blur_radius,
                ">= 0.0",
                Some(4.0),
            ));
        }
        Ok(())
    }

    /// Fade multiplier at `t` in [0, 1] from top to bottom
    #[must_use]
    pub fn fade_at(&self, t: f32) -> f32 {
        match self.fade_stops.as_slice() {
            [] => 1.0,
            [only] => *only,
            stops => {
                let segments = (stops.len() - 1) as f32;
                let position = t.clamp(0.0, 1.0) * segments;
                let index = (position.floor() as usize).min(stops.len() - 2);
                let frac = position - index as f32;
                let (a, b) = (stops[index], stops[index + 1]);
                a + (b - a) * frac
            },
        }
    }
}

/// Builds reflection layers from clean cutouts
#[derive(Debug, Clone, Default)]
pub struct ReflectionSynthesizer {
    options: ReflectionOptions,
}

impl ReflectionSynthesizer {
    #[must_use]
    pub fn new(options: ReflectionOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &ReflectionOptions {
        &self.options
    }

    /// Synthesize a canvas-sized reflection layer for a subject drawn at `rect`
    ///
    /// Only the band directly below `rect` (same horizontal span, height
    /// `height_fraction * rect.height`) carries non-transparent pixels. When
    /// no part of that band lands on the canvas the layer is fully
    /// transparent.
    ///
    /// # Errors
    /// - `Format` when the canvas has a zero dimension
    pub fn synthesize(
        &self,
        clean: &PixelBuffer,
        rect: &Rect,
        canvas: Dimensions,
    ) -> Result<PixelBuffer> {
        if canvas.is_empty() {
            return Err(StudioError::format(format!(
                "cannot synthesize a reflection on an empty {} canvas",
                canvas
            )));
        }
        let _span = span!(
            Level::DEBUG,
            "reflection",
            subject = %clean.dimensions(),
            canvas = %canvas
        )
        .entered();

        let Some(band) = self.band_for(rect, canvas) else {
            debug!("Reflection band does not fit on the canvas");
            return Ok(PixelBuffer::transparent(canvas.width, canvas.height));
        };
        if clean.dimensions().is_empty() {
            return Ok(PixelBuffer::transparent(canvas.width, canvas.height));
        }

        let flipped = imageops::flip_vertical(clean.as_image());
        let canvas_area = u64::from(canvas.width) * u64::from(canvas.height);

        // Bands larger than the canvas are only rendered where they land on
        // it, plus enough margin for the blur to see its neighbours
        let (mut layer, origin_x, origin_y, row_offset) = if band.area() <= canvas_area {
            let layer = imageops::resize(
                &flipped,
                band.width,
                band.height,
                imageops::FilterType::Triangle,
            );
            (layer, band.x, band.y, 0)
        } else {
            let margin = self.blur_margin();
            let reach = PixelRect {
                x: -margin,
                y: -margin,
                width: canvas.width.saturating_add(2 * margin as u32),
                height: canvas.height.saturating_add(2 * margin as u32),
            };
            let Some(visible) = band.intersect(&reach) else {
                return Ok(PixelBuffer::transparent(canvas.width, canvas.height));
            };
            let window = PixelRect {
                x: visible.x - band.x,
                y: visible.y - band.y,
                ..visible
            };
            let layer = resample_window(&flipped, band.width, band.height, window);
            (layer, visible.x, visible.y, window.y as u32)
        };

        self.fade_and_adjust(&mut layer, row_offset, band.height);
        let layer = self.soften(layer);

        let mut out = RgbaImage::new(canvas.width, canvas.height);
        for (x, y, pixel) in layer.enumerate_pixels() {
            let cx = origin_x + i64::from(x);
            let cy = origin_y + i64::from(y);
            if cx < 0 || cy < 0 || cx >= i64::from(canvas.width) || cy >= i64::from(canvas.height) {
                continue;
            }
            out.put_pixel(cx as u32, cy as u32, *pixel);
        }

        debug!(
            left = band.x,
            top = band.y,
            width = band.width,
            height = band.height,
            "Reflection synthesized"
        );
        Ok(PixelBuffer::from_image(out))
    }

    fn band_for(&self, rect: &Rect, canvas: Dimensions) -> Option<PixelRect> {
        let left = rect.x.round();
        let right = rect.right().round();
        let top = rect.bottom().round();
        let bottom = (rect.bottom() + rect.height * self.options.height_fraction).round();

        if !(left.is_finite() && right.is_finite() && top.is_finite() && bottom.is_finite()) {
            return None;
        }
        if right <= left || bottom <= top {
            return None;
        }
        if top >= f64::from(canvas.height) || bottom <= 0.0 {
            return None;
        }
        if left >= f64::from(canvas.width) || right <= 0.0 {
            return None;
        }

        Some(PixelRect {
            x: left as i64,
            y: top as i64,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    /// Rows and columns beyond the visible band that still feed the blur
    fn blur_margin(&self) -> i64 {
        if self.options.blur_radius <= 0.0 {
            0
        } else {
            (f64::from(self.options.blur_radius) * 3.0).ceil() as i64
        }
    }

    /// Fade alpha per row, then brightness, contrast and saturation, then opacity
    ///
    /// `layer` may be a window of the band starting `row_offset` rows below
    /// its top; the fade always spans the full `band_height`.
    fn fade_and_adjust(&self, layer: &mut RgbaImage, row_offset: u32, band_height: u32) {
        let opts = &self.options;

        for (_, y, pixel) in layer.enumerate_pixels_mut() {
            let t = if band_height > 1 {
                (row_offset + y) as f32 / (band_height - 1) as f32
            } else {
                0.0
            };
            let alpha = (f32::from(pixel.0[3]) * opts.fade_at(t) * opts.opacity).floor();
            if alpha <= 0.0 {
                pixel.0 = [0, 0, 0, 0];
                continue;
            }

            let mut rgb = [
                f32::from(pixel.0[0]),
                f32::from(pixel.0[1]),
                f32::from(pixel.0[2]),
            ];
            for v in &mut rgb {
                *v = (*v * opts.brightness).clamp(0.0, 255.0);
            }
            for v in &mut rgb {
                *v = ((*v - 128.0) * opts.contrast + 128.0).clamp(0.0, 255.0);
            }
            let luma = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
            for v in &mut rgb {
                *v = (luma + (*v - luma) * opts.saturation).clamp(0.0, 255.0);
            }

            pixel.0 = [
                rgb[0].round() as u8,
                rgb[1].round() as u8,
                rgb[2].round() as u8,
                alpha as u8,
            ];
        }
    }

    /// Blur the band in premultiplied space so transparent pixels do not bleed black
    fn soften(&self, layer: RgbaImage) -> RgbaImage {
        if self.options.blur_radius <= 0.0 {
            return layer;
        }
        let mut premultiplied = layer;
        premultiply(&mut premultiplied);
        let mut blurred = imageops::blur(&premultiplied, self.options.blur_radius);
        unpremultiply(&mut blurred);
        blurred
    }
}

/// Resample the part of `source` that lands in `window` when the whole
/// image is stretched to `full_width` x `full_height`
///
/// Only the window is allocated. Sampling is bilinear on premultiplied
/// pixels; `window` is in the stretched image's coordinates.
pub(crate) fn resample_window(
    source: &RgbaImage,
    full_width: u32,
    full_height: u32,
    window: PixelRect,
) -> RgbaImage {
    let mut out = RgbaImage::new(window.width, window.height);
    if source.width() == 0 || source.height() == 0 || full_width == 0 || full_height == 0 {
        return out;
    }
    let mut premultiplied = source.clone();
    premultiply(&mut premultiplied);

    let step_x = f64::from(source.width()) / f64::from(full_width);
    let step_y = f64::from(source.height()) / f64::from(full_height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let u = ((window.x + i64::from(x)) as f64 + 0.5) * step_x - 0.5;
        let v = ((window.y + i64::from(y)) as f64 + 0.5) * step_y - 0.5;
        pixel.0 = sample_bilinear(&premultiplied, u, v);
    }
    unpremultiply(&mut out);
    out
}

fn sample_bilinear(image: &RgbaImage, u: f64, v: f64) -> [u8; 4] {
    let max_x = f64::from(image.width() - 1);
    let max_y = f64::from(image.height() - 1);
    let u = u.clamp(0.0, max_x);
    let v = v.clamp(0.0, max_y);
    let (x0, y0) = (u.floor(), v.floor());
    let (fx, fy) = (u - x0, v - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);

    let (p00, p10) = (image.get_pixel(x0, y0).0, image.get_pixel(x1, y0).0);
    let (p01, p11) = (image.get_pixel(x0, y1).0, image.get_pixel(x1, y1).0);
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        let top = f64::from(p00[i]) * (1.0 - fx) + f64::from(p10[i]) * fx;
        let bottom = f64::from(p01[i]) * (1.0 - fx) + f64::from(p11[i]) * fx;
        *channel = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

pub(crate) fn premultiply(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let a = u16::from(pixel.0[3]);
        for c in &mut pixel.0[..3] {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
}

pub(crate) fn unpremultiply(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let a = u16::from(pixel.0[3]);
        if a == 0 {
            pixel.0 = [0, 0, 0, 0];
            continue;
        }
        for c in &mut pixel.0[..3] {
            *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque_subject(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7 % 256) as u8, (y * 5 % 256) as u8, 120, 255]);
            }
        }
        PixelBuffer::from_raw(width, height, data).unwrap()
    }

    fn non_transparent_bounds(buffer: &PixelBuffer) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in buffer.as_image().enumerate_pixels() {
            if p.0[3] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds
    }

    #[test]
    fn test_default_options_are_valid() {
        assert!(ReflectionOptions::default().validate().is_ok());
    }

    #[test]
    fn test_options_reject_bright_or_rising_fades() {
        let bright = ReflectionOptions {
            fade_stops: vec![0.8, 0.0],
            ..ReflectionOptions::default()
        };
        assert!(bright.validate().is_err());

        let rising = ReflectionOptions {
            fade_stops: vec![0.3, 0.4, 0.0],
            ..ReflectionOptions::default()
        };
        assert!(rising.validate().is_err());

        let never_clears = ReflectionOptions {
            fade_stops: vec![0.5, 0.1],
            ..ReflectionOptions::default()
        };
        assert!(never_clears.validate().is_err());
    }

    #[test]
    fn test_fade_interpolation() {
        let opts = ReflectionOptions::default();
        assert!((opts.fade_at(0.0) - 0.5).abs() < 1e-6);
        assert!((opts.fade_at(0.25) - 0.35).abs() < 1e-6);
        assert!((opts.fade_at(0.375) - 0.25).abs() < 1e-6);
        assert!((opts.fade_at(1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_reflection_containment() {
        let canvas = Dimensions::new(120, 120);
        let rect = Rect::new(20.0, 10.0, 50.0, 50.0);
        let layer = ReflectionSynthesizer::default()
            .synthesize(&opaque_subject(25, 25), &rect, canvas)
            .unwrap();
        assert_eq!(layer.dimensions(), canvas);

        let (x0, y0, x1, y1) = non_transparent_bounds(&layer).unwrap();
        // band is x in [20, 70), y in [60, 90)
        assert!(x0 >= 20 && x1 < 70, "x range {}..={}", x0, x1);
        assert!(y0 >= 60 && y1 < 90, "y range {}..={}", y0, y1);
        assert_eq!(y0, 60, "reflection starts right below the subject");
    }

    #[test]
    fn test_reflection_opacity_bound() {
        let canvas = Dimensions::new(100, 100);
        let rect = Rect::new(10.0, 5.0, 40.0, 40.0);
        let layer = ReflectionSynthesizer::default()
            .synthesize(&opaque_subject(40, 40), &rect, canvas)
            .unwrap();

        let limit = 0.5 * 0.9 * 255.0;
        for p in layer.as_image().pixels() {
            assert!(f64::from(p.0[3]) <= limit, "alpha {} over cap", p.0[3]);
        }
        assert!(layer.as_image().pixels().any(|p| p.0[3] > 0));
    }

    #[test]
    fn test_fade_reaches_zero_at_bottom_row() {
        let canvas = Dimensions::new(60, 60);
        let rect = Rect::new(10.0, 0.0, 20.0, 20.0);
        let synthesizer = ReflectionSynthesizer::new(ReflectionOptions {
            blur_radius: 0.0,
            ..ReflectionOptions::default()
        });
        let layer = synthesizer
            .synthesize(&opaque_subject(20, 20), &rect, canvas)
            .unwrap();

        // band rows 20..32, the last one fully faded
        assert_eq!(layer.pixel(15, 20).unwrap()[3], 114);
        assert_eq!(layer.pixel(15, 31).unwrap()[3], 0);
        for y in 21..32 {
            assert!(layer.pixel(15, y).unwrap()[3] <= layer.pixel(15, y - 1).unwrap()[3]);
        }
    }

    #[test]
    fn test_photometric_adjustment_order() {
        let canvas = Dimensions::new(10, 10);
        let rect = Rect::new(0.0, 0.0, 4.0, 4.0);
        let synthesizer = ReflectionSynthesizer::new(ReflectionOptions {
            blur_radius: 0.0,
            ..ReflectionOptions::default()
        });
        let gray = PixelBuffer::solid(4, 4, [100, 100, 100, 255]);
        let layer = synthesizer.synthesize(&gray, &rect, canvas).unwrap();

        // 100 * 1.3 = 130, (130 - 128) * 1.7 + 128 = 131.4, gray stays gray
        assert_eq!(layer.pixel(0, 4), Some([131, 131, 131, 114]));
    }

    #[test]
    fn test_band_below_canvas_is_transparent() {
        let canvas = Dimensions::new(50, 50);
        let rect = Rect::new(10.0, 20.0, 20.0, 30.0);
        let layer = ReflectionSynthesizer::default()
            .synthesize(&opaque_subject(10, 10), &rect, canvas)
            .unwrap();
        assert_eq!(layer.dimensions(), canvas);
        assert!(layer.is_fully_transparent());
    }

    #[test]
    fn test_band_taller_than_canvas_renders_visible_rows_only() {
        let canvas = Dimensions::new(100, 100);
        // The band below this rect is six million rows tall
        let rect = Rect::new(10.0, -9_999_950.0, 80.0, 10_000_000.0);
        let layer = ReflectionSynthesizer::default()
            .synthesize(&PixelBuffer::solid(2, 2000, [200, 30, 30, 255]), &rect, canvas)
            .unwrap();

        assert_eq!(layer.dimensions(), canvas);
        let (x0, y0, x1, _) = non_transparent_bounds(&layer).unwrap();
        assert!(x0 >= 10 && x1 < 90, "columns {}..={}", x0, x1);
        assert!(y0 >= 50, "first row {}", y0);
        assert!(layer.as_image().pixels().all(|p| p.0[3] <= 115));
        assert!(layer.pixel(50, 50).unwrap()[3] > 100);
    }

    #[test]
    fn test_partially_off_canvas_band_is_clipped() {
        let canvas = Dimensions::new(40, 40);
        let rect = Rect::new(-10.0, 10.0, 30.0, 20.0);
        let layer = ReflectionSynthesizer::default()
            .synthesize(&opaque_subject(30, 20), &rect, canvas)
            .unwrap();
        let (x0, y0, x1, _) = non_transparent_bounds(&layer).unwrap();
        assert_eq!(x0, 0);
        assert!(x1 < 20);
        assert!(y0 >= 30);
    }
}
