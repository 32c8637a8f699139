//! Layered composite assembly: backdrop, reflection, subject

use super::reflection::{premultiply, resample_window, unpremultiply};
use crate::error::{Result, StudioError};
use crate::types::{Backdrop, InlineImage, PixelBuffer, PixelRect, Rect};
use image::{imageops, RgbaImage};
use tracing::{debug, span, Level};

/// Default backdrop blur used for depth of field
pub const DEFAULT_DEPTH_OF_FIELD_RADIUS: f32 = 6.0;

/// Composes the final studio image for one item
#[derive(Debug, Clone, Copy)]
pub struct CompositeAssembler {
    depth_of_field_radius: f32,
}

impl Default for CompositeAssembler {
    fn default() -> Self {
        Self {
            depth_of_field_radius: DEFAULT_DEPTH_OF_FIELD_RADIUS,
        }
    }
}

impl CompositeAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler with a custom backdrop blur sigma for depth of field
    #[must_use]
    pub fn with_depth_of_field_radius(radius: f32) -> Self {
        Self {
            depth_of_field_radius: radius.max(0.0),
        }
    }

    #[must_use]
    pub fn depth_of_field_radius(&self) -> f32 {
        self.depth_of_field_radius
    }

    /// Compose backdrop, optional reflection and subject into one canvas
    ///
    /// Layers are drawn back to front: the backdrop resized to its declared
    /// canvas, the reflection layer, then the subject scaled into `rect`.
    /// With `add_depth_of_field` the backdrop is blurred before anything is
    /// drawn over it, so the subject and reflection stay sharp.
    ///
    /// # Errors
    /// - `Format` if the subject has no transparent pixel (not a cutout)
    /// - `Format` if the reflection layer does not match the canvas size
    /// - `Format` if the canvas is empty
    pub fn assemble(
        &self,
        backdrop: &Backdrop,
        subject: &PixelBuffer,
        reflection: Option<&PixelBuffer>,
        rect: &Rect,
        add_depth_of_field: bool,
    ) -> Result<PixelBuffer> {
        let canvas = backdrop.canvas;
        if canvas.is_empty() {
            return Err(StudioError::format(format!(
                "backdrop '{}' declares an empty {} canvas",
                backdrop.id, canvas
            )));
        }
        if subject.dimensions().is_empty() || !subject.has_transparency() {
            return Err(StudioError::format(format!(
                "subject {} has no transparent pixels; expected a cutout",
                subject.dimensions()
            )));
        }
        if let Some(layer) = reflection {
            if layer.dimensions() != canvas {
                return Err(StudioError::format(format!(
                    "reflection layer is {} but the canvas is {}",
                    layer.dimensions(),
                    canvas
                )));
            }
        }

        let _span = span!(
            Level::DEBUG,
            "assemble",
            backdrop = %backdrop.id,
            canvas = %canvas,
            depth_of_field = add_depth_of_field
        )
        .entered();

        let mut surface = if backdrop.buffer.dimensions() == canvas {
            backdrop.buffer.as_image().clone()
        } else {
            debug!(
                from = %backdrop.buffer.dimensions(),
                to = %canvas,
                "Resizing backdrop to declared canvas"
            );
            resize_straight_alpha(backdrop.buffer.as_image(), canvas.width, canvas.height)
        };

        if add_depth_of_field && self.depth_of_field_radius > 0.0 {
            premultiply(&mut surface);
            surface = imageops::blur(&surface, self.depth_of_field_radius);
            unpremultiply(&mut surface);
        }

        if let Some(layer) = reflection {
            draw_over(&mut surface, layer.as_image(), 0, 0);
        }

        let target = rect.to_pixel_rect();
        if target.is_empty() {
            debug!("Subject rectangle rounds to nothing, skipping subject layer");
        } else {
            draw_subject(&mut surface, subject, target);
        }

        Ok(PixelBuffer::from_image(surface))
    }

    /// Assemble and encode losslessly as PNG
    ///
    /// # Errors
    /// - Same as [`assemble`](Self::assemble), plus `Internal` if encoding fails
    pub fn assemble_encoded(
        &self,
        backdrop: &Backdrop,
        subject: &PixelBuffer,
        reflection: Option<&PixelBuffer>,
        rect: &Rect,
        add_depth_of_field: bool,
    ) -> Result<InlineImage> {
        let composite = self.assemble(backdrop, subject, reflection, rect, add_depth_of_field)?;
        InlineImage::png(&composite)
    }
}

/// Scale the subject into `target` and draw it
///
/// Targets larger than the canvas are resampled only where they overlap it.
fn draw_subject(surface: &mut RgbaImage, subject: &PixelBuffer, target: PixelRect) {
    if subject.width() == target.width && subject.height() == target.height {
        draw_over(surface, subject.as_image(), target.x, target.y);
        return;
    }

    let canvas = PixelRect {
        x: 0,
        y: 0,
        width: surface.width(),
        height: surface.height(),
    };
    if target.area() <= canvas.area() {
        let scaled = resize_straight_alpha(subject.as_image(), target.width, target.height);
        draw_over(surface, &scaled, target.x, target.y);
        return;
    }

    let Some(visible) = target.intersect(&canvas) else {
        debug!("Subject lies entirely off the canvas");
        return;
    };
    let window = PixelRect {
        x: visible.x - target.x,
        y: visible.y - target.y,
        ..visible
    };
    let patch = resample_window(subject.as_image(), target.width, target.height, window);
    draw_over(surface, &patch, visible.x, visible.y);
}

/// Resample in premultiplied space so transparent regions do not darken edges
fn resize_straight_alpha(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut premultiplied = image.clone();
    premultiply(&mut premultiplied);
    let mut resized = imageops::resize(&premultiplied, width, height, imageops::FilterType::Triangle);
    unpremultiply(&mut resized);
    resized
}

/// Source-over draw of `layer` with its top-left at (`left`, `top`), clipped to the surface
fn draw_over(surface: &mut RgbaImage, layer: &RgbaImage, left: i64, top: i64) {
    let (sw, sh) = (i64::from(surface.width()), i64::from(surface.height()));
    for (x, y, src) in layer.enumerate_pixels() {
        let cx = left + i64::from(x);
        let cy = top + i64::from(y);
        if cx < 0 || cy < 0 || cx >= sw || cy >= sh {
            continue;
        }
        let dst = surface.get_pixel_mut(cx as u32, cy as u32);
        dst.0 = blend_over(dst.0, src.0);
    }
}

fn blend_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    match src[3] {
        0 => dst,
        255 => src,
        sa => {
            let sa = f32::from(sa) / 255.0;
            let da = f32::from(dst[3]) / 255.0;
            let out_a = sa + da * (1.0 - sa);
            let mut out = [0u8; 4];
            for i in 0..3 {
                let c = (f32::from(src[i]) * sa + f32::from(dst[i]) * da * (1.0 - sa)) / out_a;
                out[i] = c.round().clamp(0.0, 255.0) as u8;
            }
            out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
            out
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];

    /// Opaque red subject with one transparent corner so it counts as a cutout
    fn red_cutout(size: u32) -> PixelBuffer {
        let mut image = RgbaImage::from_pixel(size, size, image::Rgba(RED));
        image.put_pixel(size - 1, size - 1, image::Rgba([0, 0, 0, 0]));
        PixelBuffer::from_image(image)
    }

    fn checkerboard(size: u32) -> PixelBuffer {
        let mut image = RgbaImage::new(size, size);
        for (x, y, p) in image.enumerate_pixels_mut() {
            let v = if (x + y) % 2 == 0 { 0 } else { 255 };
            p.0 = [v, v, v, 255];
        }
        PixelBuffer::from_image(image)
    }

    #[test]
    fn test_draw_order() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(100, 100, BLUE));
        let mut reflection = RgbaImage::new(100, 100);
        for y in 60..90 {
            for x in 10..60 {
                reflection.put_pixel(x, y, image::Rgba(GREEN));
            }
        }
        let reflection = PixelBuffer::from_image(reflection);
        let rect = Rect::new(10.0, 10.0, 50.0, 50.0);

        let out = CompositeAssembler::new()
            .assemble(&backdrop, &red_cutout(50), Some(&reflection), &rect, false)
            .unwrap();
        assert_eq!(out.dimensions(), Dimensions::new(100, 100));

        for (x, y, p) in out.as_image().enumerate_pixels() {
            let in_subject = (10..60).contains(&x) && (10..60).contains(&y);
            let in_reflection = (10..60).contains(&x) && (60..90).contains(&y);
            let expected = if (x, y) == (59, 59) {
                BLUE
            } else if in_subject {
                RED
            } else if in_reflection {
                GREEN
            } else {
                BLUE
            };
            assert_eq!(p.0, expected, "pixel ({}, {})", x, y);
        }
    }

    #[test]
    fn test_subject_is_drawn_over_reflection() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(20, 20, BLUE));
        let reflection = PixelBuffer::solid(20, 20, GREEN);
        let rect = Rect::new(5.0, 5.0, 4.0, 4.0);
        let out = CompositeAssembler::new()
            .assemble(&backdrop, &red_cutout(4), Some(&reflection), &rect, false)
            .unwrap();
        assert_eq!(out.pixel(6, 6), Some(RED));
        assert_eq!(out.pixel(0, 0), Some(GREEN));
    }

    #[test]
    fn test_depth_of_field_blurs_backdrop_only() {
        let backdrop = Backdrop::new("checker", checkerboard(64));
        let subject = red_cutout(32);
        let rect = Rect::new(16.0, 16.0, 32.0, 32.0);
        let assembler = CompositeAssembler::new();

        let sharp = assembler.assemble(&backdrop, &subject, None, &rect, false).unwrap();
        let blurred = assembler.assemble(&backdrop, &subject, None, &rect, true).unwrap();

        for y in 16..48 {
            for x in 16..48 {
                if (x, y) == (47, 47) {
                    continue;
                }
                assert_eq!(blurred.pixel(x, y), Some(RED), "subject pixel ({}, {})", x, y);
            }
        }

        let outside = blurred.pixel(4, 4).unwrap();
        assert_ne!(Some(outside), sharp.pixel(4, 4));
        assert!(outside[0] > 40 && outside[0] < 215, "blurred value {}", outside[0]);
    }

    #[test]
    fn test_subject_taller_than_canvas_is_clipped_before_scaling() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(100, 100, BLUE));
        let mut sliver = RgbaImage::from_pixel(2, 2000, image::Rgba(RED));
        sliver.put_pixel(0, 0, image::Rgba([0, 0, 0, 0]));
        // Ten million rows tall with the bottom edge halfway down the canvas
        let rect = Rect::new(0.0, -9_999_950.0, 100.0, 10_000_000.0);

        let out = CompositeAssembler::new()
            .assemble(&backdrop, &PixelBuffer::from_image(sliver), None, &rect, false)
            .unwrap();

        assert_eq!(out.dimensions(), Dimensions::new(100, 100));
        for x in [0, 50, 99] {
            assert_eq!(out.pixel(x, 0), Some(RED));
            assert_eq!(out.pixel(x, 48), Some(RED));
            assert_eq!(out.pixel(x, 51), Some(BLUE));
            assert_eq!(out.pixel(x, 99), Some(BLUE));
        }
    }

    #[test]
    fn test_opaque_subject_is_rejected() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(10, 10, BLUE));
        let photo = PixelBuffer::solid(4, 4, RED);
        let err = CompositeAssembler::new()
            .assemble(&backdrop, &photo, None, &Rect::new(0.0, 0.0, 4.0, 4.0), false)
            .unwrap_err();
        assert!(matches!(err, StudioError::Format(_)));
    }

    #[test]
    fn test_mismatched_reflection_is_rejected() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(10, 10, BLUE));
        let reflection = PixelBuffer::transparent(5, 5);
        let err = CompositeAssembler::new()
            .assemble(
                &backdrop,
                &red_cutout(4),
                Some(&reflection),
                &Rect::new(0.0, 0.0, 4.0, 4.0),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StudioError::Format(_)));
    }

    #[test]
    fn test_backdrop_is_resized_to_declared_canvas() {
        let backdrop = Backdrop::with_canvas(
            "small",
            PixelBuffer::solid(10, 10, BLUE),
            Dimensions::new(40, 30),
        );
        let out = CompositeAssembler::new()
            .assemble(&backdrop, &red_cutout(4), None, &Rect::new(-2.0, -2.0, 4.0, 4.0), false)
            .unwrap();
        assert_eq!(out.dimensions(), Dimensions::new(40, 30));
        assert_eq!(out.pixel(0, 0), Some(RED));
        assert_eq!(out.pixel(39, 29), Some(BLUE));
    }

    #[test]
    fn test_subject_is_scaled_into_rect() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(50, 50, BLUE));
        let out = CompositeAssembler::new()
            .assemble(&backdrop, &red_cutout(8), None, &Rect::new(10.0, 10.0, 24.0, 24.0), false)
            .unwrap();
        assert_eq!(out.pixel(12, 12), Some(RED));
        assert_eq!(out.pixel(9, 9), Some(BLUE));
        assert_eq!(out.pixel(34, 20), Some(BLUE));
    }

    #[test]
    fn test_semi_transparent_blend() {
        assert_eq!(blend_over([0, 0, 255, 255], [255, 0, 0, 0]), [0, 0, 255, 255]);
        assert_eq!(blend_over([0, 0, 0, 255], [255, 255, 255, 128]), [128, 128, 128, 255]);
        assert_eq!(blend_over([0, 0, 0, 0], [200, 100, 50, 100]), [200, 100, 50, 100]);
    }

    #[test]
    fn test_encoded_output_is_lossless_png() {
        let backdrop = Backdrop::new("blue", PixelBuffer::solid(10, 10, BLUE));
        let rect = Rect::new(2.0, 2.0, 4.0, 4.0);
        let assembler = CompositeAssembler::new();
        let encoded = assembler
            .assemble_encoded(&backdrop, &red_cutout(4), None, &rect, false)
            .unwrap();
        assert_eq!(encoded.mime, "image/png");
        let direct = assembler.assemble(&backdrop, &red_cutout(4), None, &rect, false).unwrap();
        assert_eq!(encoded.decode().unwrap(), direct);
    }
}
