//! Mask-to-alpha conversion and cutout application

use crate::error::{Result, StudioError};
use crate::types::{InlineImage, PixelBuffer};
use image::{imageops, RgbaImage};
use tracing::debug;

/// Channel value below which a mask pixel counts as background
pub const NEAR_BLACK_THRESHOLD: u8 = 50;

/// Turns generated masks into alpha and cuts subjects out of their source
#[derive(Debug, Clone, Copy)]
pub struct AlphaMasker {
    threshold: u8,
}

impl Default for AlphaMasker {
    fn default() -> Self {
        Self {
            threshold: NEAR_BLACK_THRESHOLD,
        }
    }
}

impl AlphaMasker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Masker with a custom near-black threshold
    #[must_use]
    pub fn with_threshold(threshold: u8) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Make near-black mask pixels transparent
    ///
    /// A pixel whose R, G and B are all below the threshold gets alpha 0;
    /// every other pixel is left exactly as it was.
    #[must_use]
    pub fn mask_to_alpha(&self, mask: &PixelBuffer) -> PixelBuffer {
        let mut out = mask.as_image().clone();
        for pixel in out.pixels_mut() {
            let [r, g, b, _] = pixel.0;
            if r < self.threshold && g < self.threshold && b < self.threshold {
                pixel.0[3] = 0;
            }
        }
        PixelBuffer::from_image(out)
    }

    /// Cut `source` out with the alpha channel of `mask`
    ///
    /// The result keeps the source colors where the mask alpha is non-zero,
    /// with alpha limited by the mask alpha, and is fully transparent
    /// elsewhere. The mask is resampled to the source size when they differ.
    /// Applying the same mask again leaves the result unchanged.
    ///
    /// # Errors
    /// - `Format` when either buffer is empty
    pub fn apply_mask(&self, source: &PixelBuffer, mask: &PixelBuffer) -> Result<PixelBuffer> {
        if source.dimensions().is_empty() || mask.dimensions().is_empty() {
            return Err(StudioError::format(format!(
                "cannot apply a {} mask to a {} source",
                mask.dimensions(),
                source.dimensions()
            )));
        }

        let resized;
        let mask_image: &RgbaImage = if mask.dimensions() == source.dimensions() {
            mask.as_image()
        } else {
            debug!(
                mask = %mask.dimensions(),
                source = %source.dimensions(),
                "Resampling mask to source dimensions"
            );
            resized = imageops::resize(
                mask.as_image(),
                source.width(),
                source.height(),
                imageops::FilterType::Triangle,
            );
            &resized
        };

        let mut out = source.as_image().clone();
        for (pixel, mask_pixel) in out.pixels_mut().zip(mask_image.pixels()) {
            let alpha = pixel.0[3].min(mask_pixel.0[3]);
            if alpha == 0 {
                pixel.0 = [0, 0, 0, 0];
            } else {
                pixel.0[3] = alpha;
            }
        }
        Ok(PixelBuffer::from_image(out))
    }

    /// Finish a raw generated mask into a cutout of `source`
    ///
    /// # Errors
    /// - `Decode` when the mask bytes are not an image
    /// - `Format` when either buffer is empty
    pub fn cutout_from_mask(&self, source: &PixelBuffer, mask: &InlineImage) -> Result<PixelBuffer> {
        let mask = mask.decode()?;
        self.apply_mask(source, &self.mask_to_alpha(&mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_source() -> PixelBuffer {
        let mut data = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                data.extend_from_slice(&[(x * 60) as u8, (y * 60) as u8, 90, 255]);
            }
        }
        PixelBuffer::from_raw(4, 4, data).unwrap()
    }

    /// Left half black, right half white, opaque everywhere
    fn half_mask(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::new();
        for _ in 0..height {
            for x in 0..width {
                let v = if x < width / 2 { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        PixelBuffer::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn test_mask_to_alpha_threshold() {
        let mask = PixelBuffer::from_raw(
            4,
            1,
            [
                [49, 49, 49, 255],
                [50, 0, 0, 255],
                [10, 10, 10, 200],
                [255, 255, 255, 255],
            ]
            .concat(),
        )
        .unwrap();
        let alpha = AlphaMasker::new().mask_to_alpha(&mask);
        assert_eq!(alpha.pixel(0, 0), Some([49, 49, 49, 0]));
        assert_eq!(alpha.pixel(1, 0), Some([50, 0, 0, 255]));
        assert_eq!(alpha.pixel(2, 0), Some([10, 10, 10, 0]));
        assert_eq!(alpha.pixel(3, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_custom_threshold() {
        let mask = PixelBuffer::solid(1, 1, [80, 80, 80, 255]);
        assert_eq!(
            AlphaMasker::with_threshold(100).mask_to_alpha(&mask).pixel(0, 0),
            Some([80, 80, 80, 0])
        );
        assert_eq!(
            AlphaMasker::new().mask_to_alpha(&mask).pixel(0, 0),
            Some([80, 80, 80, 255])
        );
    }

    #[test]
    fn test_apply_mask_cuts_out_background() {
        let masker = AlphaMasker::new();
        let source = checker_source();
        let mask = masker.mask_to_alpha(&half_mask(4, 4));
        let cutout = masker.apply_mask(&source, &mask).unwrap();

        assert_eq!(cutout.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(cutout.pixel(1, 3), Some([0, 0, 0, 0]));
        assert_eq!(cutout.pixel(2, 1), source.pixel(2, 1));
        assert_eq!(cutout.pixel(3, 3), source.pixel(3, 3));
    }

    #[test]
    fn test_apply_mask_is_idempotent() {
        let masker = AlphaMasker::new();
        let source = checker_source();
        // soft mask with partial alpha values
        let mut data = Vec::new();
        for i in 0..16u32 {
            data.extend_from_slice(&[255, 255, 255, (i * 17) as u8]);
        }
        let mask = PixelBuffer::from_raw(4, 4, data).unwrap();

        let once = masker.apply_mask(&source, &mask).unwrap();
        let twice = masker.apply_mask(&once, &mask).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_mask_resamples_mismatched_mask() {
        let masker = AlphaMasker::new();
        let source = checker_source();
        let mask = masker.mask_to_alpha(&half_mask(8, 8));
        let cutout = masker.apply_mask(&source, &mask).unwrap();
        assert_eq!(cutout.dimensions(), source.dimensions());
        assert_eq!(cutout.pixel(0, 0).unwrap()[3], 0);
        assert_eq!(cutout.pixel(3, 0).unwrap()[3], 255);

        let again = masker.apply_mask(&cutout, &mask).unwrap();
        assert_eq!(cutout, again);
    }

    #[test]
    fn test_apply_mask_rejects_empty_buffers() {
        let masker = AlphaMasker::new();
        let err = masker
            .apply_mask(&PixelBuffer::transparent(0, 0), &PixelBuffer::transparent(1, 1))
            .unwrap_err();
        assert!(matches!(err, StudioError::Format(_)));
    }

    #[test]
    fn test_cutout_from_encoded_mask() {
        let masker = AlphaMasker::new();
        let source = checker_source();
        let encoded = InlineImage::png(&half_mask(4, 4)).unwrap();
        let cutout = masker.cutout_from_mask(&source, &encoded).unwrap();
        assert_eq!(cutout.pixel(0, 2).unwrap()[3], 0);
        assert_eq!(cutout.pixel(3, 2), source.pixel(3, 2));

        let garbage = InlineImage::new("image/png", vec![0, 1, 2]);
        assert!(matches!(
            masker.cutout_from_mask(&source, &garbage),
            Err(StudioError::Decode(_))
        ));
    }
}
