//! Orientation normalization for freshly captured uploads
//!
//! Camera and phone uploads often store pixels in sensor order and record the
//! intended display rotation in the EXIF orientation tag (0x0112). Every later
//! stage assumes upright pixels, so this runs once per upload before anything
//! else touches it.

use crate::error::{Result, StudioError};
use crate::types::{Dimensions, PixelBuffer};
use image::imageops;
use std::io::Cursor;
use tracing::{debug, trace};

/// EXIF orientation values 1-8
///
/// ```text
///     1: Upright     2: FlipH       3: Rotate180   4: FlipV
///     5: Transpose   6: Rotate90    7: Transverse  8: Rotate270
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExifOrientation {
    #[default]
    Upright,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    /// Mirrored along the main diagonal (rotate 90° CW, then flip horizontally)
    Transpose,
    /// Rotate 90° clockwise to display
    Rotate90,
    /// Mirrored along the anti-diagonal (rotate 270° CW, then flip horizontally)
    Transverse,
    /// Rotate 270° clockwise to display
    Rotate270,
}

impl ExifOrientation {
    /// Map a raw tag value; values outside 1-8 are not orientations
    #[must_use]
    pub fn from_tag(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Upright),
            2 => Some(Self::FlipHorizontal),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipVertical),
            5 => Some(Self::Transpose),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Transverse),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }

    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            Self::Upright => 1,
            Self::FlipHorizontal => 2,
            Self::Rotate180 => 3,
            Self::FlipVertical => 4,
            Self::Transpose => 5,
            Self::Rotate90 => 6,
            Self::Transverse => 7,
            Self::Rotate270 => 8,
        }
    }

    /// Orientations 5-8 render with width and height swapped
    #[must_use]
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Rotate90 | Self::Transverse | Self::Rotate270
        )
    }

    /// Display dimensions for stored dimensions
    #[must_use]
    pub fn oriented_dimensions(self, stored: Dimensions) -> Dimensions {
        if self.swaps_dimensions() {
            Dimensions::new(stored.height, stored.width)
        } else {
            stored
        }
    }
}

/// Reads orientation metadata and re-renders uploads upright
pub struct OrientationNormalizer;

impl OrientationNormalizer {
    /// Read the EXIF orientation from encoded bytes
    ///
    /// Missing metadata, unknown containers and unparseable EXIF all read as
    /// `Upright`; this never fails.
    #[must_use]
    pub fn read_orientation(raw: &[u8]) -> ExifOrientation {
        let mut cursor = Cursor::new(raw);
        let exif = match exif::Reader::new().read_from_container(&mut cursor) {
            Ok(exif) => exif,
            Err(e) => {
                trace!("No usable EXIF metadata: {}", e);
                return ExifOrientation::Upright;
            },
        };

        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .and_then(ExifOrientation::from_tag)
            .unwrap_or_default()
    }

    /// Decode raw upload bytes into an upright buffer
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a supported image. Metadata problems
    ///   never fail this call.
    pub fn normalize(raw: &[u8]) -> Result<PixelBuffer> {
        Self::normalize_with_orientation(raw).map(|(buffer, _)| buffer)
    }

    /// Like [`normalize`](Self::normalize), also returning the orientation that was applied
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a supported image
    pub fn normalize_with_orientation(raw: &[u8]) -> Result<(PixelBuffer, ExifOrientation)> {
        let decoded = image::load_from_memory(raw)
            .map_err(|e| StudioError::image_decode_error("failed to decode upload", &e))?;
        let buffer = PixelBuffer::from_dynamic(&decoded);
        let orientation = Self::read_orientation(raw);

        if orientation != ExifOrientation::Upright {
            debug!(
                orientation = orientation.tag(),
                stored = %buffer.dimensions(),
                "Correcting upload orientation"
            );
        }

        Ok((Self::apply(&buffer, orientation), orientation))
    }

    /// Apply an orientation to an already decoded buffer
    #[must_use]
    pub fn apply(buffer: &PixelBuffer, orientation: ExifOrientation) -> PixelBuffer {
        let image = buffer.as_image();
        let oriented = match orientation {
            ExifOrientation::Upright => return buffer.clone(),
            ExifOrientation::FlipHorizontal => imageops::flip_horizontal(image),
            ExifOrientation::Rotate180 => imageops::rotate180(image),
            ExifOrientation::FlipVertical => imageops::flip_vertical(image),
            ExifOrientation::Transpose => imageops::flip_horizontal(&imageops::rotate90(image)),
            ExifOrientation::Rotate90 => imageops::rotate90(image),
            ExifOrientation::Transverse => imageops::flip_horizontal(&imageops::rotate270(image)),
            ExifOrientation::Rotate270 => imageops::rotate270(image),
        };
        PixelBuffer::from_image(oriented)
    }
}
