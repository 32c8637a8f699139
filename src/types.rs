//! Core data types shared by the compositing pipeline and the workflow

use crate::compositing::ExifOrientation;
use crate::error::{Result, StudioError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;

/// Immutable RGBA8 raster, row-major, the unit of all local image math
///
/// Every transform produces a new buffer. Clones share the underlying pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    image: Arc<RgbaImage>,
}

impl PixelBuffer {
    /// Wrap an owned RGBA image
    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Convert any decoded image into an RGBA buffer
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_image(image.to_rgba8())
    }

    /// Build a buffer from raw row-major RGBA bytes
    ///
    /// # Errors
    /// - `Format` when the byte count does not match `width * height * 4`
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let len = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::from_image)
            .ok_or_else(|| {
                StudioError::format(format!(
                    "RGBA data of {} bytes does not fit a {}x{} buffer",
                    len, width, height
                ))
            })
    }

    /// Fully transparent buffer
    #[must_use]
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    /// Buffer filled with a single color
    #[must_use]
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.image.width(), self.image.height())
    }

    /// Borrow the underlying image for read-only processing
    #[must_use]
    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw row-major RGBA bytes
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Take the pixels out, copying only if the buffer is shared
    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.image).unwrap_or_else(|shared| (*shared).clone())
    }

    /// RGBA value at a coordinate, `None` when out of bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x < self.width() && y < self.height() {
            Some(self.image.get_pixel(x, y).0)
        } else {
            None
        }
    }

    /// Whether at least one pixel is not fully opaque
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        self.image.pixels().any(|p| p.0[3] < u8::MAX)
    }

    /// Whether every pixel has zero alpha
    #[must_use]
    pub fn is_fully_transparent(&self) -> bool {
        self.image.pixels().all(|p| p.0[3] == 0)
    }

    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgba8((*self.image).clone())
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height, `None` for empty dimensions
    #[must_use]
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }

    #[must_use]
    pub fn longest_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Scale down so the longest edge is at most `max_edge`, keeping aspect ratio.
    /// Never upscales.
    #[must_use]
    pub fn fit_within(&self, max_edge: u32) -> Self {
        let longest = self.longest_edge();
        if longest <= max_edge || longest == 0 {
            return *self;
        }
        let scale = f64::from(max_edge) / f64::from(longest);
        Self {
            width: ((f64::from(self.width) * scale).round() as u32).max(1),
            height: ((f64::from(self.height) * scale).round() as u32).max(1),
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sub-pixel rectangle in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Snap edges to the pixel grid. Edges are rounded independently so
    /// adjacent rectangles stay adjacent.
    #[must_use]
    pub fn to_pixel_rect(&self) -> PixelRect {
        let left = self.x.round() as i64;
        let top = self.y.round() as i64;
        let right = self.right().round() as i64;
        let bottom = self.bottom().round() as i64;
        PixelRect {
            x: left,
            y: top,
            width: (right - left).max(0) as u32,
            height: (bottom - top).max(0) as u32,
        }
    }
}

/// Integer rectangle, may lie partially or fully outside a canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn bottom(&self) -> i64 {
        self.y + i64::from(self.height)
    }

    #[must_use]
    pub fn right(&self) -> i64 {
        self.x + i64::from(self.width)
    }

    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Overlap of two rectangles, `None` when they do not touch
    #[must_use]
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelRect {
            x: left,
            y: top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Normalized subject placement on a canvas
///
/// `x`/`y` are the fraction of canvas width/height at which the subject's
/// center is anchored; `scale` is the rendered subject width as a fraction
/// of canvas width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            scale: 0.5,
        }
    }
}

impl Placement {
    /// Create a validated placement
    ///
    /// # Errors
    /// - `InvalidConfig` when `x`/`y` are outside [0,1] or `scale` outside (0,1]
    pub fn new(x: f64, y: f64, scale: f64) -> Result<Self> {
        let placement = Self { x, y, scale };
        placement.validate()?;
        Ok(placement)
    }

    /// Clamp raw interactive input into the valid range
    #[must_use]
    pub fn clamped(x: f64, y: f64, scale: f64) -> Self {
        let sanitize = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        Self {
            x: sanitize(x, 0.5).clamp(0.0, 1.0),
            y: sanitize(y, 0.5).clamp(0.0, 1.0),
            scale: sanitize(scale, 0.5).clamp(f64::EPSILON, 1.0),
        }
    }

    /// Check field ranges
    ///
    /// # Errors
    /// - `InvalidConfig` describing the first out-of-range field
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.x) {
            return Err(StudioError::config_value_error(
                "placement x",
                self.x,
                "0.0-1.0",
                Some(0.5),
            ));
        }
        if !(0.0..=1.0).contains(&self.y) {
            return Err(StudioError::config_value_error(
                "placement y",
                self.y,
                "0.0-1.0",
                Some(0.5),
            ));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(StudioError::config_value_error(
                "placement scale",
                self.scale,
                "(0.0, 1.0]",
                Some(0.5),
            ));
        }
        Ok(())
    }
}

/// Backdrop image plus the canvas size it is declared for
#[derive(Debug, Clone)]
pub struct Backdrop {
    /// Identifier used by the preview CDN and the library backend
    pub id: String,
    pub buffer: PixelBuffer,
    pub canvas: Dimensions,
}

impl Backdrop {
    /// Backdrop whose canvas matches its own pixel size
    pub fn new<S: Into<String>>(id: S, buffer: PixelBuffer) -> Self {
        let canvas = buffer.dimensions();
        Self {
            id: id.into(),
            buffer,
            canvas,
        }
    }

    /// Backdrop rendered onto an explicitly declared canvas size
    pub fn with_canvas<S: Into<String>>(id: S, buffer: PixelBuffer, canvas: Dimensions) -> Self {
        Self {
            id: id.into(),
            buffer,
            canvas,
        }
    }
}

/// Self-describing encoded image: MIME type plus encoded bytes
#[derive(Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    pub fn new<S: Into<String>>(mime: S, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Wrap raw upload bytes, sniffing the MIME type from content
    #[must_use]
    pub fn sniff(bytes: Vec<u8>) -> Self {
        let mime = image::guess_format(&bytes)
            .map_or("application/octet-stream", |format| format.to_mime_type());
        Self::new(mime, bytes)
    }

    /// Encode a buffer losslessly as PNG
    ///
    /// # Errors
    /// - `Internal` if the PNG encoder fails
    pub fn png(buffer: &PixelBuffer) -> Result<Self> {
        let mut bytes = Vec::new();
        buffer
            .as_image()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| StudioError::internal(format!("PNG encoding failed: {}", e)))?;
        Ok(Self::new("image/png", bytes))
    }

    /// Encode a buffer as JPEG, dropping alpha
    ///
    /// # Errors
    /// - `Internal` if the JPEG encoder fails
    pub fn jpeg(buffer: &PixelBuffer, quality: u8) -> Result<Self> {
        let rgb = DynamicImage::ImageRgba8(buffer.as_image().clone()).to_rgb8();
        let mut bytes = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
        encoder
            .encode_image(&rgb)
            .map_err(|e| StudioError::internal(format!("JPEG encoding failed: {}", e)))?;
        Ok(Self::new("image/jpeg", bytes))
    }

    /// Parse a `data:<mime>;base64,<payload>` URL
    ///
    /// # Errors
    /// - `Decode` if the URL is not a base64 data URL
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| StudioError::decode("inline image is not a data URL"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StudioError::decode("data URL has no payload separator"))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| StudioError::decode("data URL payload is not base64 encoded"))?;
        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| StudioError::decode(format!("invalid base64 payload: {}", e)))?;
        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        Ok(Self::new(mime, bytes))
    }

    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }

    /// Decode into a pixel buffer without any orientation handling
    ///
    /// # Errors
    /// - `Decode` if the bytes are not a supported image
    pub fn decode(&self) -> Result<PixelBuffer> {
        image::load_from_memory(&self.bytes)
            .map(|img| PixelBuffer::from_dynamic(&img))
            .map_err(|e| StudioError::image_decode_error("failed to decode inline image", &e))
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    /// Short type tag derived from the MIME type (`png`, `jpeg`, ...)
    #[must_use]
    pub fn type_tag(&self) -> &str {
        self.mime.rsplit('/').next().unwrap_or(self.mime.as_str())
    }
}

impl std::fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Facts gathered about an upload during analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAnalysis {
    /// Upright dimensions after orientation correction
    pub dimensions: Dimensions,
    /// Encoded upload size in bytes
    pub byte_size: usize,
    pub mime: String,
    pub orientation: ExifOrientation,
}
