//! Output format handling service
//!
//! Finalized images are kept as PNG in memory; this service re-encodes them
//! into the configured lossless output format when they are written out.

use crate::config::OutputFormat;
use crate::error::{Result, StudioError};
use crate::types::{InlineImage, PixelBuffer};
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;

/// Service for lossless output encodings
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode a buffer in the given output format
    ///
    /// # Errors
    /// - `InvalidConfig` for WebP when the crate is built without `webp-support`
    /// - `Internal` if the encoder fails
    ///
    /// # Examples
    /// ```rust
    /// use imgly_studio::{services::OutputFormatHandler, OutputFormat, PixelBuffer};
    ///
    /// let buffer = PixelBuffer::solid(4, 4, [255, 0, 0, 128]);
    /// let encoded = OutputFormatHandler::encode(&buffer, OutputFormat::Tiff)?;
    /// assert_eq!(encoded.mime, "image/tiff");
    /// # Ok::<(), imgly_studio::StudioError>(())
    /// ```
    pub fn encode(buffer: &PixelBuffer, format: OutputFormat) -> Result<InlineImage> {
        let mut bytes = Vec::new();
        match format {
            OutputFormat::Png => return InlineImage::png(buffer),
            OutputFormat::Tiff => buffer
                .as_image()
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Tiff)
                .map_err(|e| StudioError::internal(format!("TIFF encoding failed: {}", e)))?,
            OutputFormat::WebP => Self::encode_webp(buffer, &mut bytes)?,
        }
        Ok(InlineImage::new(Self::mime_type(format), bytes))
    }

    #[cfg(feature = "webp-support")]
    fn encode_webp(buffer: &PixelBuffer, bytes: &mut Vec<u8>) -> Result<()> {
        use image::ImageEncoder;

        image::codecs::webp::WebPEncoder::new_lossless(bytes)
            .write_image(
                buffer.as_raw(),
                buffer.width(),
                buffer.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| StudioError::internal(format!("WebP encoding failed: {}", e)))
    }

    #[cfg(not(feature = "webp-support"))]
    fn encode_webp(_buffer: &PixelBuffer, _bytes: &mut Vec<u8>) -> Result<()> {
        Err(StudioError::invalid_config(
            "WebP output requires the webp-support feature",
        ))
    }

    /// Convert an encoded image into `format`, passing it through when it
    /// already has the right MIME type
    ///
    /// # Errors
    /// - `Decode` if the image has to be converted and cannot be decoded
    /// - Any error from [`Self::encode`]
    pub fn convert(image: &InlineImage, format: OutputFormat) -> Result<InlineImage> {
        if image.mime == Self::mime_type(format) {
            return Ok(image.clone());
        }
        Self::encode(&image.decode()?, format)
    }

    /// Get the file extension for a given output format (without the dot)
    ///
    /// # Examples
    /// ```rust
    /// use imgly_studio::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Tiff), "tiff");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    #[must_use]
    pub fn mime_type(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Tiff => "image/tiff",
        }
    }

    /// Guess an output format from a file extension
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<OutputFormat> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::WebP),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translucent() -> PixelBuffer {
        PixelBuffer::solid(3, 2, [10, 200, 30, 77])
    }

    #[test]
    fn test_lossless_formats_keep_alpha() {
        for format in [OutputFormat::Png, OutputFormat::Tiff] {
            let encoded = OutputFormatHandler::encode(&translucent(), format).unwrap();
            assert_eq!(encoded.mime, OutputFormatHandler::mime_type(format));
            assert_eq!(encoded.decode().unwrap(), translucent(), "{format} must be lossless");
        }
    }

    #[cfg(feature = "webp-support")]
    #[test]
    fn test_webp_is_lossless() {
        let encoded = OutputFormatHandler::encode(&translucent(), OutputFormat::WebP).unwrap();
        assert_eq!(encoded.mime, "image/webp");
        assert_eq!(encoded.decode().unwrap(), translucent());
    }

    #[test]
    fn test_convert_passes_matching_format_through() {
        let png = InlineImage::png(&translucent()).unwrap();
        let same = OutputFormatHandler::convert(&png, OutputFormat::Png).unwrap();
        assert_eq!(same.bytes, png.bytes);

        let tiff = OutputFormatHandler::convert(&png, OutputFormat::Tiff).unwrap();
        assert_eq!(tiff.mime, "image/tiff");
    }

    #[test]
    fn test_extensions_and_paths() {
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::WebP), "webp");
        assert_eq!(
            OutputFormatHandler::from_path("out/shoe.TIF"),
            Some(OutputFormat::Tiff)
        );
        assert_eq!(OutputFormatHandler::from_path("out/shoe.jpg"), None);
        assert_eq!(OutputFormatHandler::from_path("out/shoe"), None);
    }
}
