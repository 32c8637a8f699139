//! Image I/O operations service
//!
//! Separates file system access from the workflow so the orchestrator only
//! ever sees in-memory uploads and encoded results.

use crate::compositing::OrientationNormalizer;
use crate::config::OutputFormat;
use crate::error::{Result, StudioError};
use crate::services::OutputFormatHandler;
use crate::types::{Backdrop, Dimensions, InlineImage};
use crate::workflow::Upload;
use std::path::{Path, PathBuf};

/// Suffix appended to the item stem for finalized output files
pub const OUTPUT_SUFFIX: &str = "studio";

/// Service for reading uploads and backdrops and writing finalized images
pub struct ImageIOService;

impl ImageIOService {
    /// Read a file into an upload named after its file name
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    ///
    /// # Examples
    /// ```rust,no_run
    /// use imgly_studio::services::ImageIOService;
    ///
    /// # async fn example() -> imgly_studio::Result<()> {
    /// let upload = ImageIOService::read_upload("photos/shoe.jpg").await?;
    /// assert_eq!(upload.name, "shoe.jpg");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_upload<P: AsRef<Path>>(path: P) -> Result<Upload> {
        let path_ref = path.as_ref();
        let bytes = tokio::fs::read(path_ref)
            .await
            .map_err(|e| StudioError::file_io_error("read upload", path_ref, &e))?;
        let name = path_ref
            .file_name()
            .map_or_else(|| path_ref.display().to_string(), |n| n.to_string_lossy().into_owned());
        log::debug!("Read {} ({} bytes)", path_ref.display(), bytes.len());
        Ok(Upload::new(name, bytes))
    }

    /// Load a backdrop image, upright, identified by its file stem
    ///
    /// `canvas` declares the output size; without it the backdrop's own
    /// size is used.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Decode` if it is not a supported image
    pub async fn load_backdrop<P: AsRef<Path>>(
        path: P,
        canvas: Option<Dimensions>,
    ) -> Result<Backdrop> {
        let path_ref = path.as_ref();
        let bytes = tokio::fs::read(path_ref)
            .await
            .map_err(|e| StudioError::file_io_error("read backdrop", path_ref, &e))?;
        let buffer = OrientationNormalizer::normalize(&bytes)?;
        let id = path_ref
            .file_stem()
            .map_or_else(|| "backdrop".to_string(), |s| s.to_string_lossy().into_owned());

        Ok(match canvas {
            Some(canvas) => Backdrop::with_canvas(id, buffer, canvas),
            None => Backdrop::new(id, buffer),
        })
    }

    /// Output path for an item: `<dir>/<stem>_studio.<ext>`
    #[must_use]
    pub fn output_path<P: AsRef<Path>>(dir: P, item_name: &str, format: OutputFormat) -> PathBuf {
        let stem = Path::new(item_name)
            .file_stem()
            .map_or_else(|| item_name.to_string(), |s| s.to_string_lossy().into_owned());
        dir.as_ref().join(format!(
            "{}_{}.{}",
            stem,
            OUTPUT_SUFFIX,
            OutputFormatHandler::get_extension(format)
        ))
    }

    /// Write a finalized image into `dir` in the given format
    ///
    /// # Errors
    /// - `Io` if the directory or file cannot be written
    /// - Any conversion error from [`OutputFormatHandler::convert`]
    pub async fn save_output<P: AsRef<Path>>(
        image: &InlineImage,
        dir: P,
        item_name: &str,
        format: OutputFormat,
    ) -> Result<PathBuf> {
        let dir_ref = dir.as_ref();
        tokio::fs::create_dir_all(dir_ref)
            .await
            .map_err(|e| StudioError::file_io_error("create output directory", dir_ref, &e))?;

        let converted = OutputFormatHandler::convert(image, format)?;
        let path = Self::output_path(dir_ref, item_name, format);
        tokio::fs::write(&path, &converted.bytes)
            .await
            .map_err(|e| StudioError::file_io_error("write output", &path, &e))?;
        log::debug!("Wrote {} ({} bytes)", path.display(), converted.byte_size());
        Ok(path)
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif"
                )
            })
    }
}
