//! Boundaries to the external collaborators
//!
//! The orchestrator only talks to services through these traits. Concrete
//! HTTP, CDN and offline implementations live in [`crate::backends`].

use crate::error::Result;
use crate::types::{Dimensions, InlineImage, Placement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a background-removal service handed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutput {
    /// Finished RGBA cutout
    Cutout(InlineImage),
    /// Raw mask, black where the background was, to be finished locally
    Mask(InlineImage),
}

/// Background-removal collaborator
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Service name used in logs and `ServiceFailure` errors
    fn name(&self) -> &str;

    /// Remove the background from one encoded image
    ///
    /// # Errors
    /// - `ServiceFailure` for any non-success response, malformed payload or timeout
    async fn remove_background(&self, item: &str, image: &InlineImage) -> Result<RemovalOutput>;
}

/// Generative compositing and enhancement collaborator
#[async_trait]
pub trait GenerativeCompositor: Send + Sync {
    fn name(&self) -> &str;

    /// Render a contact shadow under a cutout, returning the subject with its
    /// shadow on a transparent background
    ///
    /// # Errors
    /// - `ServiceFailure` for any non-success response or timeout
    async fn render_shadow(&self, item: &str, cutout: &InlineImage) -> Result<InlineImage>;

    /// Enhance a composite guided by a reference image
    ///
    /// Returns `Ok(None)` when the service answered without an image payload;
    /// callers then keep the pre-enhancement composite.
    ///
    /// # Errors
    /// - `ServiceFailure` for any non-success response or timeout
    async fn enhance(
        &self,
        item: &str,
        composite: &InlineImage,
        guidance: &InlineImage,
    ) -> Result<Option<InlineImage>>;
}

/// Metadata stored alongside a finalized image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    pub name: String,
    pub dimensions: Dimensions,
    pub byte_size: usize,
    /// Short type tag such as `png`
    pub type_tag: String,
    /// Hex SHA-256 of the encoded bytes
    pub checksum: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl LibraryMetadata {
    #[must_use]
    pub fn describe(name: &str, image: &InlineImage, dimensions: Dimensions, session_id: &str) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            byte_size: image.byte_size(),
            type_tag: image.type_tag().to_string(),
            checksum: checksum_hex(&image.bytes),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`
#[must_use]
pub fn checksum_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Persisted-library collaborator
#[async_trait]
pub trait LibraryStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store a finalized image, returning its library identifier
    ///
    /// # Errors
    /// - `ServiceFailure` when the backend rejects or cannot be reached
    async fn store(&self, image: &InlineImage, metadata: &LibraryMetadata) -> Result<String>;
}

/// Instant preview URLs from an image-transformation CDN
pub trait PreviewRenderer: Send + Sync {
    /// Build a preview URL showing `subject_id` on `backdrop_id`
    ///
    /// # Errors
    /// - `InvalidConfig` when the renderer's base URL is unusable
    fn preview_url(
        &self,
        backdrop_id: &str,
        subject_id: &str,
        placement: &Placement,
        canvas: Dimensions,
    ) -> Result<String>;
}
