//! Configuration types for studio workflows

use crate::compositing::{ReflectionOptions, DEFAULT_DEPTH_OF_FIELD_RADIUS, NEAR_BLACK_THRESHOLD};
use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "IMGLY_STUDIO_API_KEY";

/// Maximum number of simultaneously pending external calls per group
pub const MAX_GROUP_SIZE: usize = 8;

/// Lossless output formats for finalized images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// TIFF with alpha channel transparency
    Tiff,
    /// Lossless WebP with alpha channel transparency
    WebP,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Tiff => write!(f, "tiff"),
            Self::WebP => write!(f, "webp"),
        }
    }
}

/// Thresholds and settings for the optional `Compressing` stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// Uploads larger than this many encoded bytes are compressed
    pub max_upload_bytes: usize,

    /// Uploads whose longest edge exceeds this are downscaled
    pub max_dimension: u32,

    /// JPEG quality (1-100) for compressed uploads
    pub jpeg_quality: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: 4 * 1024 * 1024,
            max_dimension: 2048,
            jpeg_quality: 85,
        }
    }
}

/// Endpoints and credentials for the external collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub removal_url: Option<String>,
    pub compositing_url: Option<String>,
    pub library_url: Option<String>,

    /// Base URL of the image-transformation CDN used for instant previews
    pub cdn_base_url: Option<String>,

    /// API key sent as a bearer token. Falls back to `IMGLY_STUDIO_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            removal_url: None,
            compositing_url: None,
            library_url: None,
            cdn_base_url: None,
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// Configured API key, or the one from the environment
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for a batch workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Items dispatched to an external service at once
    pub group_size: usize,

    pub compression: CompressionOptions,

    /// Longest edge of `Previewing` thumbnails
    pub preview_max_dimension: u32,

    /// Near-black threshold used when finishing raw masks
    pub mask_threshold: u8,

    /// Draw a synthesized reflection below each subject
    pub enable_reflection: bool,

    pub reflection: ReflectionOptions,

    /// Blur the backdrop behind the subject
    pub depth_of_field: bool,

    /// Gaussian sigma for the depth-of-field backdrop blur
    pub depth_of_field_radius: f32,

    /// Ask the compositing service for a contact shadow
    pub contact_shadow: bool,

    /// Run the optional AI enhancement pass
    pub enhance: bool,

    /// Send finalized images to the library backend
    pub persist_results: bool,

    /// Encoding used when writing finalized images to disk
    pub output_format: OutputFormat,

    pub services: ServiceConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            group_size: 2,
            compression: CompressionOptions::default(),
            preview_max_dimension: 512,
            mask_threshold: NEAR_BLACK_THRESHOLD,
            enable_reflection: true,
            reflection: ReflectionOptions::default(),
            depth_of_field: false,
            depth_of_field_radius: DEFAULT_DEPTH_OF_FIELD_RADIUS,
            contact_shadow: false,
            enhance: false,
            persist_results: false,
            output_format: OutputFormat::default(),
            services: ServiceConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use imgly_studio::WorkflowConfig;
    ///
    /// let config = WorkflowConfig::builder()
    ///     .group_size(3)
    ///     .depth_of_field(true)
    ///     .enhance(true)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.group_size, 3);
    /// ```
    #[must_use]
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `InvalidConfig` for a group size outside 1-8
    /// - `InvalidConfig` for a JPEG quality outside 1-100
    /// - `InvalidConfig` for zero thresholds or dimensions
    /// - `InvalidConfig` for invalid reflection options
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_GROUP_SIZE).contains(&self.group_size) {
            return Err(StudioError::config_value_error(
                "group size",
                self.group_size,
                "1-8",
                Some(2),
            ));
        }

        if !(1..=100).contains(&self.compression.jpeg_quality) {
            return Err(StudioError::config_value_error(
                "JPEG quality",
                self.compression.jpeg_quality,
                "1-100",
                Some(85),
            ));
        }

        if self.compression.max_dimension == 0 {
            return Err(StudioError::config_value_error(
                "max dimension",
                self.compression.max_dimension,
                ">= 1",
                Some(2048),
            ));
        }

        if self.compression.max_upload_bytes == 0 {
            return Err(StudioError::config_value_error(
                "max upload bytes",
                self.compression.max_upload_bytes,
                ">= 1",
                Some(4 * 1024 * 1024),
            ));
        }

        if self.preview_max_dimension == 0 {
            return Err(StudioError::config_value_error(
                "preview max dimension",
                self.preview_max_dimension,
                ">= 1",
                Some(512),
            ));
        }

        if !(self.depth_of_field_radius.is_finite() && self.depth_of_field_radius >= 0.0) {
            return Err(StudioError::config_value_error(
                "depth of field radius",
                self.depth_of_field_radius,
                ">= 0.0",
                Some(DEFAULT_DEPTH_OF_FIELD_RADIUS),
            ));
        }

        if self.services.timeout_secs == 0 {
            return Err(StudioError::config_value_error(
                "service timeout",
                self.services.timeout_secs,
                ">= 1 second",
                Some(60),
            ));
        }

        self.reflection.validate()
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `InvalidConfig` if the JSON is malformed or fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StudioError::file_io_error("read config", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            StudioError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    ///
    /// # Errors
    /// - `Io` if the file or its parent directory cannot be written
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StudioError::file_io_error("create config directory", parent, &e))?;
            }
        }
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| StudioError::file_io_error("write config", path, &e))
    }

    /// Pretty-printed JSON representation
    ///
    /// # Errors
    /// - `Internal` if serialization fails
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StudioError::internal(format!("config serialization failed: {}", e)))
    }

    /// `<config dir>/imgly-studio/config.json`, if the platform has a config dir
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgly-studio").join("config.json"))
    }
}

/// Builder for `WorkflowConfig`
#[derive(Debug, Default)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn from_config(config: WorkflowConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.config.group_size = group_size;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: CompressionOptions) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set JPEG quality for compressed uploads
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.compression.jpeg_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn preview_max_dimension(mut self, max: u32) -> Self {
        self.config.preview_max_dimension = max;
        self
    }

    #[must_use]
    pub fn mask_threshold(mut self, threshold: u8) -> Self {
        self.config.mask_threshold = threshold;
        self
    }

    #[must_use]
    pub fn reflection(mut self, enabled: bool) -> Self {
        self.config.enable_reflection = enabled;
        self
    }

    #[must_use]
    pub fn reflection_options(mut self, options: ReflectionOptions) -> Self {
        self.config.reflection = options;
        self
    }

    #[must_use]
    pub fn depth_of_field(mut self, enabled: bool) -> Self {
        self.config.depth_of_field = enabled;
        self
    }

    #[must_use]
    pub fn depth_of_field_radius(mut self, radius: f32) -> Self {
        self.config.depth_of_field_radius = radius;
        self
    }

    #[must_use]
    pub fn contact_shadow(mut self, enabled: bool) -> Self {
        self.config.contact_shadow = enabled;
        self
    }

    #[must_use]
    pub fn enhance(mut self, enabled: bool) -> Self {
        self.config.enhance = enabled;
        self
    }

    #[must_use]
    pub fn persist_results(mut self, enabled: bool) -> Self {
        self.config.persist_results = enabled;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn services(mut self, services: ServiceConfig) -> Self {
        self.config.services = services;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any error reported by [`WorkflowConfig::validate`]
    pub fn build(self) -> Result<WorkflowConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
