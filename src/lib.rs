#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY Studio
//!
//! Studio-style product photography for whole batches of uploads: remove the
//! background, place the subject on a backdrop, add a mirrored floor
//! reflection, optional depth of field and contact shadow, and optionally
//! hand the result to a generative enhancement service.
//!
//! ## Features
//!
//! - **Stage-Synchronous Workflow**: every item finishes a stage before the
//!   batch moves on, so the batch can be reviewed and retried stage by stage
//! - **Bounded Concurrency**: external calls run in groups of at most
//!   `group_size` (1-8)
//! - **Partial Failure**: a failed item is recorded and skipped; its siblings
//!   keep going and it can be retried later
//! - **Local Compositing**: EXIF orientation, mask finishing, placement,
//!   reflection synthesis and layer assembly are pure Rust
//! - **Pluggable Services**: HTTP clients, a CDN preview builder and an
//!   offline mask-directory remover behind async traits
//! - **Lossless Output**: PNG, TIFF and WebP with alpha preserved
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_studio::{
//!     services::ImageIOService, MaskDirectoryRemover, Placement, WorkflowConfig,
//!     WorkflowOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = WorkflowConfig::builder()
//!     .group_size(4)
//!     .reflection(true)
//!     .build()?;
//!
//! let mut orchestrator = WorkflowOrchestrator::builder(config)
//!     .remover(Arc::new(MaskDirectoryRemover::new("masks")?))
//!     .build()?;
//!
//! orchestrator.load_batch(vec![ImageIOService::read_upload("shoe.jpg").await?])?;
//! orchestrator.set_positioning(
//!     ImageIOService::load_backdrop("marble.png", None).await?,
//!     Placement::new(0.5, 0.6, 0.4)?,
//! )?;
//!
//! let report = orchestrator.run_to_completion().await?;
//! for item in &report.items {
//!     if let Some(image) = &item.finalized {
//!         ImageIOService::save_output(image, "out", &item.name, Default::default()).await?;
//!     }
//! }
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Library vs CLI Usage
//!
//! - **Library Usage**: the workflow, compositing and service clients are always available
//! - **CLI Usage**: enable the `cli` feature for the `imgly-studio` binary and tracing setup
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface and tracing subscriber setup
//! - `webp-support` (default): WebP decoding and lossless WebP output
//! - `tracing-json`: JSON log output for the CLI
//! - `tracing-files`: file log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! imgly-studio = { version = "0.1", default-features = false, features = ["webp-support"] }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod error;
pub mod remote;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod workflow;

// Public API exports
pub use backends::{
    CdnPreviewRenderer, HttpBackgroundRemover, HttpGenerativeCompositor, HttpLibraryStore,
    MaskDirectoryRemover,
};
pub use compositing::{
    AlphaMasker, CompositeAssembler, ExifOrientation, OrientationNormalizer, PlacementResolver,
    ReflectionOptions, ReflectionSynthesizer,
};
pub use config::{CompressionOptions, OutputFormat, ServiceConfig, WorkflowConfig};
pub use error::{Result, StudioError};
pub use remote::{
    BackgroundRemover, GenerativeCompositor, LibraryMetadata, LibraryStore, PreviewRenderer,
    RemovalOutput,
};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, OutputFormatHandler,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use types::{
    Backdrop, Dimensions, ImageAnalysis, InlineImage, PixelBuffer, PixelRect, Placement, Rect,
};
pub use workflow::{
    BatchReport, BatchState, ItemReport, ItemStatus, StageReport, Upload, WorkItem,
    WorkflowOrchestrator, WorkflowOrchestratorBuilder, WorkflowStage,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput};
