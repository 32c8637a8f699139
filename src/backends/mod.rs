//! Concrete collaborators for the workflow
//!
//! - HTTP clients for background removal, generative compositing and the library
//! - CDN preview URL builder
//! - Offline remover reading pre-generated masks from disk

pub mod cdn;
pub mod http;
pub mod local;

// Test utilities for workflow testing
#[cfg(test)]
pub mod test_utils;

pub use self::cdn::CdnPreviewRenderer;
pub use self::http::{HttpBackgroundRemover, HttpGenerativeCompositor, HttpLibraryStore};
pub use self::local::MaskDirectoryRemover;
