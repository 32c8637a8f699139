//! Offline background removal from pre-generated masks

use crate::error::{Result, StudioError};
use crate::remote::{BackgroundRemover, RemovalOutput};
use crate::types::InlineImage;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Looks up `<stem>_mask.png` or `<stem>.png` in a directory for each item
///
/// Masks are returned raw; the orchestrator finishes them into cutouts.
#[derive(Debug, Clone)]
pub struct MaskDirectoryRemover {
    directory: PathBuf,
    excluded: HashSet<PathBuf>,
}

impl MaskDirectoryRemover {
    /// # Errors
    /// - `InvalidConfig` if `directory` is not a directory
    pub fn new<P: Into<PathBuf>>(directory: P) -> Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(StudioError::invalid_config(format!(
                "mask directory '{}' does not exist",
                directory.display()
            )));
        }
        Ok(Self {
            directory,
            excluded: HashSet::new(),
        })
    }

    /// Never read these files as masks
    ///
    /// Pass the input photos so a mask directory shared with the inputs
    /// cannot hand a photo back as its own mask.
    #[must_use]
    pub fn excluding<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.excluded.extend(paths.into_iter().map(|p| canonical(p.as_ref())));
        self
    }

    /// Candidate mask paths for an item, in lookup order
    #[must_use]
    pub fn candidates(&self, item: &str) -> Vec<PathBuf> {
        let stem = Path::new(item)
            .file_stem()
            .map_or_else(|| item.to_string(), |s| s.to_string_lossy().into_owned());
        vec![
            self.directory.join(format!("{}_mask.png", stem)),
            self.directory.join(format!("{}.png", stem)),
        ]
    }

    fn is_excluded(&self, candidate: &Path) -> bool {
        !self.excluded.is_empty() && self.excluded.contains(&canonical(candidate))
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl BackgroundRemover for MaskDirectoryRemover {
    fn name(&self) -> &str {
        "mask-directory"
    }

    async fn remove_background(&self, item: &str, _image: &InlineImage) -> Result<RemovalOutput> {
        for candidate in self.candidates(item) {
            if self.is_excluded(&candidate) {
                log::debug!("Skipping {}, it is an input", candidate.display());
                continue;
            }
            match tokio::fs::read(&candidate).await {
                Ok(bytes) => {
                    log::debug!("Using mask {} for {}", candidate.display(), item);
                    return Ok(RemovalOutput::Mask(InlineImage::sniff(bytes)));
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(StudioError::service(
                        self.name(),
                        format!("failed to read '{}': {}", candidate.display(), e),
                    ));
                },
            }
        }
        Err(StudioError::service(
            self.name(),
            format!("no mask found for '{}' in {}", item, self.directory.display()),
        ))
    }
}
