//! Mock collaborators for exercising the workflow without network access
//!
//! Every mock records its calls so tests can verify dispatch order and
//! concurrency. Mocks are cheap to clone and clones share their history.

use crate::error::{Result, StudioError};
use crate::remote::{
    BackgroundRemover, GenerativeCompositor, LibraryMetadata, LibraryStore, RemovalOutput,
};
use crate::types::{InlineImage, PixelBuffer};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Turn an opaque image into a cutout by clearing its left column
pub fn fake_cutout(image: &InlineImage) -> Result<PixelBuffer> {
    let mut rgba = image.decode()?.into_image();
    for y in 0..rgba.height() {
        rgba.get_pixel_mut(0, y).0[3] = 0;
    }
    Ok(PixelBuffer::from_image(rgba))
}

/// Mask that is white everywhere except a black left column
pub fn fake_mask(image: &InlineImage) -> Result<InlineImage> {
    let source = image.decode()?;
    let mut mask = image::RgbaImage::from_pixel(
        source.width(),
        source.height(),
        image::Rgba([255, 255, 255, 255]),
    );
    for y in 0..mask.height() {
        mask.put_pixel(0, y, image::Rgba([0, 0, 0, 255]));
    }
    InlineImage::png(&PixelBuffer::from_image(mask))
}

/// Tracks how many calls are pending at once
#[derive(Debug, Default, Clone)]
pub struct ConcurrencyGauge {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of simultaneously pending calls observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Mock background-removal service
#[derive(Debug, Clone, Default)]
pub struct MockBackgroundRemover {
    failing: Arc<Mutex<HashSet<String>>>,
    return_masks: bool,
    delay: Option<Duration>,
    call_history: Arc<Mutex<Vec<String>>>,
    gauge: ConcurrencyGauge,
}

impl MockBackgroundRemover {
    /// Remover answering every call with a finished cutout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remover answering with raw masks instead of cutouts
    #[must_use]
    pub fn returning_masks() -> Self {
        Self {
            return_masks: true,
            ..Self::default()
        }
    }

    /// Fail calls for the named items with a `ServiceFailure`
    #[must_use]
    pub fn failing_for(self, items: &[&str]) -> Self {
        self.failing
            .lock()
            .unwrap()
            .extend(items.iter().map(|s| s.to_string()));
        self
    }

    /// Hold every call open for `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Let a previously failing item succeed on its next call
    pub fn heal(&self, item: &str) {
        self.failing.lock().unwrap().remove(item);
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}

#[async_trait]
impl BackgroundRemover for MockBackgroundRemover {
    fn name(&self) -> &str {
        "mock-removal"
    }

    async fn remove_background(&self, item: &str, image: &InlineImage) -> Result<RemovalOutput> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("remove_background({})", item));
        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.exit();

        if self.failing.lock().unwrap().contains(item) {
            return Err(StudioError::service(self.name(), "HTTP 500 from mock"));
        }
        if self.return_masks {
            Ok(RemovalOutput::Mask(fake_mask(image)?))
        } else {
            Ok(RemovalOutput::Cutout(InlineImage::png(&fake_cutout(image)?)?))
        }
    }
}

/// Mock generative compositing service
#[derive(Debug, Clone, Default)]
pub struct MockCompositor {
    failing: Arc<Mutex<HashSet<String>>>,
    enhance_without_image: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockCompositor {
    /// Compositor that returns shadows unchanged and inverts enhanced colors
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compositor whose enhance calls answer without an image payload
    #[must_use]
    pub fn without_enhanced_image() -> Self {
        Self {
            enhance_without_image: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_for(self, items: &[&str]) -> Self {
        self.failing
            .lock()
            .unwrap()
            .extend(items.iter().map(|s| s.to_string()));
        self
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn check(&self, item: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(item) {
            Err(StudioError::service("mock-compositing", "HTTP 503 from mock"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GenerativeCompositor for MockCompositor {
    fn name(&self) -> &str {
        "mock-compositing"
    }

    async fn render_shadow(&self, item: &str, cutout: &InlineImage) -> Result<InlineImage> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("render_shadow({})", item));
        self.check(item)?;
        Ok(cutout.clone())
    }

    async fn enhance(
        &self,
        item: &str,
        composite: &InlineImage,
        _guidance: &InlineImage,
    ) -> Result<Option<InlineImage>> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("enhance({})", item));
        self.check(item)?;
        if self.enhance_without_image {
            return Ok(None);
        }
        let mut rgba = composite.decode()?.into_image();
        image::imageops::invert(&mut rgba);
        Ok(Some(InlineImage::png(&PixelBuffer::from_image(rgba))?))
    }
}

/// Mock library backend handing out sequential identifiers
#[derive(Debug, Clone, Default)]
pub struct MockLibraryStore {
    reject: bool,
    stored: Arc<Mutex<Vec<LibraryMetadata>>>,
}

impl MockLibraryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects every image
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Vec<LibraryMetadata> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl LibraryStore for MockLibraryStore {
    fn name(&self) -> &str {
        "mock-library"
    }

    async fn store(&self, _image: &InlineImage, metadata: &LibraryMetadata) -> Result<String> {
        if self.reject {
            return Err(StudioError::service(self.name(), "quota exceeded"));
        }
        let mut stored = self.stored.lock().unwrap();
        stored.push(metadata.clone());
        Ok(format!("lib-{}", stored.len()))
    }
}
