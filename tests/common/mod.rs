//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use imgly_studio::{
    BackgroundRemover, Backdrop, InlineImage, PixelBuffer, RemovalOutput, Result, StudioError,
    Upload,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Route `log` output through the test harness; safe to call repeatedly
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Opaque product photo with a horizontal color ramp
pub fn product_photo(width: u32, height: u32) -> PixelBuffer {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x * 255 / width.max(1)) as u8, 90, 160, 255]);
        }
    }
    PixelBuffer::from_raw(width, height, data).unwrap()
}

pub fn png_upload(name: &str, width: u32, height: u32) -> Upload {
    Upload::new(name, InlineImage::png(&product_photo(width, height)).unwrap().bytes)
}

/// Raw mask: black (background) on the left half, white on the right half
pub fn half_mask(width: u32, height: u32) -> InlineImage {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _y in 0..height {
        for x in 0..width {
            let v = if x < width / 2 { 0 } else { 255 };
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    InlineImage::png(&PixelBuffer::from_raw(width, height, data).unwrap()).unwrap()
}

pub fn write_png(path: &Path, buffer: &PixelBuffer) {
    std::fs::write(path, InlineImage::png(buffer).unwrap().bytes).unwrap();
}

pub fn grey_backdrop(width: u32, height: u32) -> Backdrop {
    Backdrop::new("grey", PixelBuffer::solid(width, height, [200, 200, 200, 255]))
}

/// Remover that masks out the left half and fails for chosen items
#[derive(Clone, Default)]
pub struct FlakyRemover {
    failing: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FlakyRemover {
    pub fn failing_for(names: &[&str]) -> Self {
        let remover = Self::default();
        remover
            .failing
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| (*n).to_string()));
        remover
    }

    /// Stop failing for every item
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundRemover for FlakyRemover {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn remove_background(&self, item: &str, image: &InlineImage) -> Result<RemovalOutput> {
        self.calls.lock().unwrap().push(item.to_string());
        if self.failing.lock().unwrap().contains(item) {
            return Err(StudioError::service("flaky", "HTTP 503 Service Unavailable"));
        }
        let source = image.decode()?;
        Ok(RemovalOutput::Mask(half_mask(source.width(), source.height())))
    }
}
