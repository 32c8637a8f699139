//! Per-item stage work and group dispatch
//!
//! Stage functions read a [`WorkItem`] and return a [`StageOutput`]; they
//! never mutate batch state. [`run_in_groups`] bounds how many item futures
//! are pending at once and settles each group fully before the next starts.

use super::state::{ItemDelta, StageOutput, WorkItem, WorkflowStage};
use crate::compositing::{
    AlphaMasker, CompositeAssembler, OrientationNormalizer, PlacementResolver,
    ReflectionSynthesizer,
};
use crate::config::CompressionOptions;
use crate::error::{Result, StudioError};
use crate::remote::{BackgroundRemover, GenerativeCompositor, RemovalOutput};
use crate::types::{Backdrop, ImageAnalysis, InlineImage, PixelBuffer, Placement};
use futures::future::join_all;
use image::imageops;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, span, Level};

/// Run `task` for every index, at most `group_size` at a time
///
/// `on_settled` sees each group's deltas as soon as the group settles.
/// Returns the deltas sorted by item index and whether the run stopped
/// because `cancel` fired. Items of a group interrupted by cancellation
/// produce no delta.
pub(crate) async fn run_in_groups<F, Fut, S>(
    indices: &[usize],
    group_size: usize,
    cancel: &CancellationToken,
    mut task: F,
    mut on_settled: S,
) -> (Vec<ItemDelta>, bool)
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = ItemDelta>,
    S: FnMut(&[ItemDelta]),
{
    let mut deltas = Vec::with_capacity(indices.len());
    let mut cancelled = false;

    for group in indices.chunks(group_size.max(1)) {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let pending = join_all(group.iter().map(|&index| task(index)));
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(group = ?group, "Cancelled with calls in flight");
                cancelled = true;
                break;
            }
            settled = pending => {
                on_settled(&settled);
                deltas.extend(settled);
            }
        }
    }

    deltas.sort_by_key(|delta| delta.index);
    (deltas, cancelled)
}

fn source_of(item: &WorkItem) -> Result<&PixelBuffer> {
    item.source
        .as_ref()
        .ok_or_else(|| StudioError::invalid_state(format!("'{}' has not been analyzed", item.name)))
}

/// Buffer later stages work from: compressed if the item was compressed
fn working_buffer(item: &WorkItem) -> Result<&PixelBuffer> {
    match item.result(WorkflowStage::Compressing) {
        Some(buffer) => Ok(buffer),
        None => source_of(item),
    }
}

/// Decode, orientation-normalize and measure an upload
///
/// # Errors
/// - `Decode` when the upload is not a supported image
pub fn analyze(item: &WorkItem) -> Result<StageOutput> {
    let _span = span!(Level::DEBUG, "analyze", item = %item.name).entered();
    let (source, orientation) = OrientationNormalizer::normalize_with_orientation(&item.upload.bytes)?;
    let analysis = ImageAnalysis {
        dimensions: source.dimensions(),
        byte_size: item.upload.byte_size(),
        mime: item.upload.mime.clone(),
        orientation,
    };
    Ok(StageOutput::Analyzed { source, analysis })
}

/// Whether an analysed upload exceeds the compression thresholds
#[must_use]
pub fn needs_compression(analysis: &ImageAnalysis, options: &CompressionOptions) -> bool {
    analysis.byte_size > options.max_upload_bytes
        || analysis.dimensions.longest_edge() > options.max_dimension
}

/// Downscale and re-encode an oversize upload as JPEG; small ones pass through
///
/// # Errors
/// - `InvalidState` if the item was not analyzed
/// - `Internal` if JPEG encoding fails
pub fn compress(item: &WorkItem, options: &CompressionOptions) -> Result<StageOutput> {
    let source = source_of(item)?;
    let oversize = item
        .analysis
        .as_ref()
        .is_some_and(|analysis| needs_compression(analysis, options));
    if !oversize {
        return Ok(StageOutput::Compressed {
            buffer: source.clone(),
            upload: None,
        });
    }

    let _span = span!(Level::DEBUG, "compress", item = %item.name).entered();
    let target = source.dimensions().fit_within(options.max_dimension);
    let buffer = if target == source.dimensions() {
        source.clone()
    } else {
        PixelBuffer::from_image(imageops::resize(
            source.as_image(),
            target.width,
            target.height,
            imageops::FilterType::Lanczos3,
        ))
    };
    let upload = InlineImage::jpeg(&buffer, options.jpeg_quality)?;
    debug!(
        from = %source.dimensions(),
        to = %target,
        bytes = upload.byte_size(),
        "Compressed upload"
    );
    Ok(StageOutput::Compressed {
        buffer,
        upload: Some(upload),
    })
}

/// Render a thumbnail whose longest edge is at most `max_dimension`
///
/// # Errors
/// - `InvalidState` if the item was not analyzed
pub fn preview(item: &WorkItem, max_dimension: u32) -> Result<StageOutput> {
    let source = source_of(item)?;
    let target = source.dimensions().fit_within(max_dimension);
    if target == source.dimensions() {
        return Ok(StageOutput::Previewed(source.clone()));
    }
    Ok(StageOutput::Previewed(PixelBuffer::from_image(imageops::thumbnail(
        source.as_image(),
        target.width,
        target.height,
    ))))
}

/// Call the remover and finish its answer into a cutout
///
/// # Errors
/// - `ServiceFailure` from the remover
/// - `Decode` if the returned image or mask cannot be decoded
pub async fn remove_background(
    item: &WorkItem,
    remover: &dyn BackgroundRemover,
    masker: &AlphaMasker,
) -> Result<StageOutput> {
    let working = working_buffer(item)?;
    let payload = match item.service_payload() {
        Some(upload) => upload.clone(),
        None => InlineImage::png(working)?,
    };

    let cutout = match remover.remove_background(&item.name, &payload).await? {
        RemovalOutput::Cutout(image) => image.decode()?,
        RemovalOutput::Mask(mask) => masker.cutout_from_mask(working, &mask)?,
    };
    Ok(StageOutput::Cutout(cutout))
}

/// Batch-wide inputs to the compositing stage
pub struct CompositeSettings<'a> {
    pub backdrop: &'a Backdrop,
    pub placement: &'a Placement,
    /// Present when a contact shadow should be rendered
    pub shadow: Option<&'a dyn GenerativeCompositor>,
    pub reflection: Option<&'a ReflectionSynthesizer>,
    pub assembler: &'a CompositeAssembler,
    pub depth_of_field: bool,
}

/// Shadow the cutout remotely if requested, then assemble locally
///
/// The subject rectangle follows the clean cutout's aspect ratio; the
/// shadowed subject is drawn into that same rectangle.
///
/// # Errors
/// - `ServiceFailure` from the shadow call
/// - `Format`/`Decode` from local assembly
pub async fn composite(item: &WorkItem, settings: &CompositeSettings<'_>) -> Result<StageOutput> {
    let cutout = item.cutout().ok_or_else(|| {
        StudioError::invalid_state(format!("'{}' has no cutout to composite", item.name))
    })?;

    let subject = match settings.shadow {
        Some(service) => {
            let encoded = InlineImage::png(cutout)?;
            service.render_shadow(&item.name, &encoded).await?.decode()?
        },
        None => cutout.clone(),
    };

    let _span = span!(Level::DEBUG, "composite", item = %item.name).entered();
    let canvas = settings.backdrop.canvas;
    let rect = PlacementResolver::resolve(cutout.dimensions(), canvas, settings.placement)?;
    let reflection = settings
        .reflection
        .map(|synth| synth.synthesize(cutout, &rect, canvas))
        .transpose()?;
    let buffer = settings.assembler.assemble(
        settings.backdrop,
        &subject,
        reflection.as_ref(),
        &rect,
        settings.depth_of_field,
    )?;
    let encoded = InlineImage::png(&buffer)?;
    Ok(StageOutput::Composited { buffer, encoded })
}

/// Enhance the composite, falling back to it when the service sends no image
///
/// # Errors
/// - `ServiceFailure` from the enhancement call
/// - `Decode` if the enhanced payload cannot be decoded
pub async fn enhance(item: &WorkItem, service: &dyn GenerativeCompositor) -> Result<StageOutput> {
    let composite = item.composite.as_ref().ok_or_else(|| {
        StudioError::invalid_state(format!("'{}' has no composite to enhance", item.name))
    })?;
    let cutout = item.cutout().ok_or_else(|| {
        StudioError::invalid_state(format!("'{}' has no cutout for guidance", item.name))
    })?;
    let guidance = InlineImage::png(cutout)?;

    match service.enhance(&item.name, composite, &guidance).await? {
        Some(enhanced) => {
            let buffer = enhanced.decode()?;
            Ok(StageOutput::Enhanced {
                buffer,
                encoded: enhanced,
            })
        },
        None => {
            debug!(item = %item.name, "Enhancement returned no image, keeping composite");
            let buffer = item
                .result(WorkflowStage::Compositing)
                .cloned()
                .map_or_else(|| composite.decode(), Ok)?;
            Ok(StageOutput::Enhanced {
                buffer,
                encoded: composite.clone(),
            })
        },
    }
}
