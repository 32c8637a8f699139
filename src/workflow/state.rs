//! Batch state owned by the orchestrator
//!
//! `BatchState` is the single writer-owned record of a batch. Stage runners
//! never touch it; they return [`ItemDelta`]s which the orchestrator applies
//! one at a time in item order.

use crate::error::StudioError;
use crate::types::{Backdrop, ImageAnalysis, InlineImage, PixelBuffer, Placement};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WorkflowStage {
    /// Decode, orientation-normalize and measure each upload
    Analyzing,
    /// Downscale and re-encode oversize uploads
    Compressing,
    /// Render small thumbnails
    Previewing,
    /// External background-removal call per item
    RemovingBackground,
    /// Choose one backdrop and placement for the whole batch
    Positioning,
    /// Shadow and local layer assembly per item
    Compositing,
    /// Optional external AI enhancement per item
    Enhancing,
    /// Every item finalized or failed
    Complete,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 8] = [
        Self::Analyzing,
        Self::Compressing,
        Self::Previewing,
        Self::RemovingBackground,
        Self::Positioning,
        Self::Compositing,
        Self::Enhancing,
        Self::Complete,
    ];

    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Analyzing => "Analyzing uploads",
            Self::Compressing => "Compressing oversize uploads",
            Self::Previewing => "Rendering previews",
            Self::RemovingBackground => "Removing backgrounds",
            Self::Positioning => "Positioning subject on backdrop",
            Self::Compositing => "Compositing studio images",
            Self::Enhancing => "Enhancing composites",
            Self::Complete => "Workflow complete",
        }
    }

    /// Get the typical batch progress percentage when this stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Analyzing => 5,
            Self::Compressing => 10,
            Self::Previewing => 15,
            Self::RemovingBackground => 20,
            Self::Positioning => 50,
            Self::Compositing => 55,
            Self::Enhancing => 75,
            Self::Complete => 100,
        }
    }

    /// Whether the stage produces a result per item
    #[must_use]
    pub fn is_per_item(&self) -> bool {
        !matches!(self, Self::Positioning | Self::Complete)
    }

    /// Whether the stage dispatches calls to an external service
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::RemovingBackground | Self::Compositing | Self::Enhancing
        )
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Analyzing => "analyzing",
            Self::Compressing => "compressing",
            Self::Previewing => "previewing",
            Self::RemovingBackground => "removing-background",
            Self::Positioning => "positioning",
            Self::Compositing => "compositing",
            Self::Enhancing => "enhancing",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Per-item status within the current stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Succeeded,
    /// Terminal until the item is retried
    Failed,
}

/// Buffer produced by a stage, or the item failure recorded in its place
pub type StageResult = std::result::Result<PixelBuffer, Arc<StudioError>>;

/// What a stage produced for one item
#[derive(Debug, Clone)]
pub enum StageOutput {
    Analyzed {
        source: PixelBuffer,
        analysis: ImageAnalysis,
    },
    /// `upload` is `None` when the item was already small enough
    Compressed {
        buffer: PixelBuffer,
        upload: Option<InlineImage>,
    },
    Previewed(PixelBuffer),
    Cutout(PixelBuffer),
    Composited {
        buffer: PixelBuffer,
        encoded: InlineImage,
    },
    Enhanced {
        buffer: PixelBuffer,
        encoded: InlineImage,
    },
}

impl StageOutput {
    #[must_use]
    pub fn buffer(&self) -> &PixelBuffer {
        match self {
            Self::Analyzed { source, .. } => source,
            Self::Compressed { buffer, .. }
            | Self::Composited { buffer, .. }
            | Self::Enhanced { buffer, .. } => buffer,
            Self::Previewed(buffer) | Self::Cutout(buffer) => buffer,
        }
    }
}

/// Outcome of one item in one stage, applied by the orchestrator
#[derive(Debug)]
pub struct ItemDelta {
    /// Position of the item in the batch
    pub index: usize,
    pub stage: WorkflowStage,
    pub outcome: std::result::Result<StageOutput, StudioError>,
}

/// One uploaded photo and everything derived from it
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub name: String,

    /// Bytes exactly as uploaded
    pub upload: InlineImage,

    /// Upright decoded source, available after `Analyzing`
    pub source: Option<PixelBuffer>,

    pub analysis: Option<ImageAnalysis>,

    /// Compressed upload sent to services instead of the source
    pub compressed_upload: Option<InlineImage>,

    pub stage_results: BTreeMap<WorkflowStage, StageResult>,

    pub status: ItemStatus,

    /// Lossless encodings kept for finalization
    pub composite: Option<InlineImage>,
    pub enhanced: Option<InlineImage>,

    /// Final image, set when the batch completes
    pub finalized: Option<InlineImage>,

    /// Identifier returned by the library backend
    pub library_id: Option<String>,
}

impl WorkItem {
    pub fn new<S: Into<String>>(name: S, upload: InlineImage) -> Self {
        Self {
            name: name.into(),
            upload,
            source: None,
            analysis: None,
            compressed_upload: None,
            stage_results: BTreeMap::new(),
            status: ItemStatus::Pending,
            composite: None,
            enhanced: None,
            finalized: None,
            library_id: None,
        }
    }

    /// Successful buffer of a stage, if any
    #[must_use]
    pub fn result(&self, stage: WorkflowStage) -> Option<&PixelBuffer> {
        self.stage_results.get(&stage).and_then(|r| r.as_ref().ok())
    }

    /// Clean cutout from background removal
    #[must_use]
    pub fn cutout(&self) -> Option<&PixelBuffer> {
        self.result(WorkflowStage::RemovingBackground)
    }

    /// Earliest stage with a recorded failure
    #[must_use]
    pub fn failed_stage(&self) -> Option<WorkflowStage> {
        self.stage_results
            .iter()
            .find(|(_, result)| result.is_err())
            .map(|(stage, _)| *stage)
    }

    /// Recorded failure, if the item failed
    #[must_use]
    pub fn failure(&self) -> Option<&Arc<StudioError>> {
        self.stage_results.values().find_map(|r| r.as_ref().err())
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.status == ItemStatus::Failed
    }

    /// Whether the item still needs to run `stage`
    #[must_use]
    pub fn needs(&self, stage: WorkflowStage) -> bool {
        !self.has_failed() && !self.stage_results.contains_key(&stage)
    }

    /// Encoded image sent to external services: the compressed upload if
    /// there is one, otherwise `None` so callers encode the source.
    #[must_use]
    pub fn service_payload(&self) -> Option<&InlineImage> {
        self.compressed_upload.as_ref()
    }

    /// Forget results from `stage` onwards so the item can run them again
    pub(crate) fn reset_from(&mut self, stage: WorkflowStage) {
        self.stage_results.retain(|s, _| *s < stage);
        if stage <= WorkflowStage::Compressing {
            self.compressed_upload = None;
        }
        if stage <= WorkflowStage::Compositing {
            self.composite = None;
        }
        if stage <= WorkflowStage::Enhancing {
            self.enhanced = None;
        }
        self.finalized = None;
        self.library_id = None;
        self.status = ItemStatus::Pending;
    }
}

/// Ordered items plus batch-wide stage and positioning
#[derive(Debug, Clone)]
pub struct BatchState {
    pub session_id: Uuid,
    pub items: Vec<WorkItem>,
    pub current_stage: WorkflowStage,

    /// Stages the whole batch has finished, in order
    pub completed_stages: Vec<WorkflowStage>,

    pub backdrop: Option<Backdrop>,
    pub placement: Option<Placement>,

    /// Set once `Positioning` completes; backdrop and placement are then frozen
    pub positioning_locked: bool,

    pub enhancement_declined: bool,
}

impl BatchState {
    #[must_use]
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            items,
            current_stage: WorkflowStage::Analyzing,
            completed_stages: Vec::new(),
            backdrop: None,
            placement: None,
            positioning_locked: false,
            enhancement_declined: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Indices of items that still need to run `stage`
    #[must_use]
    pub fn pending_for(&self, stage: WorkflowStage) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.needs(stage))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn mark(&mut self, indices: &[usize], status: ItemStatus) {
        for &index in indices {
            if let Some(item) = self.items.get_mut(index) {
                item.status = status;
            }
        }
    }

    /// Record one stage outcome against its item
    ///
    /// Failures are wrapped as `BatchItemFailure` and mark the item failed.
    pub fn apply(&mut self, delta: ItemDelta) {
        let Some(item) = self.items.get_mut(delta.index) else {
            return;
        };

        match delta.outcome {
            Ok(output) => {
                let buffer = output.buffer().clone();
                match output {
                    StageOutput::Analyzed { analysis, source } => {
                        item.analysis = Some(analysis);
                        item.source = Some(source);
                    },
                    StageOutput::Compressed { upload, .. } => {
                        item.compressed_upload = upload;
                    },
                    StageOutput::Composited { encoded, .. } => {
                        item.composite = Some(encoded);
                    },
                    StageOutput::Enhanced { encoded, .. } => {
                        item.enhanced = Some(encoded);
                    },
                    StageOutput::Previewed(_) | StageOutput::Cutout(_) => {},
                }
                item.stage_results.insert(delta.stage, Ok(buffer));
                item.status = ItemStatus::Succeeded;
            },
            Err(cause) => {
                let failure = StudioError::item_failure(item.name.clone(), delta.stage, cause);
                item.stage_results.insert(delta.stage, Err(Arc::new(failure)));
                item.status = ItemStatus::Failed;
            },
        }
    }

    /// Reset `Processing` items back to `Pending`
    pub(crate) fn revert_in_flight(&mut self) {
        for item in &mut self.items {
            if item.status == ItemStatus::Processing {
                item.status = ItemStatus::Pending;
            }
        }
    }

    #[must_use]
    pub fn has_completed(&self, stage: WorkflowStage) -> bool {
        self.completed_stages.contains(&stage)
    }

    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.items.iter().filter(|item| !item.has_failed()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|item| item.has_failed()).count()
    }
}

/// Aggregate outcome of running one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: WorkflowStage,
    /// Items that ran this stage and succeeded
    pub succeeded: usize,
    /// Items that ran this stage and failed
    pub failed: usize,
    /// Items in the batch
    pub total: usize,
    /// Stage the batch moved to
    pub next_stage: WorkflowStage,
}

impl std::fmt::Display for StageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} of {} images succeeded",
            self.stage,
            self.succeeded,
            self.total
        )
    }
}

/// Per-item line of a batch report
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub name: String,
    pub status: ItemStatus,
    pub failed_stage: Option<WorkflowStage>,
    pub error: Option<String>,
    #[serde(skip)]
    pub cutout: Option<PixelBuffer>,
    #[serde(skip)]
    pub finalized: Option<InlineImage>,
    pub library_id: Option<String>,
}

/// Batch outcome in original upload order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub session_id: Uuid,
    pub stage: WorkflowStage,
    pub items: Vec<ItemReport>,
    pub succeeded: usize,
    pub total: usize,
}

impl BatchReport {
    #[must_use]
    pub fn from_state(state: &BatchState) -> Self {
        let items: Vec<ItemReport> = state
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| ItemReport {
                index,
                name: item.name.clone(),
                status: item.status,
                failed_stage: item.failed_stage(),
                error: item.failure().map(|e| e.root_cause().to_string()),
                cutout: item.cutout().cloned(),
                finalized: item.finalized.clone(),
                library_id: item.library_id.clone(),
            })
            .collect();
        // A finished batch only counts items that produced a final image
        let finished = state.current_stage == WorkflowStage::Complete;
        let succeeded = items
            .iter()
            .filter(|item| item.status != ItemStatus::Failed)
            .filter(|item| !finished || item.finalized.is_some())
            .count();
        Self {
            session_id: state.session_id,
            stage: state.current_stage,
            total: items.len(),
            items,
            succeeded,
        }
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} images succeeded", self.succeeded, self.total)
    }
}
