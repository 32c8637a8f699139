//! Batch workflow orchestrator
//!
//! Drives a batch through
//! `Analyzing → [Compressing] → Previewing → RemovingBackground → Positioning
//! → Compositing → [Enhancing] → Complete`, one stage at a time for the whole
//! batch. External calls are dispatched in groups of `group_size`; each
//! item's failure is recorded against that item and never stops its
//! siblings.

use super::stages::{self, run_in_groups, CompositeSettings};
use super::state::{
    BatchReport, BatchState, ItemDelta, ItemReport, ItemStatus, StageOutput, StageReport,
    WorkItem, WorkflowStage,
};
use crate::backends::{
    CdnPreviewRenderer, HttpBackgroundRemover, HttpGenerativeCompositor, HttpLibraryStore,
};
use crate::compositing::{AlphaMasker, CompositeAssembler, ReflectionSynthesizer};
use crate::config::WorkflowConfig;
use crate::error::{Result, StudioError};
use crate::remote::{
    BackgroundRemover, GenerativeCompositor, LibraryMetadata, LibraryStore, PreviewRenderer,
};
use crate::services::ProgressTracker;
use crate::types::{Backdrop, InlineImage, Placement};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One uploaded file: display name plus raw encoded bytes
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new<S: Into<String>>(name: S, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Stage-synchronous batch state machine
///
/// The orchestrator is the only writer of its [`BatchState`]. Stage work
/// runs against an immutable view of the batch and hands back
/// [`ItemDelta`]s, which are applied in item order once a stage settles.
///
/// # Examples
/// ```rust,no_run
/// use imgly_studio::{Backdrop, MaskDirectoryRemover, PixelBuffer, Placement, Upload,
///     WorkflowConfig, WorkflowOrchestrator};
/// use std::sync::Arc;
///
/// # async fn example() -> imgly_studio::Result<()> {
/// let mut orchestrator = WorkflowOrchestrator::builder(WorkflowConfig::default())
///     .remover(Arc::new(MaskDirectoryRemover::new("masks")?))
///     .build()?;
///
/// orchestrator.load_batch(vec![Upload::new("shoe.jpg", std::fs::read("shoe.jpg")?)])?;
/// orchestrator.set_positioning(
///     Backdrop::new("marble", PixelBuffer::solid(1000, 1000, [230, 230, 230, 255])),
///     Placement::new(0.5, 0.6, 0.4)?,
/// )?;
/// let report = orchestrator.run_to_completion().await?;
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    remover: Arc<dyn BackgroundRemover>,
    compositor: Option<Arc<dyn GenerativeCompositor>>,
    library: Option<Arc<dyn LibraryStore>>,
    previews: Option<Arc<dyn PreviewRenderer>>,
    masker: AlphaMasker,
    reflection: ReflectionSynthesizer,
    assembler: CompositeAssembler,
    progress: ProgressTracker,
    cancel: CancellationToken,
    state: BatchState,
}

impl WorkflowOrchestrator {
    /// Start building an orchestrator around a validated configuration
    #[must_use]
    pub fn builder(config: WorkflowConfig) -> WorkflowOrchestratorBuilder {
        WorkflowOrchestratorBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Read-only view of the batch
    #[must_use]
    pub fn state(&self) -> &BatchState {
        &self.state
    }

    #[must_use]
    pub fn current_stage(&self) -> WorkflowStage {
        self.state.current_stage
    }

    /// Token that aborts the running stage when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace a cancelled token so the batch can be resumed
    pub fn reset_cancellation(&mut self) {
        self.cancel = CancellationToken::new();
    }

    /// Replace the current batch with a new one
    ///
    /// Every load starts a new session with fresh positioning.
    ///
    /// # Errors
    /// - `StageSetup` when `uploads` is empty
    pub fn load_batch(&mut self, uploads: Vec<Upload>) -> Result<()> {
        if uploads.is_empty() {
            return Err(StudioError::stage_setup("a batch needs at least one upload"));
        }
        let items = uploads
            .into_iter()
            .map(|upload| WorkItem::new(upload.name, InlineImage::sniff(upload.bytes)))
            .collect();
        self.state = BatchState::new(items);
        info!(
            session = %self.state.session_id,
            items = self.state.len(),
            "📥 Loaded batch"
        );
        Ok(())
    }

    /// Choose the backdrop and placement shared by every item
    ///
    /// # Errors
    /// - `InvalidState` once `Positioning` has completed
    /// - `InvalidConfig` for an out-of-range placement
    /// - `Format` for a backdrop with an empty canvas
    pub fn set_positioning(&mut self, backdrop: Backdrop, placement: Placement) -> Result<()> {
        if self.state.positioning_locked {
            return Err(StudioError::invalid_state(
                "backdrop and placement are fixed once positioning completes",
            ));
        }
        placement.validate()?;
        if backdrop.canvas.is_empty() || backdrop.buffer.dimensions().is_empty() {
            return Err(StudioError::format(format!(
                "backdrop '{}' has an empty canvas",
                backdrop.id
            )));
        }
        debug!(backdrop = %backdrop.id, canvas = %backdrop.canvas, ?placement, "Positioning set");
        self.state.backdrop = Some(backdrop);
        self.state.placement = Some(placement);
        Ok(())
    }

    /// Skip the optional enhancement pass
    ///
    /// Declining while the batch waits at `Enhancing` completes it with the
    /// unenhanced composites.
    ///
    /// # Errors
    /// - `InvalidState` when the batch is already complete
    pub async fn decline_enhancement(&mut self) -> Result<()> {
        match self.state.current_stage {
            WorkflowStage::Complete => Err(StudioError::invalid_state(
                "enhancement cannot be declined after the batch completed",
            )),
            WorkflowStage::Enhancing => {
                self.state.enhancement_declined = true;
                self.state.current_stage = WorkflowStage::Complete;
                self.complete().await;
                Ok(())
            },
            _ => {
                self.state.enhancement_declined = true;
                Ok(())
            },
        }
    }

    /// Run the current stage for every item that needs it, then transition
    ///
    /// # Errors
    /// - `InvalidState` when the batch is already complete
    /// - `StageSetup` when the stage cannot start (no batch, no backdrop,
    ///   no compositing service); the batch is left untouched
    /// - `Cancelled` when the cancellation token fires; settled items keep
    ///   their results, in-flight items return to pending and the stage is
    ///   not left
    #[instrument(
        skip(self),
        fields(session = %self.state.session_id, stage = %self.state.current_stage)
    )]
    pub async fn advance(&mut self) -> Result<StageReport> {
        let stage = self.state.current_stage;
        if stage == WorkflowStage::Complete {
            return Err(StudioError::invalid_state("batch is already complete"));
        }
        if self.state.is_empty() {
            return Err(StudioError::stage_setup("no batch loaded"));
        }
        if self.cancel.is_cancelled() {
            return Err(StudioError::Cancelled);
        }
        if let Err(e) = self.check_setup(stage) {
            self.progress.report_error(&e.to_string());
            return Err(e);
        }

        self.progress.report_stage(stage);
        info!("🎯 {}", stage.description());

        if stage == WorkflowStage::Positioning {
            self.state.positioning_locked = true;
        } else {
            let pending = self.state.pending_for(stage);
            self.state.mark(&pending, ItemStatus::Processing);
            let (deltas, cancelled) = self.run_stage(stage, &pending).await;
            for delta in deltas {
                self.state.apply(delta);
            }
            if cancelled {
                self.state.revert_in_flight();
                warn!("🛑 Stage cancelled with calls in flight");
                return Err(StudioError::Cancelled);
            }
        }

        self.state.completed_stages.push(stage);
        let next = self.next_stage(stage);
        self.state.current_stage = next;

        let report = self.stage_report(stage, next);
        info!("📊 {}", report);
        self.progress.report_stage_complete(&report);

        if next == WorkflowStage::Complete {
            self.complete().await;
        }
        Ok(report)
    }

    /// Advance until the batch completes
    ///
    /// # Errors
    /// Any error from [`Self::advance`]
    pub async fn run_to_completion(&mut self) -> Result<BatchReport> {
        while self.state.current_stage != WorkflowStage::Complete {
            self.advance().await?;
        }
        Ok(self.report())
    }

    /// Retry a failed item from the stage it failed in
    ///
    /// The item is caught up through every per-item stage the batch has
    /// already finished, stopping at the first new failure. Stages the batch
    /// skipped stay skipped for the retried item.
    ///
    /// # Errors
    /// - `InvalidState` for an unknown index or an item that has not failed
    /// - `StageSetup` when a stage to re-run cannot start
    /// - `Cancelled` when the cancellation token fires
    #[instrument(skip(self), fields(session = %self.state.session_id))]
    pub async fn retry_item(&mut self, index: usize) -> Result<ItemReport> {
        let item = self
            .state
            .items
            .get(index)
            .ok_or_else(|| StudioError::invalid_state(format!("no item at index {}", index)))?;
        if !item.has_failed() {
            return Err(StudioError::invalid_state(format!(
                "'{}' has not failed",
                item.name
            )));
        }
        let failed_stage = item.failed_stage().ok_or_else(|| {
            StudioError::internal(format!("'{}' failed without a recorded stage", item.name))
        })?;
        if self.cancel.is_cancelled() {
            return Err(StudioError::Cancelled);
        }

        let catch_up = self.catch_up_stages(failed_stage);
        for stage in &catch_up {
            self.check_setup(*stage)?;
        }

        info!(item = %item.name, from = %failed_stage, "🔁 Retrying item");
        self.state.items[index].reset_from(failed_stage);
        if catch_up.contains(&WorkflowStage::Compositing) {
            self.state.positioning_locked = true;
        }

        for stage in catch_up {
            self.state.mark(&[index], ItemStatus::Processing);
            let (deltas, cancelled) = run_in_groups(
                &[index],
                1,
                &self.cancel,
                |i| self.run_item(stage, i),
                |_| {},
            )
            .await;
            for delta in deltas {
                self.state.apply(delta);
            }
            if cancelled {
                self.state.revert_in_flight();
                return Err(StudioError::Cancelled);
            }
            if self.state.items[index].has_failed() {
                break;
            }
        }

        if self.state.current_stage == WorkflowStage::Complete
            && !self.state.items[index].has_failed()
        {
            self.finalize(&[index]).await;
        }
        self.item_report(index)
    }

    /// Ordered outcome of every item in the batch
    #[must_use]
    pub fn report(&self) -> BatchReport {
        BatchReport::from_state(&self.state)
    }

    /// Instant CDN preview of an item on the chosen backdrop
    ///
    /// # Errors
    /// - `InvalidConfig` when no preview renderer is configured
    /// - `InvalidState` for an unknown index or before positioning is set
    pub fn preview_url(&self, index: usize) -> Result<String> {
        let renderer = self
            .previews
            .as_deref()
            .ok_or_else(|| StudioError::invalid_config("no preview renderer configured"))?;
        let item = self
            .state
            .items
            .get(index)
            .ok_or_else(|| StudioError::invalid_state(format!("no item at index {}", index)))?;
        let (Some(backdrop), Some(placement)) = (&self.state.backdrop, &self.state.placement)
        else {
            return Err(StudioError::invalid_state("no backdrop selected"));
        };
        renderer.preview_url(&backdrop.id, &item.name, placement, backdrop.canvas)
    }

    fn item_report(&self, index: usize) -> Result<ItemReport> {
        self.report()
            .items
            .into_iter()
            .nth(index)
            .ok_or_else(|| StudioError::invalid_state(format!("no item at index {}", index)))
    }

    /// Per-item stages a retried item must run, starting at `failed_stage`
    ///
    /// Stages the batch finished are replayed and stages it skipped stay
    /// skipped. A completed batch also owes the item every stage it never
    /// reached, which happens when all items failed before compositing.
    fn catch_up_stages(&self, failed_stage: WorkflowStage) -> Vec<WorkflowStage> {
        let completed = &self.state.completed_stages;
        let last_completed = completed.iter().copied().max();
        let finished = self.state.current_stage == WorkflowStage::Complete;
        let enhance = self.config.enhance && !self.state.enhancement_declined;

        WorkflowStage::ALL
            .iter()
            .copied()
            .filter(|stage| stage.is_per_item() && *stage >= failed_stage)
            .filter(|stage| {
                if completed.contains(stage) {
                    return true;
                }
                let unreached = last_completed.map_or(true, |last| *stage > last);
                finished
                    && unreached
                    && (*stage != WorkflowStage::Enhancing || enhance)
            })
            .collect()
    }

    /// Batch-fatal preconditions of a stage
    fn check_setup(&self, stage: WorkflowStage) -> Result<()> {
        let positioned = self.state.backdrop.is_some() && self.state.placement.is_some();
        match stage {
            WorkflowStage::Positioning | WorkflowStage::Compositing if !positioned => Err(
                StudioError::stage_setup(format!("{} needs a backdrop and placement", stage)),
            ),
            WorkflowStage::Compositing if self.config.contact_shadow && self.compositor.is_none() => {
                Err(StudioError::stage_setup(
                    "contact shadows need a generative compositing service",
                ))
            },
            WorkflowStage::Enhancing if self.compositor.is_none() => Err(StudioError::stage_setup(
                "enhancement needs a generative compositing service",
            )),
            _ => Ok(()),
        }
    }

    fn next_stage(&self, stage: WorkflowStage) -> WorkflowStage {
        if self.state.succeeded_count() == 0 {
            return WorkflowStage::Complete;
        }
        match stage {
            WorkflowStage::Analyzing => {
                let oversize = self.state.items.iter().any(|item| {
                    !item.has_failed()
                        && item
                            .analysis
                            .as_ref()
                            .is_some_and(|a| stages::needs_compression(a, &self.config.compression))
                });
                if oversize {
                    WorkflowStage::Compressing
                } else {
                    WorkflowStage::Previewing
                }
            },
            WorkflowStage::Compressing => WorkflowStage::Previewing,
            WorkflowStage::Previewing => WorkflowStage::RemovingBackground,
            WorkflowStage::RemovingBackground => WorkflowStage::Positioning,
            WorkflowStage::Positioning => WorkflowStage::Compositing,
            WorkflowStage::Compositing => {
                if self.config.enhance && !self.state.enhancement_declined {
                    WorkflowStage::Enhancing
                } else {
                    WorkflowStage::Complete
                }
            },
            WorkflowStage::Enhancing | WorkflowStage::Complete => WorkflowStage::Complete,
        }
    }

    fn stage_report(&self, stage: WorkflowStage, next: WorkflowStage) -> StageReport {
        let (succeeded, failed) = if stage.is_per_item() {
            self.state
                .items
                .iter()
                .filter_map(|item| item.stage_results.get(&stage))
                .fold((0, 0), |(ok, err), result| {
                    if result.is_ok() {
                        (ok + 1, err)
                    } else {
                        (ok, err + 1)
                    }
                })
        } else {
            (self.state.succeeded_count(), 0)
        };
        StageReport {
            stage,
            succeeded,
            failed,
            total: self.state.len(),
            next_stage: next,
        }
    }

    async fn run_stage(&self, stage: WorkflowStage, indices: &[usize]) -> (Vec<ItemDelta>, bool) {
        let total = indices.len();
        let mut settled = 0;
        let mut failed = 0;
        let items = &self.state.items;
        let progress = &self.progress;

        run_in_groups(
            indices,
            self.config.group_size,
            &self.cancel,
            |index| self.run_item(stage, index),
            |group| {
                for delta in group {
                    settled += 1;
                    let name = items.get(delta.index).map_or("", |item| item.name.as_str());
                    if let Err(e) = &delta.outcome {
                        failed += 1;
                        progress.report_error(&format!("{}: {}", name, e));
                    }
                    progress.report_items(settled, total, failed, name);
                }
            },
        )
        .await
    }

    async fn run_item(&self, stage: WorkflowStage, index: usize) -> ItemDelta {
        let outcome = match self.state.items.get(index) {
            Some(item) => self.execute(stage, item).await,
            None => Err(StudioError::internal(format!("no item at index {}", index))),
        };
        match &outcome {
            Ok(_) => debug!(index, %stage, "✅ Item settled"),
            Err(e) => warn!(index, %stage, error = %e, "❌ Item failed"),
        }
        ItemDelta {
            index,
            stage,
            outcome,
        }
    }

    async fn execute(&self, stage: WorkflowStage, item: &WorkItem) -> Result<StageOutput> {
        match stage {
            WorkflowStage::Analyzing => stages::analyze(item),
            WorkflowStage::Compressing => stages::compress(item, &self.config.compression),
            WorkflowStage::Previewing => stages::preview(item, self.config.preview_max_dimension),
            WorkflowStage::RemovingBackground => {
                stages::remove_background(item, self.remover.as_ref(), &self.masker).await
            },
            WorkflowStage::Compositing => {
                let settings = self.composite_settings()?;
                stages::composite(item, &settings).await
            },
            WorkflowStage::Enhancing => {
                let service = self.compositor.as_deref().ok_or_else(|| {
                    StudioError::stage_setup("enhancement needs a generative compositing service")
                })?;
                stages::enhance(item, service).await
            },
            WorkflowStage::Positioning | WorkflowStage::Complete => Err(StudioError::invalid_state(
                format!("{} has no per-item work", stage),
            )),
        }
    }

    fn composite_settings(&self) -> Result<CompositeSettings<'_>> {
        let (Some(backdrop), Some(placement)) = (&self.state.backdrop, &self.state.placement)
        else {
            return Err(StudioError::stage_setup("compositing needs a backdrop and placement"));
        };
        let shadow = if self.config.contact_shadow {
            Some(self.compositor.as_deref().ok_or_else(|| {
                StudioError::stage_setup("contact shadows need a generative compositing service")
            })?)
        } else {
            None
        };
        Ok(CompositeSettings {
            backdrop,
            placement,
            shadow,
            reflection: self.config.enable_reflection.then_some(&self.reflection),
            assembler: &self.assembler,
            depth_of_field: self.config.depth_of_field,
        })
    }

    /// Finalize every surviving item and report completion
    async fn complete(&mut self) {
        let indices: Vec<usize> = (0..self.state.len()).collect();
        self.finalize(&indices).await;
        let report = self.report();
        info!(
            session = %self.state.session_id,
            elapsed_ms = self.progress.elapsed_ms(),
            "✅ Batch complete: {}",
            report
        );
        self.progress.report_completion(&report);
    }

    /// Pick each item's final image and optionally persist it
    ///
    /// Library failures are logged and never fail the item.
    async fn finalize(&mut self, indices: &[usize]) {
        for &index in indices {
            if let Some(item) = self.state.items.get_mut(index) {
                if item.has_failed() {
                    continue;
                }
                item.finalized = item.enhanced.clone().or_else(|| item.composite.clone());
                if item.finalized.is_some() {
                    item.status = ItemStatus::Succeeded;
                } else {
                    warn!(item = %item.name, "No final image, leaving item pending");
                    item.status = ItemStatus::Pending;
                }
            }
        }

        if !self.config.persist_results {
            return;
        }
        let Some(library) = self.library.clone() else {
            return;
        };
        let session = self.state.session_id.to_string();

        for &index in indices {
            let Some(item) = self.state.items.get(index) else {
                continue;
            };
            let Some(image) = item.finalized.clone() else {
                continue;
            };
            let dimensions = item
                .result(WorkflowStage::Enhancing)
                .or_else(|| item.result(WorkflowStage::Compositing))
                .map(|buffer| buffer.dimensions())
                .unwrap_or_default();
            let metadata = LibraryMetadata::describe(&item.name, &image, dimensions, &session);

            match library.store(&image, &metadata).await {
                Ok(id) => {
                    debug!(item = %metadata.name, %id, "Stored in library");
                    if let Some(item) = self.state.items.get_mut(index) {
                        item.library_id = Some(id);
                    }
                },
                Err(e) => warn!(item = %metadata.name, error = %e, "Library store failed"),
            }
        }
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("session_id", &self.state.session_id)
            .field("stage", &self.state.current_stage)
            .field("items", &self.state.len())
            .field("remover", &self.remover.name())
            .finish_non_exhaustive()
    }
}

/// Builder wiring collaborators into a [`WorkflowOrchestrator`]
pub struct WorkflowOrchestratorBuilder {
    config: WorkflowConfig,
    remover: Option<Arc<dyn BackgroundRemover>>,
    compositor: Option<Arc<dyn GenerativeCompositor>>,
    library: Option<Arc<dyn LibraryStore>>,
    previews: Option<Arc<dyn PreviewRenderer>>,
    progress: Option<ProgressTracker>,
}

impl WorkflowOrchestratorBuilder {
    #[must_use]
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            remover: None,
            compositor: None,
            library: None,
            previews: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    #[must_use]
    pub fn compositor(mut self, compositor: Arc<dyn GenerativeCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    #[must_use]
    pub fn library(mut self, library: Arc<dyn LibraryStore>) -> Self {
        self.library = Some(library);
        self
    }

    #[must_use]
    pub fn preview_renderer(mut self, previews: Arc<dyn PreviewRenderer>) -> Self {
        self.previews = Some(previews);
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Fill unset collaborators from the configured service URLs
    ///
    /// # Errors
    /// - `InvalidConfig` for a URL that does not parse
    pub fn http_services(mut self) -> Result<Self> {
        let services = self.config.services.clone();
        if self.remover.is_none() {
            if let Some(url) = &services.removal_url {
                self.remover = Some(Arc::new(HttpBackgroundRemover::new(url, &services)?));
            }
        }
        if self.compositor.is_none() {
            if let Some(url) = &services.compositing_url {
                self.compositor = Some(Arc::new(HttpGenerativeCompositor::new(url, &services)?));
            }
        }
        if self.library.is_none() {
            if let Some(url) = &services.library_url {
                self.library = Some(Arc::new(HttpLibraryStore::new(url, &services)?));
            }
        }
        if self.previews.is_none() {
            if let Some(url) = &services.cdn_base_url {
                self.previews = Some(Arc::new(CdnPreviewRenderer::new(url)?));
            }
        }
        Ok(self)
    }

    /// # Errors
    /// - `InvalidConfig` for an invalid configuration, a missing background
    ///   remover, or result persistence without a library backend
    pub fn build(self) -> Result<WorkflowOrchestrator> {
        self.config.validate()?;
        let remover = self
            .remover
            .ok_or_else(|| StudioError::invalid_config("a background remover is required"))?;
        if self.config.persist_results && self.library.is_none() {
            return Err(StudioError::invalid_config(
                "persisting results needs a library backend",
            ));
        }

        Ok(WorkflowOrchestrator {
            masker: AlphaMasker::with_threshold(self.config.mask_threshold),
            reflection: ReflectionSynthesizer::new(self.config.reflection.clone()),
            assembler: CompositeAssembler::with_depth_of_field_radius(
                self.config.depth_of_field_radius,
            ),
            progress: self.progress.unwrap_or_default(),
            cancel: CancellationToken::new(),
            state: BatchState::new(Vec::new()),
            config: self.config,
            remover,
            compositor: self.compositor,
            library: self.library,
            previews: self.previews,
        })
    }
}
