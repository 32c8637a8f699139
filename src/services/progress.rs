//! Progress reporting service
//!
//! This module separates progress reporting concerns from the workflow,
//! allowing different frontends to implement their own progress handling.

use crate::workflow::{BatchReport, StageReport, WorkflowStage};
use instant::Instant;

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Stage the batch is entering
    pub stage: WorkflowStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the tracker started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update for a stage
    #[must_use]
    pub fn new(stage: WorkflowStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            stage,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }

    /// Create a progress update with a custom description
    #[must_use]
    pub fn with_description(stage: WorkflowStage, description: String, start_time: Instant) -> Self {
        Self {
            description,
            ..Self::new(stage, start_time)
        }
    }
}

/// Statistics for the items of the stage in progress
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProcessingStats {
    pub stage: WorkflowStage,
    /// Items settled so far in this stage
    pub items_completed: usize,
    /// Items this stage runs for
    pub items_total: usize,
    /// Items that failed in this stage so far
    pub items_failed: usize,
    /// Name of the last settled item
    pub current_item_name: String,
    /// Items per second
    pub processing_rate: f64,
    pub eta_seconds: Option<u64>,
}

/// Trait for reporting workflow progress
pub trait ProgressReporter: Send + Sync {
    /// A stage is starting
    fn report_progress(&self, update: ProgressUpdate);

    /// A stage finished for the whole batch
    fn report_stage_complete(&self, report: &StageReport);

    /// An item failed, or a stage could not run
    fn report_error(&self, stage: WorkflowStage, error: &str);

    /// A group of items settled within a stage
    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        // Only interactive reporters care about per-group updates
        drop(stats);
    }

    /// The batch reached `Complete`
    fn report_completion(&self, report: &BatchReport) {
        drop(report);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_stage_complete(&self, _report: &StageReport) {}

    fn report_error(&self, _stage: WorkflowStage, _error: &str) {}
}

/// Console progress reporter that logs through the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to log timings and per-group updates
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Format a simple progress bar
    fn progress_bar(completed: usize, total: usize) -> String {
        let filled = if total == 0 { 20 } else { completed * 20 / total };
        let empty = 20 - filled.min(20);
        format!("{}{}", "█".repeat(filled.min(20)), "░".repeat(empty))
    }

    fn format_eta(eta_seconds: Option<u64>) -> String {
        match eta_seconds {
            Some(seconds) if seconds < 60 => format!("{}s", seconds),
            Some(seconds) => format!("{}m {}s", seconds / 60, seconds % 60),
            None => "calculating...".to_string(),
        }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_stage_complete(&self, report: &StageReport) {
        if report.failed == 0 {
            log::info!("✅ {}", report);
        } else {
            log::warn!("⚠️  {} ({} failed)", report, report.failed);
        }
    }

    fn report_error(&self, stage: WorkflowStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }

    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        if self.verbose {
            log::info!(
                "[{}] {}/{} {} ({:.1} items/sec, ETA {})",
                Self::progress_bar(stats.items_completed, stats.items_total),
                stats.items_completed,
                stats.items_total,
                stats.current_item_name,
                stats.processing_rate,
                Self::format_eta(stats.eta_seconds)
            );
        }
    }

    fn report_completion(&self, report: &BatchReport) {
        log::info!("🎉 Batch {} complete: {}", report.session_id, report);
        if self.verbose {
            for item in report.items.iter().filter(|i| i.error.is_some()) {
                log::info!(
                    "  • {} failed during {}: {}",
                    item.name,
                    item.failed_stage.map_or_else(|| "?".to_string(), |s| s.to_string()),
                    item.error.as_deref().unwrap_or_default()
                );
            }
        }
    }
}

/// Progress tracker that manages timing and progress reporting
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    stage_start: Instant,
    current_stage: Option<WorkflowStage>,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            stage_start: Instant::now(),
            current_stage: None,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    /// Create a progress tracker with console reporter
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(verbose)))
    }

    /// Report that a stage is starting
    pub fn report_stage(&mut self, stage: WorkflowStage) {
        self.current_stage = Some(stage);
        self.stage_start = Instant::now();
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report a stage start with custom description
    pub fn report_stage_with_description(&mut self, stage: WorkflowStage, description: String) {
        self.current_stage = Some(stage);
        self.stage_start = Instant::now();
        self.reporter.report_progress(ProgressUpdate::with_description(
            stage,
            description,
            self.start_time,
        ));
    }

    /// Report settled items within the current stage
    pub fn report_items(&self, completed: usize, total: usize, failed: usize, current_item: &str) {
        let Some(stage) = self.current_stage else {
            return;
        };
        let elapsed = self.stage_start.elapsed().as_secs_f64();
        let processing_rate = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        let eta_seconds = if processing_rate > 0.0 {
            Some((total.saturating_sub(completed) as f64 / processing_rate).round() as u64)
        } else {
            None
        };
        self.reporter.report_batch_progress(BatchProcessingStats {
            stage,
            items_completed: completed,
            items_total: total,
            items_failed: failed,
            current_item_name: current_item.to_string(),
            processing_rate,
            eta_seconds,
        });
    }

    pub fn report_stage_complete(&self, report: &StageReport) {
        self.reporter.report_stage_complete(report);
    }

    pub fn report_completion(&self, report: &BatchReport) {
        self.reporter.report_completion(report);
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(WorkflowStage::Analyzing);
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<WorkflowStage> {
        self.current_stage
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::no_op()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .field("elapsed_ms", &self.elapsed_ms())
            .finish_non_exhaustive()
    }
}
