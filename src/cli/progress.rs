//! Terminal progress bars for the CLI

use crate::services::{BatchProcessingStats, ProgressReporter, ProgressUpdate};
use crate::workflow::{BatchReport, StageReport, WorkflowStage};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {prefix:>24} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// One `indicatif` bar per stage, replaced when the next stage starts
#[derive(Default)]
pub struct IndicatifProgressReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl IndicatifProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressReporter for IndicatifProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        let bar = ProgressBar::new(0).with_style(Self::style());
        bar.set_prefix(update.description);
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(previous) = guard.replace(bar) {
                if !previous.is_finished() {
                    previous.finish_and_clear();
                }
            }
        }
    }

    fn report_stage_complete(&self, report: &StageReport) {
        self.with_bar(|bar| {
            bar.set_length(report.total as u64);
            bar.finish_with_message(format!("{} failed", report.failed));
        });
    }

    fn report_error(&self, stage: WorkflowStage, error: &str) {
        let line = format!("❌ {}: {}", stage, error);
        let mut printed = false;
        self.with_bar(|bar| {
            bar.println(&line);
            printed = true;
        });
        if !printed {
            eprintln!("{}", line);
        }
    }

    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        self.with_bar(|bar| {
            bar.set_length(stats.items_total as u64);
            bar.set_position(stats.items_completed as u64);
            bar.set_message(stats.current_item_name);
        });
    }

    fn report_completion(&self, report: &BatchReport) {
        self.with_bar(|bar| {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        });
        log::info!("🎉 Batch {} complete: {}", report.session_id, report);
    }
}
