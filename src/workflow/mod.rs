//! Stage-synchronous batch workflow
//!
//! [`WorkflowOrchestrator`] owns the [`BatchState`] and moves the whole batch
//! from one [`WorkflowStage`] to the next. Per-item work lives in `stages`.

pub mod orchestrator;
pub mod stages;
pub mod state;

pub use orchestrator::{Upload, WorkflowOrchestrator, WorkflowOrchestratorBuilder};
pub use state::{
    BatchReport, BatchState, ItemDelta, ItemReport, ItemStatus, StageOutput, StageReport,
    StageResult, WorkItem, WorkflowStage,
};
