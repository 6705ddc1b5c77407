//! Per-file timelines
//!
//! - `models` - FileTimeline, TaskFileView, MainBranchEvent, MergeContext
//! - `storage` - JSON persistence under `.ralph-ui/file-timelines/`
//! - `tracker` - FileTimelineTracker, the lifecycle-event entry point

pub mod models;
mod storage;
mod tracker;

pub use models::{
    BranchPoint, FileTimeline, MainBranchEvent, MainEventSource, MergeContext, OtherTaskSummary,
    TaskFileStatus, TaskFileView, TaskIntent, WorktreeState,
};
pub use storage::TimelineStore;
pub use tracker::{normalize_file_path, FileTimelineTracker, WORKING_TREE_REF};
