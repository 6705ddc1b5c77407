// Clippy allows for reasonable defaults
#![allow(clippy::too_many_arguments)] // Lifecycle events carry many fields
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::unnecessary_map_or)] // map_or can be clearer than alternatives
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

// Module declarations
pub mod file_storage;
pub mod git;
pub mod merge;
mod utils;

pub use merge::{
    EngineResult, FileTimelineTracker, MergeConfig, MergeError, MergeOrchestrator, MergeReport,
    MergeRequest,
};
