//! Intent-aware merge engine for parallel agent worktrees
//!
//! Tasks running in separate worktrees edit the same files concurrently. This
//! module combines their edits by meaning instead of by line:
//!
//! - `timeline` - Per-file history of the main line and every task's view
//! - `semantic` - Classifies a before/after pair into `SemanticChange`s
//! - `compatibility` - Decides whether two changes at one location combine
//! - `conflict_detector` - Groups changes by location and emits conflicts
//! - `auto_merger` - Mechanical combination and whole-file line merge
//! - `ai_resolver` - Model-backed resolution of eligible conflicts
//! - `orchestrator` - Locked, staged pipeline tying it all together
//!
//! Supporting modules: `types`, `error`, `config`, `lock`, `line_endings`,
//! `progress` and `report`.

pub mod ai_resolver;
pub mod auto_merger;
pub mod compatibility;
pub mod config;
pub mod conflict_detector;
pub mod error;
pub mod line_endings;
pub mod lock;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod semantic;
pub mod timeline;
pub mod types;

pub use ai_resolver::{AiClient, AiResolver, AiResolverConfig, CliAgentClient};
pub use config::{MergeConfig, MergeConfigManager};
pub use error::{EngineResult, MergeError};
pub use lock::MergeLock;
pub use orchestrator::{MergeOrchestrator, MergeRequest};
pub use progress::{MergeProgress, MergeStage, ProgressCallback};
pub use report::{MergePreview, MergeReport};
pub use timeline::FileTimelineTracker;
pub use types::*;
