//! Git operations using git2-rs
//!
//! This module provides the read-side git functionality the merge engine needs:
//! - `manager` - Core GitManager struct and revision resolution
//! - `commits` - Commit inspection (changed files, contents at a revision, drift counts)
//! - `types` - Shared data structures

mod commits;
mod manager;
mod types;

// Re-export the main GitManager struct
pub use manager::GitManager;

pub use types::CommitInfo;
