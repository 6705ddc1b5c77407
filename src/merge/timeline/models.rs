//! Timeline data model
//!
//! A `FileTimeline` is the aggregate root for one file path: the ordered
//! main-branch history plus every task's view of the file. Views are never
//! deleted, only moved to a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::merge::types::TaskIntent;

/// Status of a task's view of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFileStatus {
    /// Task is still working on the file
    Active,
    /// Task's work landed on the main line
    Merged,
    /// Task was dropped without merging
    Abandoned,
}

impl Default for TaskFileStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl TaskFileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskFileStatus::Merged | TaskFileStatus::Abandoned)
    }
}

impl std::fmt::Display for TaskFileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFileStatus::Active => write!(f, "active"),
            TaskFileStatus::Merged => write!(f, "merged"),
            TaskFileStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Where a task branched off the main line, as seen by one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPoint {
    pub commit_hash: String,
    /// File content at the branch point (empty for files the task creates)
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Last captured content of the file in the task's worktree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeState {
    pub content: String,
    pub captured_at: DateTime<Utc>,
}

/// Who produced a main-branch commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MainEventSource {
    Human,
    MergedTask { task_id: String },
}

/// A main-line commit that touched the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainBranchEvent {
    pub commit_hash: String,
    pub content: String,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: MainEventSource,
}

/// One task's view of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFileView {
    pub task_id: String,
    #[serde(default)]
    pub task_intent: TaskIntent,
    pub branch_point: BranchPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_state: Option<WorktreeState>,
    #[serde(default)]
    pub status: TaskFileStatus,
    #[serde(default)]
    pub commits_behind_main: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
}

impl TaskFileView {
    pub fn new(task_id: impl Into<String>, task_intent: TaskIntent, branch_point: BranchPoint) -> Self {
        Self {
            task_id: task_id.into(),
            task_intent,
            branch_point,
            worktree_state: None,
            status: TaskFileStatus::Active,
            commits_behind_main: 0,
            merged_at: None,
            merge_commit: None,
            worktree_path: None,
            started_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskFileStatus::Active
    }

    /// Record the worktree content, overwriting any earlier capture
    pub fn capture(&mut self, content: impl Into<String>) {
        self.worktree_state = Some(WorktreeState {
            content: content.into(),
            captured_at: Utc::now(),
        });
    }

    /// Move to `Merged`. Returns false if the view was already terminal.
    pub fn mark_merged(&mut self, merge_commit: Option<&str>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskFileStatus::Merged;
        self.merged_at = Some(Utc::now());
        self.merge_commit = merge_commit.map(|c| c.to_string());
        true
    }

    /// Move to `Abandoned`. Returns false if the view was already terminal.
    pub fn mark_abandoned(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskFileStatus::Abandoned;
        true
    }

    /// Captured worktree content, if any
    pub fn worktree_content(&self) -> Option<&str> {
        self.worktree_state.as_ref().map(|s| s.content.as_str())
    }
}

/// Full recorded history of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTimeline {
    pub file_path: String,
    #[serde(default)]
    pub main_branch_history: Vec<MainBranchEvent>,
    #[serde(default)]
    pub task_views: BTreeMap<String, TaskFileView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileTimeline {
    pub fn new(file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            file_path: file_path.into(),
            main_branch_history: Vec::new(),
            task_views: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn has_main_event(&self, commit_hash: &str) -> bool {
        self.main_branch_history
            .iter()
            .any(|e| e.commit_hash == commit_hash)
    }

    /// Insert a historical event without touching drift counters.
    ///
    /// Used when reconstructing history whose drift was measured elsewhere.
    pub fn backfill_main_event(&mut self, event: MainBranchEvent) {
        if self.has_main_event(&event.commit_hash) {
            return;
        }
        self.main_branch_history.push(event);
        self.main_branch_history.sort_by_key(|e| e.timestamp);
        self.touch();
    }

    /// Append a main-line event; every active view drifts one commit further
    pub fn add_main_event(&mut self, event: MainBranchEvent) {
        for view in self.task_views.values_mut() {
            if view.is_active() {
                view.commits_behind_main += 1;
            }
        }
        self.main_branch_history.push(event);
        self.touch();
    }

    pub fn get_task_view(&self, task_id: &str) -> Option<&TaskFileView> {
        self.task_views.get(task_id)
    }

    pub fn get_task_view_mut(&mut self, task_id: &str) -> Option<&mut TaskFileView> {
        self.task_views.get_mut(task_id)
    }

    pub fn active_views(&self) -> impl Iterator<Item = &TaskFileView> {
        self.task_views.values().filter(|v| v.is_active())
    }

    /// Main-line events recorded after the given task's branch point
    pub fn events_since_branch_point(&self, task_id: &str) -> Vec<&MainBranchEvent> {
        let Some(view) = self.task_views.get(task_id) else {
            return Vec::new();
        };
        let drift = view.commits_behind_main as usize;
        let len = self.main_branch_history.len();
        self.main_branch_history[len.saturating_sub(drift)..]
            .iter()
            .collect()
    }

    /// Content of the file at the tip of the main line, if any event was recorded
    pub fn current_main_content(&self) -> Option<&str> {
        self.main_branch_history.last().map(|e| e.content.as_str())
    }
}

/// Summary of another task touching the same file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherTaskSummary {
    pub task_id: String,
    pub task_intent: TaskIntent,
    pub commits_behind_main: u32,
    pub started_at: DateTime<Utc>,
}

/// Everything a resolver needs to know about a task's view of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeContext {
    pub file_path: String,
    pub task_id: String,
    pub task_intent: TaskIntent,
    pub branch_point: BranchPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_content: Option<String>,
    pub main_evolution: Vec<MainBranchEvent>,
    pub commits_behind_main: u32,
    pub current_main_content: String,
    pub other_active_tasks: Vec<OtherTaskSummary>,
}

impl MergeContext {
    pub fn total_pending_tasks(&self) -> usize {
        self.other_active_tasks.len() + 1
    }
}
