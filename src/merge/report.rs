//! Merge reports and previews
//!
//! Every merge invocation yields a `MergeReport`, including partial failures.
//! Unresolved conflicts are always enumerated per file. Reports of live runs
//! are persisted as `.ralph-ui/merge-reports/<merge_id>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::file_storage::{get_reports_dir, read_json, write_json, FileResult};
use crate::merge::types::{ConflictRegion, MergeDecision, MergeResult, MergeStrategy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub files_processed: usize,
    pub files_auto_merged: usize,
    pub files_ai_merged: usize,
    pub files_need_review: usize,
    pub files_failed: usize,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    pub conflicts_ai_resolved: usize,
    pub ai_calls_made: u32,
    pub tokens_used: usize,
    pub duration_seconds: f64,
}

/// Outcome for one file of a merge run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMergeOutcome {
    pub file_path: String,
    pub decision: MergeDecision,
    pub strategy: MergeStrategy,
    /// Participants in combination order (`main` when the main line drifted)
    pub tasks: Vec<String>,
    /// Groups combined by the rules without AI
    #[serde(default)]
    pub auto_resolved: usize,
    #[serde(default)]
    pub conflicts_resolved: Vec<ConflictRegion>,
    #[serde(default)]
    pub conflicts_remaining: Vec<ConflictRegion>,
    #[serde(default)]
    pub ai_results: Vec<MergeResult>,
    /// Final content; kept in memory only
    #[serde(skip)]
    pub merged_content: Option<String>,
    #[serde(default)]
    pub written: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileMergeOutcome {
    pub fn new(file_path: impl Into<String>, strategy: MergeStrategy, tasks: Vec<String>) -> Self {
        Self {
            file_path: file_path.into(),
            decision: MergeDecision::AutoMerged,
            strategy,
            tasks,
            auto_resolved: 0,
            conflicts_resolved: Vec::new(),
            conflicts_remaining: Vec::new(),
            ai_results: Vec::new(),
            merged_content: None,
            written: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.decision.is_success()
    }

    pub fn ai_calls_made(&self) -> u32 {
        self.ai_results.iter().map(|r| r.ai_calls_made).sum()
    }

    pub fn tokens_used(&self) -> usize {
        self.ai_results.iter().map(|r| r.tokens_used).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub merge_id: String,
    pub scope: String,
    pub tasks_merged: Vec<String>,
    pub dry_run: bool,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub stats: MergeStats,
    pub files: Vec<FileMergeOutcome>,
}

impl MergeReport {
    /// Assemble a report and derive its stats from the per-file outcomes
    pub fn from_outcomes(
        scope: &str,
        tasks: &[String],
        dry_run: bool,
        started_at: DateTime<Utc>,
        files: Vec<FileMergeOutcome>,
    ) -> Self {
        let completed_at = Utc::now();
        let mut stats = MergeStats {
            files_processed: files.len(),
            duration_seconds: (completed_at - started_at).num_milliseconds().max(0) as f64 / 1000.0,
            ..MergeStats::default()
        };

        for file in &files {
            match file.decision {
                MergeDecision::AutoMerged => stats.files_auto_merged += 1,
                MergeDecision::AiMerged => stats.files_ai_merged += 1,
                MergeDecision::NeedsHumanReview => stats.files_need_review += 1,
                MergeDecision::Failed => stats.files_failed += 1,
            }
            let ai_resolved = file.ai_results.iter().filter(|r| r.is_success()).count();
            stats.conflicts_detected += file.conflicts_resolved.len() + file.conflicts_remaining.len();
            stats.conflicts_ai_resolved += ai_resolved;
            stats.conflicts_auto_resolved += file.auto_resolved;
            stats.ai_calls_made += file.ai_calls_made();
            stats.tokens_used += file.tokens_used();
        }

        Self {
            merge_id: format!("merge-{}", uuid::Uuid::new_v4()),
            scope: scope.to_string(),
            tasks_merged: tasks.to_vec(),
            dry_run,
            success: files.iter().all(|f| f.is_success()),
            started_at,
            completed_at,
            stats,
            files,
        }
    }

    /// Every conflict still waiting for a decision
    pub fn unresolved_conflicts(&self) -> Vec<&ConflictRegion> {
        self.files
            .iter()
            .flat_map(|f| f.conflicts_remaining.iter())
            .collect()
    }

    pub fn report_path(project_path: &Path, merge_id: &str) -> PathBuf {
        get_reports_dir(project_path).join(format!("{}.json", merge_id))
    }

    pub fn save(&self, project_path: &Path) -> FileResult<PathBuf> {
        let path = Self::report_path(project_path, &self.merge_id);
        write_json(&path, self)?;
        log::info!("[MergeReport] Saved report {} to {:?}", self.merge_id, path);
        Ok(path)
    }

    pub fn load(project_path: &Path, merge_id: &str) -> FileResult<Self> {
        read_json(&Self::report_path(project_path, merge_id))
    }
}

/// Per-file line of a merge preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePreview {
    pub file_path: String,
    pub tasks: Vec<String>,
    pub strategy: MergeStrategy,
    pub conflict_count: usize,
    #[serde(default)]
    pub conflicts: Vec<ConflictRegion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// What a merge would do, computed without writing anything
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePreview {
    pub tasks: Vec<String>,
    pub total_files: usize,
    pub total_conflicts: usize,
    pub ai_eligible_conflicts: usize,
    pub files: Vec<FilePreview>,
}

impl MergePreview {
    pub fn new(tasks: &[String], files: Vec<FilePreview>) -> Self {
        let total_conflicts = files.iter().map(|f| f.conflict_count).sum();
        let ai_eligible_conflicts = files
            .iter()
            .flat_map(|f| f.conflicts.iter())
            .filter(|c| c.is_ai_eligible())
            .count();
        Self {
            tasks: tasks.to_vec(),
            total_files: files.len(),
            total_conflicts,
            ai_eligible_conflicts,
            files,
        }
    }

    pub fn has_conflicts(&self) -> bool {
        self.total_conflicts > 0
    }
}
