//! Merge Orchestrator
//!
//! Drives one merge invocation through
//! `analyzing -> auto_merging -> conflict_resolving -> writing -> done`:
//!
//! 1. Acquire the `MergeLock` for the scope (the only step that can make the
//!    whole run fail besides setup I/O)
//! 2. Load baselines and captured worktree content from the timeline tracker
//!    and analyze every participant's edit
//! 3. Combine compatible edits per file, collecting conflicts
//! 4. Send eligible conflicts to the AI resolver, everything else to review
//! 5. Write fully resolved files atomically (skipped in dry-run)
//!
//! Per-file failures are recorded in the report and never abort sibling files.
//! Files with unresolved conflicts are left untouched.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::file_storage::{atomic_write, init_merge_storage};
use crate::merge::ai_resolver::{AiClient, AiResolver, CliAgentClient, ConflictContext};
use crate::merge::auto_merger::{AutoMerger, FilePlan};
use crate::merge::config::{MergeConfig, MergeConfigManager};
use crate::merge::error::{EngineResult, MergeError};
use crate::merge::line_endings::{self, LineEnding};
use crate::merge::lock::MergeLock;
use crate::merge::progress::{MergeStage, ProgressCallback, ProgressReporter};
use crate::merge::report::{FileMergeOutcome, FilePreview, MergePreview, MergeReport};
use crate::merge::semantic::SemanticAnalyzer;
use crate::merge::timeline::{FileTimelineTracker, TaskFileView};
use crate::merge::types::{
    participant_order, ConflictRegion, MergeDecision, MergeResult, MergeStrategy, TaskIntent,
    TaskSnapshot, LOCATION_FILE,
};
use crate::utils::lock_mutex_recover;

/// Participant id for main-line changes made after the tasks branched
pub const MAIN_PARTICIPANT: &str = "main";

/// What to merge
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub task_ids: Vec<String>,
    /// Lock scope; defaults to the sorted task ids
    pub scope: Option<String>,
    pub dry_run: bool,
}

impl MergeRequest {
    pub fn new(task_ids: Vec<String>) -> Self {
        Self {
            task_ids,
            scope: None,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn scope(&self) -> String {
        self.scope.clone().unwrap_or_else(|| {
            let mut ids = self.task_ids.clone();
            ids.sort();
            ids.join("+")
        })
    }
}

/// Analyzed inputs for one file
struct FileInputs {
    file_path: String,
    /// LF-normalized common baseline
    baseline: String,
    line_ending: LineEnding,
    /// Sorted in participant order
    participants: Vec<TaskSnapshot>,
}

impl FileInputs {
    fn task_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.task_id.clone()).collect()
    }
}

struct PendingFile {
    inputs: FileInputs,
    outcome: FileMergeOutcome,
    plan: Option<FilePlan>,
    conflicts: Vec<ConflictRegion>,
}

pub struct MergeOrchestrator {
    project_path: PathBuf,
    tracker: Arc<Mutex<FileTimelineTracker>>,
    resolver: AiResolver,
    config: MergeConfig,
    progress: ProgressReporter,
}

impl MergeOrchestrator {
    pub fn new(
        tracker: Arc<Mutex<FileTimelineTracker>>,
        resolver: AiResolver,
        config: MergeConfig,
    ) -> Self {
        let project_path = lock_mutex_recover(&tracker).project_path().to_path_buf();
        Self {
            project_path,
            tracker,
            resolver,
            config,
            progress: ProgressReporter::default(),
        }
    }

    /// Orchestrator for a project with its stored config, tracker and CLI agent
    pub fn from_project(project_path: &Path) -> EngineResult<Self> {
        let config = MergeConfigManager::new(project_path)
            .read()
            .map_err(MergeError::Storage)?;
        Self::from_project_with_config(project_path, config)
    }

    /// Like `from_project`, with an explicit config instead of `merge.yaml`
    pub fn from_project_with_config(project_path: &Path, config: MergeConfig) -> EngineResult<Self> {
        init_merge_storage(project_path).map_err(MergeError::Storage)?;
        let tracker = Arc::new(Mutex::new(FileTimelineTracker::new(project_path)?));

        let client: Option<Arc<dyn AiClient>> = if config.enable_ai {
            let cli = CliAgentClient::new(&config.agent, project_path, config.ai_timeout_secs);
            if cli.is_available() {
                Some(Arc::new(cli))
            } else {
                log::warn!(
                    "[MergeOrchestrator] {} not found, conflicts will go to human review",
                    config.agent.command
                );
                None
            }
        } else {
            None
        };

        let resolver = AiResolver::new(client, config.resolver_config());
        Ok(Self::new(tracker, resolver, config))
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = ProgressReporter::new(Some(callback));
        self
    }

    pub fn tracker(&self) -> Arc<Mutex<FileTimelineTracker>> {
        self.tracker.clone()
    }

    pub async fn merge_tasks(&self, task_ids: &[String], dry_run: bool) -> EngineResult<MergeReport> {
        self.merge(&MergeRequest::new(task_ids.to_vec()).dry_run(dry_run))
            .await
    }

    /// Run a full merge. Only lock acquisition and setup failures return `Err`.
    pub async fn merge(&self, request: &MergeRequest) -> EngineResult<MergeReport> {
        if request.task_ids.is_empty() {
            return Err(MergeError::InvalidRequest("no tasks to merge".to_string()));
        }
        let scope = request.scope();
        let started_at = Utc::now();

        let lock = MergeLock::acquire(
            &self.project_path,
            &scope,
            Duration::from_secs(self.config.lock_timeout_secs),
            Duration::from_millis(self.config.lock_poll_millis),
        )
        .await?;

        log::info!(
            "[MergeOrchestrator] Merging {:?} (scope '{}', dry_run={})",
            request.task_ids,
            scope,
            request.dry_run
        );

        self.progress.report(
            MergeStage::Analyzing,
            0,
            format!("Analyzing {} task(s)", request.task_ids.len()),
            None,
        );
        let inputs = self.collect_inputs(&request.task_ids)?;

        self.progress.report(
            MergeStage::AutoMerging,
            20,
            format!("Combining changes in {} file(s)", inputs.len()),
            None,
        );
        let mut pending: Vec<PendingFile> = inputs.into_iter().map(Self::auto_merge).collect();

        let with_conflicts = pending.iter().filter(|f| !f.conflicts.is_empty()).count();
        self.progress.report(
            MergeStage::ConflictResolving,
            50,
            format!("Resolving conflicts in {} file(s)", with_conflicts),
            None,
        );
        let mut done = 0;
        for file in pending.iter_mut().filter(|f| !f.conflicts.is_empty()) {
            self.resolve_file_conflicts(file).await;
            done += 1;
            self.progress.report(
                MergeStage::ConflictResolving,
                50 + (30 * done / with_conflicts.max(1)) as u8,
                format!("Resolved conflicts in {}", file.inputs.file_path),
                Some(serde_json::json!({
                    "file": file.inputs.file_path,
                    "decision": file.outcome.decision,
                })),
            );
        }

        let mut outcomes: Vec<FileMergeOutcome> = pending
            .into_iter()
            .map(|file| {
                let mut outcome = file.outcome;
                outcome.merged_content = outcome
                    .merged_content
                    .map(|c| line_endings::restore(&c, file.inputs.line_ending));
                outcome
            })
            .collect();

        if request.dry_run {
            log::info!("[MergeOrchestrator] Dry run, nothing written");
        } else {
            self.progress.report(
                MergeStage::Writing,
                80,
                format!("Writing {} file(s)", outcomes.iter().filter(|o| o.is_success()).count()),
                None,
            );
            for outcome in outcomes.iter_mut() {
                self.write_outcome(outcome);
            }
            self.mark_tasks_merged(&request.task_ids, &outcomes);
        }

        let report = MergeReport::from_outcomes(
            &scope,
            &request.task_ids,
            request.dry_run,
            started_at,
            outcomes,
        );
        if !request.dry_run && self.config.save_reports {
            if let Err(e) = report.save(&self.project_path) {
                log::error!("[MergeOrchestrator] Failed to save report: {}", e);
            }
        }

        self.progress.report(
            MergeStage::Done,
            100,
            if report.success {
                "Merge complete".to_string()
            } else {
                format!("{} conflict(s) need attention", report.unresolved_conflicts().len())
            },
            Some(serde_json::json!({
                "merge_id": report.merge_id,
                "files_processed": report.stats.files_processed,
            })),
        );
        log::info!(
            "[MergeOrchestrator] Merge {} finished: success={}, files={}, ai_calls={}",
            report.merge_id,
            report.success,
            report.stats.files_processed,
            report.stats.ai_calls_made
        );

        drop(lock);
        Ok(report)
    }

    /// Same analysis as a merge, without the lock, the AI or any write
    pub fn preview_merge(&self, task_ids: &[String]) -> EngineResult<MergePreview> {
        if task_ids.is_empty() {
            return Err(MergeError::InvalidRequest("no tasks to preview".to_string()));
        }
        let inputs = self.collect_inputs(task_ids)?;

        let files = inputs
            .into_iter()
            .map(|inputs| {
                let fallback_reason = inputs
                    .participants
                    .iter()
                    .find_map(|p| p.fallback_reason.clone());
                let pending = Self::auto_merge(inputs);
                FilePreview {
                    file_path: pending.inputs.file_path.clone(),
                    tasks: pending.inputs.task_ids(),
                    strategy: pending.outcome.strategy,
                    conflict_count: pending.conflicts.len(),
                    conflicts: pending.conflicts,
                    fallback_reason,
                }
            })
            .collect();

        Ok(MergePreview::new(task_ids, files))
    }

    // -------------------------------------------------------------------------
    // Analysis
    // -------------------------------------------------------------------------

    fn collect_inputs(&self, task_ids: &[String]) -> EngineResult<Vec<FileInputs>> {
        let tracker = lock_mutex_recover(&self.tracker);

        let mut files = BTreeSet::new();
        for task_id in task_ids {
            let task_files = tracker.get_files_for_task(task_id);
            if task_files.is_empty() {
                return Err(MergeError::TaskNotFound(task_id.clone()));
            }
            files.extend(task_files);
        }

        let mut inputs = Vec::new();
        for file_path in files {
            let Some(timeline) = tracker.get_timeline(&file_path) else {
                continue;
            };

            let views: Vec<&TaskFileView> = task_ids
                .iter()
                .filter_map(|id| timeline.get_task_view(id))
                .filter(|view| {
                    if !view.is_active() {
                        log::debug!(
                            "[MergeOrchestrator] Skipping {} for {} ({})",
                            file_path,
                            view.task_id,
                            view.status
                        );
                    }
                    view.is_active()
                })
                .collect();

            // The earliest branch point is the common baseline
            let Some(base_view) = views.iter().min_by(|a, b| {
                a.branch_point
                    .timestamp
                    .cmp(&b.branch_point.timestamp)
                    .then_with(|| a.task_id.cmp(&b.task_id))
            }) else {
                continue;
            };
            let raw_baseline = base_view.branch_point.content.as_str();
            let baseline = line_endings::normalize(raw_baseline);

            let mut participants = Vec::new();

            let drifted = views.iter().any(|v| v.commits_behind_main > 0);
            if let Some(main_content) = timeline.current_main_content().filter(|_| drifted) {
                let main_content = line_endings::normalize(main_content);
                if main_content != baseline {
                    participants.push(Self::snapshot(
                        &file_path,
                        MAIN_PARTICIPANT,
                        TaskIntent::new("Changes already on the main line", ""),
                        base_view.branch_point.timestamp,
                        &baseline,
                        main_content,
                    ));
                }
            }

            for view in &views {
                let Some(content) = view.worktree_content() else {
                    log::debug!(
                        "[MergeOrchestrator] {} has no captured content for {}",
                        view.task_id,
                        file_path
                    );
                    continue;
                };
                let content = line_endings::normalize(content);
                let own_baseline = line_endings::normalize(&view.branch_point.content);
                if content == own_baseline {
                    continue;
                }
                participants.push(Self::snapshot(
                    &file_path,
                    &view.task_id,
                    view.task_intent.clone(),
                    view.started_at,
                    &own_baseline,
                    content,
                ));
            }

            if participants.is_empty() {
                continue;
            }
            participants.sort_by(participant_order);

            let style_sample = if raw_baseline.is_empty() {
                views.iter().find_map(|v| v.worktree_content()).unwrap_or("")
            } else {
                raw_baseline
            };

            inputs.push(FileInputs {
                file_path: file_path.clone(),
                baseline,
                line_ending: LineEnding::detect(style_sample),
                participants,
            });
        }

        log::info!(
            "[MergeOrchestrator] {} file(s) with changes across {} task(s)",
            inputs.len(),
            task_ids.len()
        );
        Ok(inputs)
    }

    fn snapshot(
        file_path: &str,
        task_id: &str,
        task_intent: TaskIntent,
        started_at: DateTime<Utc>,
        baseline: &str,
        content_after: String,
    ) -> TaskSnapshot {
        let analysis = SemanticAnalyzer::analyze(file_path, baseline, &content_after);
        TaskSnapshot {
            task_id: task_id.to_string(),
            task_intent,
            started_at,
            semantic_changes: analysis.changes,
            content_after,
            fallback_reason: analysis.fallback_reason,
        }
    }

    fn auto_merge(inputs: FileInputs) -> PendingFile {
        let tasks = inputs.task_ids();

        if let [only] = inputs.participants.as_slice() {
            let mut outcome =
                FileMergeOutcome::new(&inputs.file_path, MergeStrategy::DirectCopy, tasks);
            outcome.merged_content = Some(only.content_after.clone());
            return PendingFile {
                inputs,
                outcome,
                plan: None,
                conflicts: Vec::new(),
            };
        }

        let merged = AutoMerger::merge_file(&inputs.file_path, &inputs.baseline, &inputs.participants);
        let mut outcome = FileMergeOutcome::new(&inputs.file_path, merged.strategy, tasks);
        outcome.auto_resolved = merged.auto_resolved;
        outcome.merged_content = merged.content;

        if !merged.conflicts.is_empty() {
            log::info!(
                "[MergeOrchestrator] {}: {} conflict(s)",
                inputs.file_path,
                merged.conflicts.len()
            );
            outcome.decision = MergeDecision::NeedsHumanReview;
            outcome.conflicts_remaining = merged.conflicts.clone();
        }

        PendingFile {
            inputs,
            outcome,
            plan: merged.plan,
            conflicts: merged.conflicts,
        }
    }

    // -------------------------------------------------------------------------
    // Conflict resolution
    // -------------------------------------------------------------------------

    async fn resolve_file_conflicts(&self, file: &mut PendingFile) {
        let mut results: Vec<MergeResult> = Vec::new();
        let mut contexts: Vec<ConflictContext> = Vec::new();

        for conflict in &file.conflicts {
            if !self.resolver.can_resolve(conflict) {
                results.push(MergeResult::needs_human_review(
                    conflict,
                    format!("{} conflict at {} needs a human decision", conflict.severity, conflict.location),
                ));
                continue;
            }
            let baseline_region = if conflict.location == LOCATION_FILE {
                file.inputs.baseline.clone()
            } else {
                file.plan
                    .as_ref()
                    .map(|plan| plan.baseline_region(&conflict.location))
                    .unwrap_or_default()
            };
            contexts.push(ConflictContext::build(
                conflict,
                &baseline_region,
                &file.inputs.participants,
                self.resolver.config().max_change_lines,
            ));
        }
        results.extend(self.resolver.resolve_conflicts(&contexts).await);

        let mut whole_file: Option<String> = None;
        for result in results.iter_mut().filter(|r| r.is_success()) {
            let (Some(location), Some(code)) = (result.location.clone(), result.merged_content.clone()) else {
                continue;
            };
            if location == LOCATION_FILE {
                whole_file = Some(code);
                continue;
            }
            let applied = match file.plan.as_mut() {
                Some(plan) => plan.apply_resolution(&location, &code),
                None => Err(format!("no structured plan for {}", location)),
            };
            if let Err(e) = applied {
                log::error!(
                    "[MergeOrchestrator] Could not apply resolution for {}:{}: {}",
                    file.inputs.file_path,
                    location,
                    e
                );
                if let Some(conflict) = result.conflicts_resolved.first().cloned() {
                    let cost = (result.ai_calls_made, result.tokens_used);
                    *result = MergeResult::failed(&conflict, e);
                    result.ai_calls_made = cost.0;
                    result.tokens_used = cost.1;
                }
            }
        }

        let outcome = &mut file.outcome;
        outcome.conflicts_resolved = results
            .iter()
            .filter(|r| r.is_success())
            .flat_map(|r| r.conflicts_resolved.iter().cloned())
            .collect();
        outcome.conflicts_remaining = results
            .iter()
            .filter(|r| !r.is_success())
            .flat_map(|r| r.conflicts_remaining.iter().cloned())
            .collect();

        if outcome.conflicts_remaining.is_empty() {
            let content = match whole_file {
                Some(code) => Some(match_trailing_newline(code, &file.inputs.baseline)),
                None => file.plan.as_ref().map(|plan| plan.render()),
            };
            outcome.decision = if content.is_some() {
                MergeDecision::AiMerged
            } else {
                MergeDecision::Failed
            };
            outcome.merged_content = content;
        } else {
            outcome.merged_content = None;
            let failure = results.iter().find(|r| r.decision == MergeDecision::Failed);
            outcome.decision = if failure.is_some() {
                MergeDecision::Failed
            } else {
                MergeDecision::NeedsHumanReview
            };
            outcome.error = failure.and_then(|r| r.error.clone());
        }
        outcome.ai_results = results;
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    fn write_outcome(&self, outcome: &mut FileMergeOutcome) {
        if !outcome.is_success() {
            return;
        }
        let Some(content) = outcome.merged_content.as_deref() else {
            return;
        };
        let target = self.project_path.join(&outcome.file_path);

        if std::fs::read_to_string(&target).map_or(false, |current| current == content) {
            outcome.written = true;
            return;
        }

        match atomic_write(&target, content) {
            Ok(()) => {
                log::info!("[MergeOrchestrator] Wrote {}", outcome.file_path);
                outcome.written = true;
            }
            Err(e) => {
                log::error!("[MergeOrchestrator] Failed to write {}: {}", outcome.file_path, e);
                outcome.decision = MergeDecision::Failed;
                outcome.error = Some(e);
            }
        }
    }

    /// Tasks whose every file landed move to `merged` in the tracker
    fn mark_tasks_merged(&self, task_ids: &[String], outcomes: &[FileMergeOutcome]) {
        let blocked: HashSet<&str> = outcomes
            .iter()
            .filter(|o| !o.is_success() || !o.written)
            .flat_map(|o| o.tasks.iter().map(|t| t.as_str()))
            .collect();

        let mut tracker = lock_mutex_recover(&self.tracker);
        for task_id in task_ids.iter().filter(|t| !blocked.contains(t.as_str())) {
            if let Err(e) = tracker.on_task_merged(task_id, None) {
                log::warn!(
                    "[MergeOrchestrator] Failed to mark {} merged: {}",
                    task_id,
                    e
                );
            }
        }
    }
}

/// Whole-file AI output follows the baseline's trailing newline
fn match_trailing_newline(mut content: String, baseline: &str) -> String {
    let wants_newline = baseline.is_empty() || baseline.ends_with('\n');
    if wants_newline && !content.ends_with('\n') {
        content.push('\n');
    }
    content
}
