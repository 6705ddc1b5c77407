//! File Timeline Tracker
//!
//! Owns every `FileTimeline` of one project. Lifecycle events (task start,
//! worktree writes, main-branch commits, merge/abandon) mutate the in-memory
//! timelines and each touched timeline is rewritten to disk before the call
//! returns, so a tracker can be rebuilt from disk at any event boundary.
//!
//! There is no process-wide instance: callers construct one tracker per
//! project root and pass it to whoever needs it.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::git::GitManager;
use crate::merge::error::{EngineResult, MergeError};
use crate::merge::timeline::models::{
    BranchPoint, FileTimeline, MainBranchEvent, MainEventSource, MergeContext, OtherTaskSummary,
    TaskFileView, TaskIntent,
};
use crate::merge::timeline::storage::TimelineStore;

/// Commit hash recorded when the project is not a git repository
pub const WORKING_TREE_REF: &str = "working-tree";

/// Normalize a project-relative path so lookups are separator-agnostic
pub fn normalize_file_path(file_path: &str) -> String {
    let unified = file_path.replace('\\', "/");
    unified.trim_start_matches("./").to_string()
}

/// Tracks per-file history for the main line and every task worktree
pub struct FileTimelineTracker {
    project_path: PathBuf,
    store: TimelineStore,
    timelines: HashMap<String, FileTimeline>,
}

impl FileTimelineTracker {
    /// Create a tracker for a project, eagerly loading persisted timelines
    pub fn new(project_path: &Path) -> EngineResult<Self> {
        Self::with_store(project_path, TimelineStore::new(project_path))
    }

    /// Create a tracker backed by an explicit store
    pub fn with_store(project_path: &Path, store: TimelineStore) -> EngineResult<Self> {
        let timelines = store.load_all().map_err(MergeError::Storage)?;
        log::info!(
            "[TimelineTracker] Loaded {} timeline(s) for {:?}",
            timelines.len(),
            project_path
        );
        Ok(Self {
            project_path: project_path.to_path_buf(),
            store,
            timelines,
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    fn persist(&self, file_path: &str) -> EngineResult<()> {
        if let Some(timeline) = self.timelines.get(file_path) {
            self.store.save(timeline).map_err(MergeError::Storage)?;
        }
        Ok(())
    }

    fn open_git(&self) -> Option<GitManager> {
        GitManager::new(&self.project_path).ok()
    }

    /// Content and commit of `file_path` at `commit` (or HEAD), falling back
    /// to the on-disk file when the project has no git repository
    fn resolve_branch_point(&self, file_path: &str, commit: Option<&str>) -> BranchPoint {
        if let Some(git) = self.open_git() {
            let rev = commit.unwrap_or("HEAD");
            if let Ok(commit_hash) = git.resolve_commit_id(rev) {
                let content = match git.file_content_at(&commit_hash, file_path) {
                    Ok(content) => content.unwrap_or_default(),
                    Err(e) => {
                        log::warn!(
                            "[TimelineTracker] Failed to read {} at {}: {}",
                            file_path,
                            commit_hash,
                            e
                        );
                        String::new()
                    }
                };
                return BranchPoint {
                    commit_hash,
                    content,
                    timestamp: Utc::now(),
                };
            }
        }

        let content = fs::read_to_string(self.project_path.join(file_path)).unwrap_or_default();
        BranchPoint {
            commit_hash: commit.unwrap_or(WORKING_TREE_REF).to_string(),
            content,
            timestamp: Utc::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle events
    // -------------------------------------------------------------------------

    /// A task declared the files it intends to modify
    pub fn on_task_start(
        &mut self,
        task_id: &str,
        files: &[String],
        intent: Option<TaskIntent>,
        branch_point_commit: Option<&str>,
    ) -> EngineResult<()> {
        let intent = intent.unwrap_or_default();

        for file in files {
            let file_path = normalize_file_path(file);
            let branch_point = self.resolve_branch_point(&file_path, branch_point_commit);

            let timeline = self
                .timelines
                .entry(file_path.clone())
                .or_insert_with(|| FileTimeline::new(file_path.clone()));

            if timeline.task_views.contains_key(task_id) {
                log::debug!(
                    "[TimelineTracker] Task {} already tracked for {}",
                    task_id,
                    file_path
                );
                continue;
            }

            timeline.task_views.insert(
                task_id.to_string(),
                TaskFileView::new(task_id, intent.clone(), branch_point),
            );
            timeline.touch();
            self.persist(&file_path)?;
        }

        log::info!(
            "[TimelineTracker] Task {} started on {} file(s)",
            task_id,
            files.len()
        );
        Ok(())
    }

    /// A task wrote new content for a file in its worktree
    pub fn on_task_worktree_change(
        &mut self,
        task_id: &str,
        file: &str,
        new_content: &str,
    ) -> EngineResult<()> {
        let file_path = normalize_file_path(file);

        let needs_view = self
            .timelines
            .get(&file_path)
            .map_or(true, |t| !t.task_views.contains_key(task_id));
        if needs_view {
            log::warn!(
                "[TimelineTracker] Task {} changed undeclared file {}, tracking it now",
                task_id,
                file_path
            );
            let branch_point = self.resolve_branch_point(&file_path, None);
            let timeline = self
                .timelines
                .entry(file_path.clone())
                .or_insert_with(|| FileTimeline::new(file_path.clone()));
            timeline.task_views.insert(
                task_id.to_string(),
                TaskFileView::new(task_id, TaskIntent::default(), branch_point),
            );
        }

        if let Some(timeline) = self.timelines.get_mut(&file_path) {
            if let Some(view) = timeline.get_task_view_mut(task_id) {
                view.capture(new_content);
            }
            timeline.touch();
        }
        self.persist(&file_path)
    }

    /// A commit landed on the main line. Returns the tracked files it touched.
    pub fn on_main_branch_commit(&mut self, commit_ref: &str) -> EngineResult<Vec<String>> {
        let git = GitManager::new(&self.project_path)?;
        let info = git.get_commit(commit_ref)?;
        let changed = git.commit_changed_files(&info.id)?;

        let mut updated = Vec::new();
        for file_path in changed {
            if !self.timelines.contains_key(&file_path) {
                continue;
            }
            let content = git.file_content_at(&info.id, &file_path)?.unwrap_or_default();
            let source = self.source_for_commit(&file_path, &info.id);
            let event = MainBranchEvent {
                commit_hash: info.id.clone(),
                content,
                commit_message: info.message.trim().to_string(),
                author: Some(info.author.clone()).filter(|a| !a.is_empty()),
                timestamp: info.time(),
                source,
            };
            if self.apply_main_event(&file_path, event)? {
                updated.push(file_path);
            }
        }

        log::info!(
            "[TimelineTracker] Main commit {} touched {} tracked file(s)",
            info.short_id,
            updated.len()
        );
        Ok(updated)
    }

    /// Record a main-line change without inspecting git.
    ///
    /// Returns false when the file has no timeline or the commit was already recorded.
    pub fn record_main_branch_change(
        &mut self,
        file: &str,
        commit_hash: &str,
        content: &str,
        commit_message: &str,
    ) -> EngineResult<bool> {
        let file_path = normalize_file_path(file);
        let source = self.source_for_commit(&file_path, commit_hash);
        let event = MainBranchEvent {
            commit_hash: commit_hash.to_string(),
            content: content.to_string(),
            commit_message: commit_message.to_string(),
            author: None,
            timestamp: Utc::now(),
            source,
        };
        self.apply_main_event(&file_path, event)
    }

    fn source_for_commit(&self, file_path: &str, commit_hash: &str) -> MainEventSource {
        self.timelines
            .get(file_path)
            .and_then(|t| {
                t.task_views
                    .values()
                    .find(|v| v.merge_commit.as_deref() == Some(commit_hash))
            })
            .map(|v| MainEventSource::MergedTask {
                task_id: v.task_id.clone(),
            })
            .unwrap_or(MainEventSource::Human)
    }

    fn apply_main_event(&mut self, file_path: &str, event: MainBranchEvent) -> EngineResult<bool> {
        let Some(timeline) = self.timelines.get_mut(file_path) else {
            return Ok(false);
        };
        if timeline.has_main_event(&event.commit_hash) {
            log::debug!(
                "[TimelineTracker] Commit {} already recorded for {}",
                event.commit_hash,
                file_path
            );
            return Ok(false);
        }
        timeline.add_main_event(event);
        self.persist(file_path)?;
        Ok(true)
    }

    /// A task's work landed. Returns the number of views moved to `merged`.
    pub fn on_task_merged(&mut self, task_id: &str, commit_ref: Option<&str>) -> EngineResult<usize> {
        let commit_hash = commit_ref.map(|rev| {
            self.open_git()
                .and_then(|git| git.resolve_commit_id(rev).ok())
                .unwrap_or_else(|| rev.to_string())
        });

        let mut touched = Vec::new();
        for (file_path, timeline) in self.timelines.iter_mut() {
            let Some(view) = timeline.get_task_view_mut(task_id) else {
                continue;
            };
            if !view.mark_merged(commit_hash.as_deref()) {
                continue;
            }
            let merged_content = view.worktree_content().map(|c| c.to_string());

            if let (Some(hash), Some(content)) = (commit_hash.as_ref(), merged_content) {
                if !timeline.has_main_event(hash) {
                    timeline.add_main_event(MainBranchEvent {
                        commit_hash: hash.clone(),
                        content,
                        commit_message: format!("Merged task {}", task_id),
                        author: None,
                        timestamp: Utc::now(),
                        source: MainEventSource::MergedTask {
                            task_id: task_id.to_string(),
                        },
                    });
                }
            }
            timeline.touch();
            touched.push(file_path.clone());
        }

        for file_path in &touched {
            self.persist(file_path)?;
        }

        log::info!(
            "[TimelineTracker] Task {} merged ({} file view(s))",
            task_id,
            touched.len()
        );
        Ok(touched.len())
    }

    /// A task was dropped. Returns the number of views moved to `abandoned`.
    pub fn on_task_abandoned(&mut self, task_id: &str) -> EngineResult<usize> {
        let mut touched = Vec::new();
        for (file_path, timeline) in self.timelines.iter_mut() {
            let abandoned = timeline
                .get_task_view_mut(task_id)
                .map_or(false, |view| view.mark_abandoned());
            if abandoned {
                timeline.touch();
                touched.push(file_path.clone());
            }
        }

        for file_path in &touched {
            self.persist(file_path)?;
        }

        log::info!(
            "[TimelineTracker] Task {} abandoned ({} file view(s))",
            task_id,
            touched.len()
        );
        Ok(touched.len())
    }

    /// Rebuild a task's views from its worktree for tasks that predate tracking.
    ///
    /// The branch point is the merge base of the worktree HEAD and
    /// `target_branch`; drift is the number of target commits touching each
    /// file since then. Returns the files now tracked for the task.
    pub fn initialize_from_worktree(
        &mut self,
        task_id: &str,
        worktree_path: &Path,
        intent: Option<TaskIntent>,
        target_branch: &str,
    ) -> EngineResult<Vec<String>> {
        let git = GitManager::new(worktree_path)?;
        let base = git.merge_base("HEAD", target_branch)?;
        let base_time = git.get_commit(&base)?.time();
        let task_commits = git.count_commits_between(&base, "HEAD")?;
        let intent = intent.unwrap_or_default();

        let files: Vec<String> = git
            .changed_files_since(&base)?
            .into_iter()
            .filter(|f| !f.starts_with(".ralph-ui/") && !f.starts_with(".worktrees/"))
            .collect();

        for file_path in &files {
            let branch_content = git.file_content_at(&base, file_path)?.unwrap_or_default();
            let worktree_content =
                fs::read_to_string(worktree_path.join(file_path)).unwrap_or_default();
            let main_commits = git.commits_touching(&base, target_branch, file_path)?;

            let mut main_events = Vec::with_capacity(main_commits.len());
            for hash in &main_commits {
                let info = git.get_commit(hash)?;
                main_events.push(MainBranchEvent {
                    commit_hash: info.id.clone(),
                    content: git.file_content_at(hash, file_path)?.unwrap_or_default(),
                    commit_message: info.message.trim().to_string(),
                    author: Some(info.author.clone()).filter(|a| !a.is_empty()),
                    timestamp: info.time(),
                    source: MainEventSource::Human,
                });
            }

            let timeline = self
                .timelines
                .entry(file_path.clone())
                .or_insert_with(|| FileTimeline::new(file_path.clone()));

            for event in main_events {
                timeline.backfill_main_event(event);
            }

            let view = timeline
                .task_views
                .entry(task_id.to_string())
                .or_insert_with(|| {
                    let mut view = TaskFileView::new(
                        task_id,
                        intent.clone(),
                        BranchPoint {
                            commit_hash: base.clone(),
                            content: branch_content,
                            timestamp: base_time,
                        },
                    );
                    view.started_at = base_time;
                    view
                });
            view.commits_behind_main = main_commits.len() as u32;
            view.worktree_path = Some(worktree_path.to_string_lossy().to_string());
            view.capture(worktree_content);
            timeline.touch();

            self.persist(file_path)?;
        }

        log::info!(
            "[TimelineTracker] Initialized task {} from worktree {:?}: {} file(s), {} commit(s) since {}",
            task_id,
            worktree_path,
            files.len(),
            task_commits,
            &base[..base.len().min(7)]
        );
        Ok(files)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Everything known about a task's view of a file, or None if untracked
    pub fn get_merge_context(&self, task_id: &str, file: &str) -> Option<MergeContext> {
        let file_path = normalize_file_path(file);
        let timeline = self.timelines.get(&file_path)?;
        let view = timeline.get_task_view(task_id)?;

        let main_evolution: Vec<MainBranchEvent> = timeline
            .events_since_branch_point(task_id)
            .into_iter()
            .cloned()
            .collect();

        let current_main_content = main_evolution
            .last()
            .map(|e| e.content.clone())
            .unwrap_or_else(|| view.branch_point.content.clone());

        let other_active_tasks = timeline
            .active_views()
            .filter(|v| v.task_id != task_id)
            .map(|v| OtherTaskSummary {
                task_id: v.task_id.clone(),
                task_intent: v.task_intent.clone(),
                commits_behind_main: v.commits_behind_main,
                started_at: v.started_at,
            })
            .collect();

        Some(MergeContext {
            file_path,
            task_id: task_id.to_string(),
            task_intent: view.task_intent.clone(),
            branch_point: view.branch_point.clone(),
            worktree_content: view.worktree_content().map(|c| c.to_string()),
            main_evolution,
            commits_behind_main: view.commits_behind_main,
            current_main_content,
            other_active_tasks,
        })
    }

    pub fn get_timeline(&self, file: &str) -> Option<&FileTimeline> {
        self.timelines.get(&normalize_file_path(file))
    }

    pub fn has_timeline(&self, file: &str) -> bool {
        self.timelines.contains_key(&normalize_file_path(file))
    }

    /// Files the task has a view on, sorted
    pub fn get_files_for_task(&self, task_id: &str) -> Vec<String> {
        let files: BTreeSet<&String> = self
            .timelines
            .iter()
            .filter(|(_, t)| t.task_views.contains_key(task_id))
            .map(|(path, _)| path)
            .collect();
        files.into_iter().cloned().collect()
    }

    /// Task ids still active on a file
    pub fn get_active_tasks_for_file(&self, file: &str) -> Vec<String> {
        self.get_timeline(file)
            .map(|t| t.active_views().map(|v| v.task_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Drift of a task per file
    pub fn get_task_drift(&self, task_id: &str) -> HashMap<String, u32> {
        self.timelines
            .iter()
            .filter_map(|(path, t)| {
                t.get_task_view(task_id)
                    .filter(|v| v.is_active())
                    .map(|v| (path.clone(), v.commits_behind_main))
            })
            .collect()
    }

    /// Content of the file at the task's branch point
    pub fn baseline_for(&self, task_id: &str, file: &str) -> Option<&str> {
        self.get_timeline(file)?
            .get_task_view(task_id)
            .map(|v| v.branch_point.content.as_str())
    }
}
