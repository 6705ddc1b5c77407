//! Minimal per-conflict context handed to the model

use serde::{Deserialize, Serialize};

use crate::merge::conflict_detector::ConflictDetector;
use crate::merge::semantic::Language;
use crate::merge::types::{
    ChangeType, ConflictRegion, SemanticChange, TaskIntent, TaskSnapshot, LOCATION_FILE,
};

/// Rough token count used for budget checks (about four characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// One involved task's side of a conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskChangeContext {
    pub task_id: String,
    pub intent: TaskIntent,
    pub change_types: Vec<ChangeType>,
    /// The task's version of the conflicting region, possibly truncated
    pub changes: String,
    pub truncated_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictContext {
    pub conflict: ConflictRegion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    /// Baseline code at the conflict location (empty when no task's baseline had it)
    pub baseline: String,
    pub tasks: Vec<TaskChangeContext>,
}

impl ConflictContext {
    /// Collect what each involved task did at the conflict location.
    ///
    /// Tasks keep the order of `conflict.tasks_involved`, which is participant order.
    pub fn build(
        conflict: &ConflictRegion,
        baseline: &str,
        snapshots: &[TaskSnapshot],
        max_change_lines: usize,
    ) -> Self {
        let tasks = conflict
            .tasks_involved
            .iter()
            .filter_map(|task_id| snapshots.iter().find(|s| &s.task_id == task_id))
            .map(|snapshot| task_context(conflict, snapshot, max_change_lines))
            .collect();

        Self {
            conflict: conflict.clone(),
            language: Language::from_path(&conflict.file_path),
            baseline: baseline.to_string(),
            tasks,
        }
    }

    pub fn location(&self) -> &str {
        &self.conflict.location
    }

    pub fn is_truncated(&self) -> bool {
        self.tasks.iter().any(|t| t.truncated_lines > 0)
    }
}

fn task_context(
    conflict: &ConflictRegion,
    snapshot: &TaskSnapshot,
    max_change_lines: usize,
) -> TaskChangeContext {
    let relevant: Vec<&SemanticChange> = snapshot
        .semantic_changes
        .iter()
        .filter(|c| ConflictDetector::locations_overlap(&c.location, &conflict.location))
        .collect();

    let text = if conflict.location == LOCATION_FILE {
        snapshot.content_after.clone()
    } else {
        relevant
            .iter()
            .map(|c| describe_change(c))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let (changes, truncated_lines) = truncate_lines(&text, max_change_lines);

    let mut change_types: Vec<ChangeType> = relevant.iter().map(|c| c.change_type).collect();
    change_types.sort();
    change_types.dedup();

    TaskChangeContext {
        task_id: snapshot.task_id.clone(),
        intent: snapshot.task_intent.clone(),
        change_types,
        changes,
        truncated_lines,
    }
}

fn describe_change(change: &SemanticChange) -> String {
    match (&change.content_after, change.change_type.is_removal()) {
        (_, true) => format!("(removes {})", change.target_name),
        (Some(after), false) => after.clone(),
        (None, false) => format!("({} {})", change.change_type, change.target_name),
    }
}

/// Keep the first `max_lines` lines; returns how many were dropped
fn truncate_lines(text: &str, max_lines: usize) -> (String, usize) {
    let lines: Vec<&str> = text.lines().collect();
    if max_lines == 0 || lines.len() <= max_lines {
        return (text.to_string(), 0);
    }
    let dropped = lines.len() - max_lines;
    let mut kept = lines[..max_lines].join("\n");
    kept.push_str(&format!("\n... ({} more lines not shown)", dropped));
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::types::ConflictSeverity;
    use chrono::Utc;

    fn snapshot(task_id: &str, body: &str) -> TaskSnapshot {
        TaskSnapshot {
            task_id: task_id.to_string(),
            task_intent: TaskIntent::new(format!("{} intent", task_id), ""),
            started_at: Utc::now(),
            semantic_changes: vec![
                SemanticChange::new(ChangeType::ModifyFunction, "run", "function:run", 1, 2)
                    .with_after(body),
                SemanticChange::new(ChangeType::AddImport, "import os", "file_top", 1, 1)
                    .with_after("import os"),
            ],
            content_after: body.to_string(),
            fallback_reason: None,
        }
    }

    fn conflict() -> ConflictRegion {
        ConflictRegion {
            file_path: "app.py".to_string(),
            location: "function:run".to_string(),
            tasks_involved: vec!["b".to_string(), "a".to_string()],
            change_types: vec![ChangeType::ModifyFunction],
            severity: ConflictSeverity::High,
            reason: "both rewrite run".to_string(),
            merge_strategy: None,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_context_keeps_only_relevant_changes_in_conflict_order() {
        let snapshots = vec![
            snapshot("a", "def run():\n    return 1"),
            snapshot("b", "def run():\n    return 2"),
        ];
        let ctx = ConflictContext::build(&conflict(), "def run():\n    pass", &snapshots, 60);

        assert_eq!(ctx.language, Some(Language::Python));
        let ids: Vec<_> = ctx.tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(ctx.tasks[0].changes, "def run():\n    return 2");
        assert_eq!(ctx.tasks[0].change_types, vec![ChangeType::ModifyFunction]);
        assert!(!ctx.is_truncated());
    }

    #[test]
    fn test_long_changes_are_truncated_visibly() {
        let body = (0..10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let snapshots = vec![snapshot("a", &body), snapshot("b", "def run(): pass")];
        let ctx = ConflictContext::build(&conflict(), "", &snapshots, 4);

        let a = ctx.tasks.iter().find(|t| t.task_id == "a").unwrap();
        assert_eq!(a.truncated_lines, 6);
        assert!(a.changes.ends_with("... (6 more lines not shown)"));
        assert!(ctx.is_truncated());
    }
}
