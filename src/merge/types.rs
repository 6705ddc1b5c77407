//! Shared vocabulary of the merge engine
//!
//! Change kinds, conflict severity, merge strategies and decisions, plus the
//! records that flow between the analyzer, the rules, the resolvers and the
//! orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Location anchor for insertions before the first construct
pub const LOCATION_FILE_TOP: &str = "file_top";
/// Location anchor for insertions after the last construct
pub const LOCATION_FILE_BOTTOM: &str = "file_bottom";
/// Whole-file location used by the line-merge fallback; overlaps everything
pub const LOCATION_FILE: &str = "file";

/// Kind of a structured edit.
///
/// Every match over this enum in the rules and the merger is exhaustive, so a
/// new kind has to be handled everywhere before the crate builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    AddImport,
    RemoveImport,
    AddFunction,
    RemoveFunction,
    ModifyFunction,
    /// Lines inserted only before and after an untouched span of a function
    WrapFunction,
    AddClass,
    RemoveClass,
    ModifyClass,
    AddVariable,
    RemoveVariable,
    ModifyVariable,
    /// Loose top-level code with no enclosing construct
    AddStatement,
    /// Whitespace-only edit of a construct
    FormattingOnly,
    /// Whole-file change the analyzer could not structure
    Unknown,
}

/// Coarse grouping of change kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCategory {
    Import,
    Function,
    Class,
    Variable,
    Statement,
    Formatting,
    Unknown,
}

impl ChangeType {
    pub fn category(&self) -> ChangeCategory {
        match self {
            ChangeType::AddImport | ChangeType::RemoveImport => ChangeCategory::Import,
            ChangeType::AddFunction
            | ChangeType::RemoveFunction
            | ChangeType::ModifyFunction
            | ChangeType::WrapFunction => ChangeCategory::Function,
            ChangeType::AddClass | ChangeType::RemoveClass | ChangeType::ModifyClass => {
                ChangeCategory::Class
            }
            ChangeType::AddVariable | ChangeType::RemoveVariable | ChangeType::ModifyVariable => {
                ChangeCategory::Variable
            }
            ChangeType::AddStatement => ChangeCategory::Statement,
            ChangeType::FormattingOnly => ChangeCategory::Formatting,
            ChangeType::Unknown => ChangeCategory::Unknown,
        }
    }

    /// Adds something that did not exist in the baseline
    pub fn is_addition(&self) -> bool {
        matches!(
            self,
            ChangeType::AddImport
                | ChangeType::AddFunction
                | ChangeType::AddClass
                | ChangeType::AddVariable
                | ChangeType::AddStatement
        )
    }

    /// Removes something that existed in the baseline
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            ChangeType::RemoveImport
                | ChangeType::RemoveFunction
                | ChangeType::RemoveClass
                | ChangeType::RemoveVariable
        )
    }

    /// Rewrites the body of an existing construct
    pub fn is_structural_rewrite(&self) -> bool {
        matches!(
            self,
            ChangeType::ModifyFunction
                | ChangeType::WrapFunction
                | ChangeType::ModifyClass
                | ChangeType::RemoveFunction
                | ChangeType::RemoveClass
        )
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeType::AddImport => "add_import",
            ChangeType::RemoveImport => "remove_import",
            ChangeType::AddFunction => "add_function",
            ChangeType::RemoveFunction => "remove_function",
            ChangeType::ModifyFunction => "modify_function",
            ChangeType::WrapFunction => "wrap_function",
            ChangeType::AddClass => "add_class",
            ChangeType::RemoveClass => "remove_class",
            ChangeType::ModifyClass => "modify_class",
            ChangeType::AddVariable => "add_variable",
            ChangeType::RemoveVariable => "remove_variable",
            ChangeType::ModifyVariable => "modify_variable",
            ChangeType::AddStatement => "add_statement",
            ChangeType::FormattingOnly => "formatting_only",
            ChangeType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Lines a wrapping edit adds around an untouched span.
///
/// Offsets are line indices into the change's `content_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapSpan {
    pub span_start: usize,
    pub span_end: usize,
    pub prefix: Vec<String>,
    pub suffix: Vec<String>,
    /// Indentation added to the wrapped span's lines
    pub indent: String,
}

/// One structured, located edit. Treated as immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticChange {
    pub change_type: ChangeType,
    pub target_name: String,
    pub location: String,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<WrapSpan>,
}

impl SemanticChange {
    pub fn new(
        change_type: ChangeType,
        target_name: impl Into<String>,
        location: impl Into<String>,
        line_start: usize,
        line_end: usize,
    ) -> Self {
        Self {
            change_type,
            target_name: target_name.into(),
            location: location.into(),
            line_start,
            line_end,
            content_before: None,
            content_after: None,
            wrap: None,
        }
    }

    pub fn with_before(mut self, content: impl Into<String>) -> Self {
        self.content_before = Some(content.into());
        self
    }

    pub fn with_after(mut self, content: impl Into<String>) -> Self {
        self.content_after = Some(content.into());
        self
    }

    pub fn with_wrap(mut self, wrap: WrapSpan) -> Self {
        self.wrap = Some(wrap);
        self
    }

    /// Same edit regardless of which task made it
    pub fn is_equivalent(&self, other: &SemanticChange) -> bool {
        self.change_type == other.change_type
            && self.location == other.location
            && self.target_name == other.target_name
            && self.content_after == other.content_after
    }
}

/// One-sentence statement of what a task is trying to accomplish
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl TaskIntent {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// Single line suitable for prompts and reports
    pub fn summary(&self) -> String {
        match (self.title.trim(), self.description.trim()) {
            ("", "") => "(no stated intent)".to_string(),
            (title, "") => title.to_string(),
            ("", description) => description.to_string(),
            (title, description) => format!("{}: {}", title, description),
        }
    }
}

/// How severe an unresolved conflict is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictSeverity::Low => write!(f, "low"),
            ConflictSeverity::Medium => write!(f, "medium"),
            ConflictSeverity::High => write!(f, "high"),
        }
    }
}

/// How changes at one location get combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Single participant, content copied as-is
    DirectCopy,
    /// Union of import additions/removals, deduplicated
    CombineImports,
    /// Keep every added function/class/variable
    AppendConstructs,
    /// Keep every loose statement, ordered by task start
    AppendStatements,
    /// Nest wrapping edits, earlier-started task outermost
    WrapOutsideIn,
    /// Only one task touched the region
    ReplaceRegion,
    /// Identical edits from several tasks
    KeepOne,
    /// Structural edit wins over a formatting-only edit
    PreferStructural,
    /// Changes share an anchor but do not interact
    Independent,
    /// Line-based three-way merge of the whole file
    LineMerge,
    AiRequired,
    HumanRequired,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MergeStrategy::DirectCopy => "direct_copy",
            MergeStrategy::CombineImports => "combine_imports",
            MergeStrategy::AppendConstructs => "append_constructs",
            MergeStrategy::AppendStatements => "append_statements",
            MergeStrategy::WrapOutsideIn => "wrap_outside_in",
            MergeStrategy::ReplaceRegion => "replace_region",
            MergeStrategy::KeepOne => "keep_one",
            MergeStrategy::PreferStructural => "prefer_structural",
            MergeStrategy::Independent => "independent",
            MergeStrategy::LineMerge => "line_merge",
            MergeStrategy::AiRequired => "ai_required",
            MergeStrategy::HumanRequired => "human_required",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of resolving one conflict or one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    AutoMerged,
    AiMerged,
    NeedsHumanReview,
    Failed,
}

impl MergeDecision {
    pub fn is_success(&self) -> bool {
        matches!(self, MergeDecision::AutoMerged | MergeDecision::AiMerged)
    }
}

impl std::fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeDecision::AutoMerged => write!(f, "auto_merged"),
            MergeDecision::AiMerged => write!(f, "ai_merged"),
            MergeDecision::NeedsHumanReview => write!(f, "needs_human_review"),
            MergeDecision::Failed => write!(f, "failed"),
        }
    }
}

/// One unresolved merge decision point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    pub file_path: String,
    pub location: String,
    pub tasks_involved: Vec<String>,
    pub change_types: Vec<ChangeType>,
    pub severity: ConflictSeverity,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
}

impl ConflictRegion {
    /// Only medium and high conflicts may be sent to the AI resolver
    pub fn is_ai_eligible(&self) -> bool {
        self.severity >= ConflictSeverity::Medium
    }
}

/// Analyzed contribution of one task (or of the main line) to one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_intent: TaskIntent,
    pub started_at: DateTime<Utc>,
    pub semantic_changes: Vec<SemanticChange>,
    /// Full content of the file in the task's worktree, LF-normalized
    #[serde(default)]
    pub content_after: String,
    /// Set when the analyzer could not structure this task's edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl TaskSnapshot {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }

    pub fn has_changes(&self) -> bool {
        !self.semantic_changes.is_empty()
    }
}

/// Combination order across tasks: earliest start first, task id breaks ties
pub fn participant_order(a: &TaskSnapshot, b: &TaskSnapshot) -> Ordering {
    a.started_at
        .cmp(&b.started_at)
        .then_with(|| a.task_id.cmp(&b.task_id))
}

/// Result of resolving one conflict (or one whole file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub decision: MergeDecision,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_content: Option<String>,
    #[serde(default)]
    pub conflicts_resolved: Vec<ConflictRegion>,
    #[serde(default)]
    pub conflicts_remaining: Vec<ConflictRegion>,
    pub ai_calls_made: u32,
    pub tokens_used: usize,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MergeResult {
    fn base(decision: MergeDecision, conflict: &ConflictRegion, explanation: String) -> Self {
        Self {
            decision,
            file_path: conflict.file_path.clone(),
            location: Some(conflict.location.clone()),
            merged_content: None,
            conflicts_resolved: Vec::new(),
            conflicts_remaining: Vec::new(),
            ai_calls_made: 0,
            tokens_used: 0,
            explanation,
            error: None,
        }
    }

    pub fn ai_merged(
        conflict: &ConflictRegion,
        merged_content: String,
        tokens_used: usize,
        explanation: impl Into<String>,
    ) -> Self {
        let mut result = Self::base(MergeDecision::AiMerged, conflict, explanation.into());
        result.merged_content = Some(merged_content);
        result.conflicts_resolved = vec![conflict.clone()];
        result.ai_calls_made = 1;
        result.tokens_used = tokens_used;
        result
    }

    pub fn needs_human_review(conflict: &ConflictRegion, explanation: impl Into<String>) -> Self {
        let mut result = Self::base(MergeDecision::NeedsHumanReview, conflict, explanation.into());
        result.conflicts_remaining = vec![conflict.clone()];
        result
    }

    pub fn failed(conflict: &ConflictRegion, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::base(
            MergeDecision::Failed,
            conflict,
            format!("AI resolution failed: {}", error),
        );
        result.conflicts_remaining = vec![conflict.clone()];
        result.error = Some(error);
        result
    }

    /// Record the cost of a model call that produced no usable merge
    pub fn with_call_cost(mut self, tokens_used: usize) -> Self {
        self.ai_calls_made = 1;
        self.tokens_used = tokens_used;
        self
    }

    pub fn is_success(&self) -> bool {
        self.decision.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conflict(severity: ConflictSeverity) -> ConflictRegion {
        ConflictRegion {
            file_path: "app.py".to_string(),
            location: "function:run".to_string(),
            tasks_involved: vec!["task-a".to_string(), "task-b".to_string()],
            change_types: vec![ChangeType::ModifyFunction, ChangeType::ModifyFunction],
            severity,
            reason: "both rewrite run".to_string(),
            merge_strategy: None,
        }
    }

    #[test]
    fn test_change_type_serialization() {
        let json = serde_json::to_string(&ChangeType::AddImport).unwrap();
        assert_eq!(json, "\"add_import\"");
        assert_eq!(ChangeType::ModifyFunction.to_string(), "modify_function");
    }

    #[test]
    fn test_change_type_categories() {
        assert_eq!(ChangeType::WrapFunction.category(), ChangeCategory::Function);
        assert!(ChangeType::AddStatement.is_addition());
        assert!(ChangeType::RemoveClass.is_removal());
        assert!(ChangeType::ModifyClass.is_structural_rewrite());
        assert!(!ChangeType::AddImport.is_structural_rewrite());
    }

    #[test]
    fn test_severity_ordering_and_ai_eligibility() {
        assert!(ConflictSeverity::High > ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium > ConflictSeverity::Low);
        assert!(conflict(ConflictSeverity::High).is_ai_eligible());
        assert!(conflict(ConflictSeverity::Medium).is_ai_eligible());
        assert!(!conflict(ConflictSeverity::Low).is_ai_eligible());
    }

    #[test]
    fn test_task_intent_summary() {
        assert_eq!(TaskIntent::default().summary(), "(no stated intent)");
        assert_eq!(TaskIntent::new("Add logging", "").summary(), "Add logging");
        assert_eq!(
            TaskIntent::new("Add logging", "Log every request").summary(),
            "Add logging: Log every request"
        );
    }

    #[test]
    fn test_participant_order_uses_start_then_id() {
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let snapshot = |id: &str, secs| TaskSnapshot {
            task_id: id.to_string(),
            task_intent: TaskIntent::default(),
            started_at: at(secs),
            semantic_changes: vec![],
            content_after: String::new(),
            fallback_reason: None,
        };

        assert_eq!(
            participant_order(&snapshot("b", 1), &snapshot("a", 2)),
            Ordering::Less
        );
        assert_eq!(
            participant_order(&snapshot("a", 5), &snapshot("b", 5)),
            Ordering::Less
        );
    }

    #[test]
    fn test_merge_result_constructors() {
        let c = conflict(ConflictSeverity::High);

        let merged = MergeResult::ai_merged(&c, "def run(): pass".into(), 120, "ok");
        assert!(merged.is_success());
        assert_eq!(merged.ai_calls_made, 1);
        assert_eq!(merged.conflicts_resolved.len(), 1);

        let review = MergeResult::needs_human_review(&c, "too large");
        assert_eq!(review.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(review.ai_calls_made, 0);
        assert!(review.merged_content.is_none());
        assert_eq!(review.conflicts_remaining.len(), 1);

        let failed = MergeResult::failed(&c, "network down");
        assert_eq!(failed.decision, MergeDecision::Failed);
        assert_eq!(failed.error.as_deref(), Some("network down"));
    }
}
