//! Compatibility rules
//!
//! A pure decision table over pairs of changes from different participants
//! at overlapping locations. `check(a, b)` and `check(b, a)` always agree, so
//! the order in which tasks are processed never changes the outcome. The only
//! order-sensitive strategy is `WrapOutsideIn`, where the earlier-started
//! participant becomes the outer wrapper.

use crate::merge::types::{
    ChangeCategory, ChangeType, ConflictSeverity, MergeStrategy, SemanticChange,
};

/// Verdict for one pair of changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible(MergeStrategy),
    Incompatible {
        severity: ConflictSeverity,
        reason: String,
    },
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible(_))
    }

    fn clash(severity: ConflictSeverity, reason: String) -> Self {
        Compatibility::Incompatible { severity, reason }
    }
}

/// Strategy used when a single participant owns a location
pub fn natural_strategy(change_type: ChangeType) -> MergeStrategy {
    match change_type {
        ChangeType::AddImport | ChangeType::RemoveImport => MergeStrategy::CombineImports,
        ChangeType::AddFunction | ChangeType::AddClass | ChangeType::AddVariable => {
            MergeStrategy::AppendConstructs
        }
        ChangeType::AddStatement => MergeStrategy::AppendStatements,
        ChangeType::ModifyFunction
        | ChangeType::WrapFunction
        | ChangeType::ModifyClass
        | ChangeType::ModifyVariable
        | ChangeType::RemoveFunction
        | ChangeType::RemoveClass
        | ChangeType::RemoveVariable
        | ChangeType::FormattingOnly => MergeStrategy::ReplaceRegion,
        ChangeType::Unknown => MergeStrategy::LineMerge,
    }
}

/// How much damage a clash involving this kind of change can do
fn clash_weight(change_type: ChangeType) -> ConflictSeverity {
    match change_type {
        ChangeType::ModifyFunction
        | ChangeType::WrapFunction
        | ChangeType::ModifyClass
        | ChangeType::RemoveFunction
        | ChangeType::RemoveClass
        | ChangeType::AddFunction
        | ChangeType::AddClass => ConflictSeverity::High,
        ChangeType::AddVariable
        | ChangeType::ModifyVariable
        | ChangeType::RemoveVariable
        | ChangeType::AddImport
        | ChangeType::RemoveImport
        | ChangeType::AddStatement
        | ChangeType::Unknown => ConflictSeverity::Medium,
        ChangeType::FormattingOnly => ConflictSeverity::Low,
    }
}

fn same_wrapped_span(a: &SemanticChange, b: &SemanticChange) -> bool {
    match (&a.wrap, &b.wrap) {
        (Some(wa), Some(wb)) => {
            wa.span_start == wb.span_start
                && wa.span_end == wb.span_end
                && a.content_before == b.content_before
        }
        _ => false,
    }
}

/// Decide whether two changes from different participants can both be kept
pub fn check(a: &SemanticChange, b: &SemanticChange) -> Compatibility {
    if a.is_equivalent(b) {
        return Compatibility::Compatible(MergeStrategy::KeepOne);
    }

    let (ta, tb) = (a.change_type, b.change_type);

    match (ta.category(), tb.category()) {
        (ChangeCategory::Unknown, _) | (_, ChangeCategory::Unknown) => {
            Compatibility::Compatible(MergeStrategy::LineMerge)
        }

        (ChangeCategory::Import, ChangeCategory::Import) => {
            let opposed = a.target_name == b.target_name && ta != tb;
            if opposed {
                Compatibility::clash(
                    ConflictSeverity::Medium,
                    format!("one task adds '{}' while another removes it", a.target_name),
                )
            } else {
                Compatibility::Compatible(MergeStrategy::CombineImports)
            }
        }

        (ChangeCategory::Statement, ChangeCategory::Statement) => {
            Compatibility::Compatible(MergeStrategy::AppendStatements)
        }

        // Imports and loose statements share the file anchors with everything else
        (ChangeCategory::Import, _)
        | (_, ChangeCategory::Import)
        | (ChangeCategory::Statement, _)
        | (_, ChangeCategory::Statement) => Compatibility::Compatible(MergeStrategy::Independent),

        (ChangeCategory::Formatting, ChangeCategory::Formatting) => Compatibility::clash(
            ConflictSeverity::Low,
            format!("both tasks reformat '{}' differently", a.target_name),
        ),

        (ChangeCategory::Formatting, _) | (_, ChangeCategory::Formatting) => {
            Compatibility::Compatible(MergeStrategy::PreferStructural)
        }

        (ChangeCategory::Function, ChangeCategory::Function)
        | (ChangeCategory::Class, ChangeCategory::Class)
        | (ChangeCategory::Variable, ChangeCategory::Variable) => same_construct(a, b),

        // Different construct kinds that share a name
        (ChangeCategory::Function, _)
        | (ChangeCategory::Class, _)
        | (ChangeCategory::Variable, _) => {
            let (first, second) = if a.location <= b.location {
                (&a.location, &b.location)
            } else {
                (&b.location, &a.location)
            };
            Compatibility::clash(
                ConflictSeverity::Medium,
                format!(
                    "'{}' and '{}' refer to different constructs with the same name",
                    first, second
                ),
            )
        }
    }
}

/// Two edits of the same function, class or variable
fn same_construct(a: &SemanticChange, b: &SemanticChange) -> Compatibility {
    let (ta, tb) = (a.change_type, b.change_type);
    let name = &a.target_name;

    if ta == ChangeType::WrapFunction && tb == ChangeType::WrapFunction {
        if same_wrapped_span(a, b) {
            return Compatibility::Compatible(MergeStrategy::WrapOutsideIn);
        }
        return Compatibility::clash(
            ConflictSeverity::Medium,
            format!("both tasks wrap different parts of '{}'", name),
        );
    }

    let severity = clash_weight(ta).max(clash_weight(tb));
    let reason = match (ta.is_addition(), tb.is_addition(), ta.is_removal(), tb.is_removal()) {
        (true, true, _, _) => format!("both tasks add '{}' with different content", name),
        (_, _, true, _) | (_, _, _, true) => {
            format!("one task removes '{}' while another changes it", name)
        }
        _ => format!("both tasks rewrite '{}' with different logic", name),
    };
    Compatibility::clash(severity, reason)
}

/// Rank used to report one strategy for a group of pairwise verdicts
pub fn strategy_rank(strategy: MergeStrategy) -> u8 {
    match strategy {
        MergeStrategy::HumanRequired => 12,
        MergeStrategy::AiRequired => 11,
        MergeStrategy::LineMerge => 10,
        MergeStrategy::WrapOutsideIn => 9,
        MergeStrategy::PreferStructural => 8,
        MergeStrategy::CombineImports => 7,
        MergeStrategy::AppendStatements => 6,
        MergeStrategy::AppendConstructs => 5,
        MergeStrategy::ReplaceRegion => 4,
        MergeStrategy::KeepOne => 3,
        MergeStrategy::Independent => 2,
        MergeStrategy::DirectCopy => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::types::{WrapSpan, LOCATION_FILE_TOP};

    fn import(change_type: ChangeType, name: &str) -> SemanticChange {
        SemanticChange::new(change_type, name, LOCATION_FILE_TOP, 1, 1).with_after(name)
    }

    fn func(change_type: ChangeType, name: &str, body: &str) -> SemanticChange {
        SemanticChange::new(change_type, name, format!("function:{}", name), 1, 3)
            .with_before(format!("def {}():\n    pass", name))
            .with_after(body)
    }

    fn assert_symmetric(a: &SemanticChange, b: &SemanticChange) -> Compatibility {
        let ab = check(a, b);
        assert_eq!(ab, check(b, a));
        ab
    }

    #[test]
    fn test_distinct_imports_combine() {
        let verdict = assert_symmetric(
            &import(ChangeType::AddImport, "import logging"),
            &import(ChangeType::AddImport, "import json"),
        );
        assert_eq!(verdict, Compatibility::Compatible(MergeStrategy::CombineImports));
    }

    #[test]
    fn test_identical_changes_keep_one() {
        let a = func(ChangeType::AddFunction, "helper", "def helper():\n    return 1");
        let verdict = assert_symmetric(&a, &a.clone());
        assert_eq!(verdict, Compatibility::Compatible(MergeStrategy::KeepOne));
    }

    #[test]
    fn test_add_and_remove_same_import_is_medium() {
        let verdict = assert_symmetric(
            &import(ChangeType::AddImport, "import os"),
            &import(ChangeType::RemoveImport, "import os"),
        );
        assert!(matches!(
            verdict,
            Compatibility::Incompatible {
                severity: ConflictSeverity::Medium,
                ..
            }
        ));
    }

    #[test]
    fn test_both_modify_function_is_high() {
        let verdict = assert_symmetric(
            &func(ChangeType::ModifyFunction, "run", "def run():\n    return 1"),
            &func(ChangeType::ModifyFunction, "run", "def run():\n    return 2"),
        );
        match verdict {
            Compatibility::Incompatible { severity, reason } => {
                assert_eq!(severity, ConflictSeverity::High);
                assert!(reason.contains("rewrite"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_formatting_yields_to_structure() {
        let verdict = assert_symmetric(
            &func(ChangeType::FormattingOnly, "run", "def run():\n        pass"),
            &func(ChangeType::ModifyFunction, "run", "def run():\n    return 2"),
        );
        assert_eq!(verdict, Compatibility::Compatible(MergeStrategy::PreferStructural));

        let verdict = assert_symmetric(
            &func(ChangeType::FormattingOnly, "run", "def run():\n        pass"),
            &func(ChangeType::FormattingOnly, "run", "def run():\n  pass"),
        );
        assert!(matches!(
            verdict,
            Compatibility::Incompatible {
                severity: ConflictSeverity::Low,
                ..
            }
        ));
    }

    #[test]
    fn test_wraps_of_same_span_nest() {
        let wrap = |prefix: &str| WrapSpan {
            span_start: 1,
            span_end: 2,
            prefix: vec![prefix.to_string()],
            suffix: vec!["    finally: pass".to_string()],
            indent: "    ".to_string(),
        };
        let a = func(ChangeType::WrapFunction, "run", "a").with_wrap(wrap("    try:"));
        let b = func(ChangeType::WrapFunction, "run", "b").with_wrap(wrap("    with lock:"));
        assert_eq!(
            assert_symmetric(&a, &b),
            Compatibility::Compatible(MergeStrategy::WrapOutsideIn)
        );
    }

    #[test]
    fn test_statements_and_imports_are_independent() {
        let stmt = SemanticChange::new(ChangeType::AddStatement, "setup()", LOCATION_FILE_TOP, 3, 3)
            .with_after("setup()");
        assert_eq!(
            assert_symmetric(&stmt, &import(ChangeType::AddImport, "import os")),
            Compatibility::Compatible(MergeStrategy::Independent)
        );
    }

    #[test]
    fn test_natural_strategy() {
        assert_eq!(
            natural_strategy(ChangeType::AddFunction),
            MergeStrategy::AppendConstructs
        );
        assert_eq!(
            natural_strategy(ChangeType::ModifyClass),
            MergeStrategy::ReplaceRegion
        );
        assert_eq!(natural_strategy(ChangeType::Unknown), MergeStrategy::LineMerge);
    }
}
