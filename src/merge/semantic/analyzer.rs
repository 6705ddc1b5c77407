//! Semantic diff
//!
//! Compares the parsed structure of a baseline and a modified version of one
//! file and emits located `SemanticChange`s. Anything the structure cannot
//! explain (unsupported language, unbalanced code, edited loose top-level
//! code) turns the whole file into a single `unknown` change so the caller
//! can use a line merge instead.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::merge::semantic::language::Language;
use crate::merge::semantic::structure::{
    normalize_whitespace, ConstructKind, FileStructure, Unit, UnitKind,
};
use crate::merge::types::{
    ChangeType, SemanticChange, WrapSpan, LOCATION_FILE, LOCATION_FILE_BOTTOM, LOCATION_FILE_TOP,
};

const STATEMENT_NAME_LIMIT: usize = 60;

/// Analyzer output for one (baseline, modified) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    pub changes: Vec<SemanticChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl FileAnalysis {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Stateless structural differ
pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    /// Diff `before` against `after` (both LF-normalized)
    pub fn analyze(file_path: &str, before: &str, after: &str) -> FileAnalysis {
        let language = Language::from_path(file_path);

        if before == after {
            return FileAnalysis {
                file_path: file_path.to_string(),
                language,
                changes: Vec::new(),
                fallback_reason: None,
            };
        }

        let Some(lang) = language else {
            return Self::fallback(file_path, None, before, after, "unsupported file type");
        };

        match Self::structural_diff(before, after, lang) {
            Ok(changes) => {
                log::debug!(
                    "[SemanticAnalyzer] {}: {} change(s)",
                    file_path,
                    changes.len()
                );
                FileAnalysis {
                    file_path: file_path.to_string(),
                    language,
                    changes,
                    fallback_reason: None,
                }
            }
            Err(reason) => {
                log::warn!(
                    "[SemanticAnalyzer] {}: falling back to whole-file treatment ({})",
                    file_path,
                    reason
                );
                Self::fallback(file_path, language, before, after, &reason)
            }
        }
    }

    fn fallback(
        file_path: &str,
        language: Option<Language>,
        before: &str,
        after: &str,
        reason: &str,
    ) -> FileAnalysis {
        let change = SemanticChange::new(
            ChangeType::Unknown,
            file_path,
            LOCATION_FILE,
            1,
            after.lines().count().max(1),
        )
        .with_before(before)
        .with_after(after);

        FileAnalysis {
            file_path: file_path.to_string(),
            language,
            changes: vec![change],
            fallback_reason: Some(reason.to_string()),
        }
    }

    fn structural_diff(
        before: &str,
        after: &str,
        language: Language,
    ) -> Result<Vec<SemanticChange>, String> {
        let base = FileStructure::parse(before, language)
            .map_err(|e| format!("baseline does not parse: {}", e))?;
        let modified = FileStructure::parse(after, language)
            .map_err(|e| format!("modified version does not parse: {}", e))?;

        let mut changes = Vec::new();
        diff_imports(&base, &modified, &mut changes);
        diff_constructs(&base, &modified, &mut changes);
        diff_loose(&base, &modified, &mut changes)?;

        changes.sort_by_key(|c| c.line_start);
        Ok(changes)
    }
}

fn span_of(unit: &Unit) -> (usize, usize) {
    (unit.start + 1, unit.end)
}

fn diff_imports(base: &FileStructure, modified: &FileStructure, out: &mut Vec<SemanticChange>) {
    let base_keys: HashSet<&str> = base.imports().filter_map(|u| u.import_key()).collect();
    let modified_keys: HashSet<&str> = modified.imports().filter_map(|u| u.import_key()).collect();

    let mut seen = HashSet::new();
    for unit in modified.imports() {
        let Some(key) = unit.import_key() else { continue };
        if base_keys.contains(key) || !seen.insert(key) {
            continue;
        }
        let (start, end) = span_of(unit);
        out.push(
            SemanticChange::new(ChangeType::AddImport, key, LOCATION_FILE_TOP, start, end)
                .with_after(modified.text(unit)),
        );
    }

    for unit in base.imports() {
        let Some(key) = unit.import_key() else { continue };
        if modified_keys.contains(key) {
            continue;
        }
        let (start, end) = span_of(unit);
        out.push(
            SemanticChange::new(ChangeType::RemoveImport, key, LOCATION_FILE_TOP, start, end)
                .with_before(base.text(unit)),
        );
    }
}

fn construct_types(kind: ConstructKind) -> (ChangeType, ChangeType, ChangeType) {
    match kind {
        ConstructKind::Function => (
            ChangeType::AddFunction,
            ChangeType::ModifyFunction,
            ChangeType::RemoveFunction,
        ),
        ConstructKind::Class => (
            ChangeType::AddClass,
            ChangeType::ModifyClass,
            ChangeType::RemoveClass,
        ),
        ConstructKind::Variable => (
            ChangeType::AddVariable,
            ChangeType::ModifyVariable,
            ChangeType::RemoveVariable,
        ),
    }
}

fn construct_parts(unit: &Unit) -> Option<(ConstructKind, &str, String)> {
    match &unit.kind {
        UnitKind::Construct { kind, name } => {
            Some((*kind, name.as_str(), unit.location()?))
        }
        _ => None,
    }
}

fn diff_constructs(base: &FileStructure, modified: &FileStructure, out: &mut Vec<SemanticChange>) {
    let base_by_location: HashMap<String, &Unit> = base
        .constructs()
        .filter_map(|u| u.location().map(|loc| (loc, u)))
        .collect();
    let modified_locations: HashSet<String> =
        modified.constructs().filter_map(|u| u.location()).collect();

    for unit in modified.constructs() {
        let Some((kind, name, location)) = construct_parts(unit) else {
            continue;
        };
        let (add, modify, _) = construct_types(kind);
        let after_text = modified.text(unit);
        let (start, end) = span_of(unit);

        let Some(base_unit) = base_by_location.get(&location) else {
            out.push(SemanticChange::new(add, name, location, start, end).with_after(after_text));
            continue;
        };

        let before_text = base.text(base_unit);
        if before_text == after_text {
            continue;
        }

        let change_type = if normalize_whitespace(&before_text) == normalize_whitespace(&after_text)
        {
            ChangeType::FormattingOnly
        } else {
            modify
        };

        let mut change = SemanticChange::new(change_type, name, location, start, end)
            .with_before(before_text.clone())
            .with_after(after_text.clone());

        if change_type == ChangeType::ModifyFunction {
            if let Some(wrap) = detect_wrap(&before_text, &after_text) {
                change.change_type = ChangeType::WrapFunction;
                change = change.with_wrap(wrap);
            }
        }
        out.push(change);
    }

    for unit in base.constructs() {
        let Some((kind, name, location)) = construct_parts(unit) else {
            continue;
        };
        if modified_locations.contains(&location) {
            continue;
        }
        let (_, _, remove) = construct_types(kind);
        let (start, end) = span_of(unit);
        out.push(
            SemanticChange::new(remove, name, location, start, end).with_before(base.text(unit)),
        );
    }
}

/// Loose code may only gain new units; anything else is unstructured
fn diff_loose(
    base: &FileStructure,
    modified: &FileStructure,
    out: &mut Vec<SemanticChange>,
) -> Result<(), String> {
    let base_loose: Vec<String> = base.loose().map(|u| base.text(u)).collect();
    let first_construct = modified.first_construct_start();

    let mut matched = 0;
    let mut inserted = Vec::new();
    for unit in modified.loose() {
        let text = modified.text(unit);
        if matched < base_loose.len() && text == base_loose[matched] {
            matched += 1;
        } else {
            inserted.push((unit, text));
        }
    }

    if matched < base_loose.len() {
        return Err("top-level code outside any construct was edited or removed".to_string());
    }

    for (unit, text) in inserted {
        let location = match first_construct {
            Some(first) if unit.start < first => LOCATION_FILE_TOP,
            _ => LOCATION_FILE_BOTTOM,
        };
        let name: String = text
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .chars()
            .take(STATEMENT_NAME_LIMIT)
            .collect();
        let (start, end) = span_of(unit);
        out.push(
            SemanticChange::new(ChangeType::AddStatement, name, location, start, end)
                .with_after(text),
        );
    }
    Ok(())
}

/// Detect an edit that only adds lines around an untouched span.
///
/// The span keeps its text apart from a uniform extra indentation, and both
/// the inserted prefix and suffix are non-empty.
pub fn detect_wrap(before: &str, after: &str) -> Option<WrapSpan> {
    let b: Vec<&str> = before.lines().collect();
    let a: Vec<&str> = after.lines().collect();

    let mut head = 0;
    while head < b.len() && head < a.len() && b[head] == a[head] {
        head += 1;
    }
    let mut tail = 0;
    while tail < b.len() - head
        && tail < a.len() - head
        && b[b.len() - 1 - tail] == a[a.len() - 1 - tail]
    {
        tail += 1;
    }

    let span = &b[head..b.len() - tail];
    let middle = &a[head..a.len() - tail];
    if span.is_empty() || middle.len() < span.len() + 2 {
        return None;
    }

    for offset in 1..middle.len() - span.len() {
        if let Some(indent) = indent_match(span, &middle[offset..offset + span.len()]) {
            return Some(WrapSpan {
                span_start: head,
                span_end: head + span.len(),
                prefix: middle[..offset].iter().map(|l| l.to_string()).collect(),
                suffix: middle[offset + span.len()..]
                    .iter()
                    .map(|l| l.to_string())
                    .collect(),
                indent,
            });
        }
    }
    None
}

/// The shared extra indentation if `wrapped` is `original` shifted right
fn indent_match(original: &[&str], wrapped: &[&str]) -> Option<String> {
    let mut indent: Option<String> = None;
    for (orig, new) in original.iter().zip(wrapped) {
        if orig.trim().is_empty() {
            if !new.trim().is_empty() {
                return None;
            }
            continue;
        }
        let extra = new.strip_suffix(orig)?;
        if !extra.chars().all(|c| c == ' ' || c == '\t') {
            return None;
        }
        match &indent {
            Some(existing) if existing != extra => return None,
            Some(_) => {}
            None => indent = Some(extra.to_string()),
        }
    }
    indent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(analysis: &FileAnalysis) -> Vec<(ChangeType, String)> {
        analysis
            .changes
            .iter()
            .map(|c| (c.change_type, c.location.clone()))
            .collect()
    }

    #[test]
    fn test_import_added_at_file_top() {
        let before = "import os\n\n\ndef main():\n    pass\n";
        let after = "import os\nimport logging\n\n\ndef main():\n    pass\n";
        let analysis = SemanticAnalyzer::analyze("app.py", before, after);

        assert!(!analysis.is_fallback());
        assert_eq!(analysis.changes.len(), 1);
        let change = &analysis.changes[0];
        assert_eq!(change.change_type, ChangeType::AddImport);
        assert_eq!(change.location, LOCATION_FILE_TOP);
        assert_eq!(change.target_name, "import logging");
        assert_eq!(change.content_after.as_deref(), Some("import logging"));
    }

    #[test]
    fn test_function_added_modified_removed() {
        let before = "def a():\n    return 1\n\n\ndef b():\n    return 2\n";
        let after = "def a():\n    return 10\n\n\ndef c():\n    return 3\n";
        let analysis = SemanticAnalyzer::analyze("m.py", before, after);

        assert_eq!(
            types(&analysis),
            vec![
                (ChangeType::ModifyFunction, "function:a".to_string()),
                (ChangeType::AddFunction, "function:c".to_string()),
                (ChangeType::RemoveFunction, "function:b".to_string()),
            ]
        );
    }

    #[test]
    fn test_class_modification() {
        let before = "class A {\n  run() {}\n}\n";
        let after = "class A {\n  run() {}\n  stop() {}\n}\n";
        let analysis = SemanticAnalyzer::analyze("a.ts", before, after);
        assert_eq!(
            types(&analysis),
            vec![(ChangeType::ModifyClass, "class:A".to_string())]
        );
    }

    #[test]
    fn test_formatting_only() {
        let before = "fn run() { go(); }\n";
        let after = "fn run() {\n    go();\n}\n";
        let analysis = SemanticAnalyzer::analyze("lib.rs", before, after);
        assert_eq!(
            types(&analysis),
            vec![(ChangeType::FormattingOnly, "function:run".to_string())]
        );
    }

    #[test]
    fn test_wrap_detection() {
        let before = "def run():\n    x = load()\n    return x\n";
        let after = "def run():\n    try:\n        x = load()\n        return x\n    except OSError:\n        return None\n";
        let analysis = SemanticAnalyzer::analyze("w.py", before, after);

        let change = &analysis.changes[0];
        assert_eq!(change.change_type, ChangeType::WrapFunction);
        let wrap = change.wrap.as_ref().unwrap();
        assert_eq!((wrap.span_start, wrap.span_end), (1, 3));
        assert_eq!(wrap.prefix, vec!["    try:"]);
        assert_eq!(wrap.suffix, vec!["    except OSError:", "        return None"]);
        assert_eq!(wrap.indent, "    ");
    }

    #[test]
    fn test_insertion_only_on_one_side_is_not_a_wrap() {
        assert!(detect_wrap("a\nb\n", "a\nx\nb\n").is_none());
        assert!(detect_wrap("f {\n  a;\n}", "f {\n  log();\n  a;\n}").is_none());
    }

    #[test]
    fn test_loose_statements_are_anchored() {
        let before = "import os\n\ndef main():\n    pass\n";
        let after = "import os\n\nload_dotenv()\n\ndef main():\n    pass\n\nmain()\n";
        let analysis = SemanticAnalyzer::analyze("s.py", before, after);
        assert_eq!(
            types(&analysis),
            vec![
                (ChangeType::AddStatement, LOCATION_FILE_TOP.to_string()),
                (ChangeType::AddStatement, LOCATION_FILE_BOTTOM.to_string()),
            ]
        );
        assert_eq!(analysis.changes[0].target_name, "load_dotenv()");
    }

    #[test]
    fn test_edited_loose_code_falls_back() {
        let before = "print('a')\n";
        let after = "print('b')\n";
        let analysis = SemanticAnalyzer::analyze("s.py", before, after);
        assert!(analysis.is_fallback());
        assert_eq!(analysis.changes[0].change_type, ChangeType::Unknown);
        assert_eq!(analysis.changes[0].location, LOCATION_FILE);
    }

    #[test]
    fn test_unsupported_and_unparseable_fall_back() {
        let analysis = SemanticAnalyzer::analyze("notes.md", "a\n", "b\n");
        assert_eq!(analysis.fallback_reason.as_deref(), Some("unsupported file type"));

        let analysis = SemanticAnalyzer::analyze("x.rs", "fn a() {}\n", "fn a() {\n");
        assert!(analysis.is_fallback());
    }

    #[test]
    fn test_identical_content_has_no_changes() {
        let analysis = SemanticAnalyzer::analyze("x.rs", "fn a() {}\n", "fn a() {}\n");
        assert!(analysis.changes.is_empty());
        assert!(!analysis.is_fallback());
    }
}
