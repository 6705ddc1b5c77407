//! Auto-merger
//!
//! Combines the compatible groups of a file onto its baseline layout:
//! - import additions land after the last baseline import, removals drop lines
//! - region edits (modify, wrap, remove, reformat) replace the baseline construct
//! - added constructs land after the last baseline construct
//! - loose statements land before the first construct or at the end of the file
//!
//! Every insertion list is filled in participant order, never in processing
//! order, so combining A with B renders the same content as B with A.
//! Files the analyzer could not structure use a sequential three-way line
//! merge instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::merge::conflict_detector::{ConflictDetector, DetectionResult, GroupOutcome, LocationGroup};
use crate::merge::semantic::{FileStructure, Language, Unit, UnitKind};
use crate::merge::types::{
    participant_order, ChangeType, ConflictRegion, ConflictSeverity, MergeStrategy,
    SemanticChange, TaskSnapshot, WrapSpan, LOCATION_FILE, LOCATION_FILE_BOTTOM,
    LOCATION_FILE_TOP,
};

/// Pending edits against one baseline, rendered on demand
#[derive(Debug, Clone)]
pub struct FilePlan {
    structure: FileStructure,
    trailing_newline: bool,
    removed_imports: HashSet<String>,
    added_imports: Vec<(String, String)>,
    import_override: Option<String>,
    replacements: HashMap<String, Option<String>>,
    added_constructs: Vec<(String, String)>,
    top_statements: Vec<(String, String)>,
    bottom_statements: Vec<(String, String)>,
}

impl FilePlan {
    /// Apply every compatible group of `detection` to `baseline`
    pub fn build(
        baseline: &str,
        language: Language,
        detection: &DetectionResult,
    ) -> Result<Self, String> {
        let structure = FileStructure::parse(baseline, language)?;
        let mut plan = Self {
            structure,
            trailing_newline: baseline.is_empty() || baseline.ends_with('\n'),
            removed_imports: HashSet::new(),
            added_imports: Vec::new(),
            import_override: None,
            replacements: HashMap::new(),
            added_constructs: Vec::new(),
            top_statements: Vec::new(),
            bottom_statements: Vec::new(),
        };

        for group in &detection.groups {
            if let GroupOutcome::Compatible(_) = group.outcome {
                plan.apply_group(group)?;
            }
        }
        Ok(plan)
    }

    fn apply_group(&mut self, group: &LocationGroup) -> Result<(), String> {
        let baseline_imports: HashSet<String> = self
            .structure
            .imports()
            .filter_map(|u| u.import_key().map(|k| k.to_string()))
            .collect();
        let mut regions: BTreeMap<String, Vec<&SemanticChange>> = BTreeMap::new();

        for entry in &group.changes {
            let change = &entry.change;
            let text = change.content_after.clone().unwrap_or_default();
            match change.change_type {
                ChangeType::AddImport => {
                    let known = baseline_imports.contains(&change.target_name)
                        || self.added_imports.iter().any(|(k, _)| k == &change.target_name);
                    if !known {
                        self.added_imports.push((change.target_name.clone(), text));
                    }
                }
                ChangeType::RemoveImport => {
                    self.removed_imports.insert(change.target_name.clone());
                }
                ChangeType::AddFunction | ChangeType::AddClass | ChangeType::AddVariable => {
                    if !self.added_constructs.iter().any(|(loc, _)| loc == &change.location) {
                        self.added_constructs.push((change.location.clone(), text));
                    }
                }
                ChangeType::AddStatement => {
                    let list = if change.location == LOCATION_FILE_TOP {
                        &mut self.top_statements
                    } else {
                        &mut self.bottom_statements
                    };
                    // Identical statements from different participants are kept once
                    let duplicate = list
                        .iter()
                        .any(|(task, existing)| task != &entry.task_id && existing == &text);
                    if !duplicate {
                        list.push((entry.task_id.clone(), text));
                    }
                }
                ChangeType::ModifyFunction
                | ChangeType::WrapFunction
                | ChangeType::ModifyClass
                | ChangeType::ModifyVariable
                | ChangeType::RemoveFunction
                | ChangeType::RemoveClass
                | ChangeType::RemoveVariable
                | ChangeType::FormattingOnly => {
                    regions
                        .entry(change.location.clone())
                        .or_default()
                        .push(change);
                }
                ChangeType::Unknown => {
                    return Err(format!(
                        "unstructured change at '{}' cannot be placed on the baseline",
                        change.location
                    ));
                }
            }
        }

        for (location, changes) in regions {
            let replacement = resolve_region(&location, &changes)?;
            self.replacements.insert(location, replacement);
        }
        Ok(())
    }

    /// Use externally resolved content for a conflict location
    pub fn apply_resolution(&mut self, location: &str, content: &str) -> Result<(), String> {
        let content = content.trim_end_matches('\n').to_string();
        if location == LOCATION_FILE {
            return Err("whole-file resolutions bypass the file plan".to_string());
        }
        if location == LOCATION_FILE_TOP {
            self.import_override = Some(content);
        } else if location == LOCATION_FILE_BOTTOM {
            self.bottom_statements.push((String::new(), content));
        } else if self.structure.construct_at(location).is_some() {
            self.replacements.insert(location.to_string(), Some(content));
        } else if let Some(slot) = self
            .added_constructs
            .iter_mut()
            .find(|(loc, _)| loc == location)
        {
            slot.1 = content;
        } else {
            self.added_constructs.push((location.to_string(), content));
        }
        Ok(())
    }

    /// Baseline text of a location, empty when the baseline does not have it
    pub fn baseline_region(&self, location: &str) -> String {
        if location == LOCATION_FILE_TOP {
            return self
                .structure
                .imports()
                .map(|u| self.structure.text(u))
                .collect::<Vec<_>>()
                .join("\n");
        }
        self.structure
            .construct_at(location)
            .map(|u| self.structure.text(u))
            .unwrap_or_default()
    }

    fn import_anchor(&self) -> usize {
        if let Some(end) = self.structure.imports_end() {
            return end;
        }
        // Keep shebangs, module docs and leading comments above new imports
        let mut anchor = 0;
        for unit in &self.structure.units {
            let first = self.structure.lines[unit.start].trim_start();
            let preamble = unit.kind == UnitKind::Loose
                && ["#!", "//", "/*", "*", "#", "\"\"\"", "'''", "\"use ", "'use "]
                    .iter()
                    .any(|p| first.starts_with(p));
            if !preamble {
                break;
            }
            anchor = unit.end;
        }
        anchor
    }

    /// Blank lines the baseline puts between top-level constructs
    fn construct_gap(&self) -> usize {
        let constructs: Vec<&Unit> = self.structure.constructs().collect();
        if let [first, second, ..] = constructs.as_slice() {
            return second.start.saturating_sub(first.end).clamp(1, 2);
        }
        match self.structure.language {
            Language::Python => 2,
            _ => 1,
        }
    }

    /// Render the combined file (LF line endings)
    pub fn render(&self) -> String {
        let lines = &self.structure.lines;
        let n = lines.len();
        let import_anchor = self.import_anchor();
        let top_anchor = self
            .structure
            .first_construct_start()
            .unwrap_or(n)
            .max(import_anchor);
        let construct_anchor = self
            .structure
            .last_construct_end()
            .unwrap_or(n)
            .max(top_anchor);
        let gap = self.construct_gap();

        let unit_at: HashMap<usize, &Unit> =
            self.structure.units.iter().map(|u| (u.start, u)).collect();

        let mut out = Output::default();
        let mut i = 0;
        loop {
            if i == import_anchor {
                match &self.import_override {
                    Some(text) => out.push_lines(text),
                    None => {
                        for (_, text) in &self.added_imports {
                            out.push_lines(text);
                        }
                    }
                }
                if import_anchor < n && (self.import_override.is_some() || !self.added_imports.is_empty()) {
                    out.pending_gap = out.pending_gap.max(1);
                }
            }
            if i == top_anchor {
                for (_, text) in &self.top_statements {
                    out.push_block(text, 1);
                }
            }
            if i == construct_anchor {
                for (_, text) in &self.added_constructs {
                    out.push_block(text, gap);
                }
            }
            if i >= n {
                break;
            }

            let Some(unit) = unit_at.get(&i) else {
                out.push_line(&lines[i]);
                i += 1;
                continue;
            };

            match &unit.kind {
                UnitKind::Import { key } => {
                    let dropped = self.import_override.is_some() || self.removed_imports.contains(key);
                    if !dropped {
                        out.push_lines(&self.structure.text(unit));
                    }
                }
                UnitKind::Construct { .. } => {
                    let location = unit.location().unwrap_or_default();
                    match self.replacements.get(&location) {
                        Some(Some(text)) => out.push_lines(text),
                        Some(None) => out.skip_next_blank = true,
                        None => out.push_lines(&self.structure.text(unit)),
                    }
                }
                UnitKind::Loose => out.push_lines(&self.structure.text(unit)),
            }
            i = unit.end;
        }

        for (_, text) in &self.bottom_statements {
            out.push_block(text, 1);
        }

        out.finish(self.trailing_newline)
    }
}

/// Line accumulator that keeps inserted blocks separated by blank lines
#[derive(Default)]
struct Output {
    lines: Vec<String>,
    pending_gap: usize,
    skip_next_blank: bool,
}

impl Output {
    fn trailing_blanks(&self) -> usize {
        self.lines.iter().rev().take_while(|l| l.trim().is_empty()).count()
    }

    fn pad(&mut self, gap: usize) {
        if self.lines.is_empty() {
            return;
        }
        for _ in self.trailing_blanks()..gap {
            self.lines.push(String::new());
        }
    }

    fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            if self.skip_next_blank && self.trailing_blanks() > 0 {
                self.skip_next_blank = false;
                return;
            }
        } else {
            let gap = std::mem::take(&mut self.pending_gap);
            self.pad(gap);
            self.skip_next_blank = false;
        }
        self.lines.push(line.to_string());
    }

    fn push_lines(&mut self, text: &str) {
        for line in text.lines() {
            self.push_line(line);
        }
    }

    fn push_block(&mut self, text: &str, gap: usize) {
        self.pending_gap = 0;
        self.pad(gap);
        for line in text.lines() {
            self.lines.push(line.to_string());
        }
        self.pending_gap = gap;
    }

    fn finish(mut self, trailing_newline: bool) -> String {
        while self.lines.last().map_or(false, |l| l.trim().is_empty()) && self.pending_gap > 0 {
            self.lines.pop();
        }
        let mut content = self.lines.join("\n");
        if trailing_newline && !content.is_empty() {
            content.push('\n');
        }
        content
    }
}

/// Final text for a baseline construct touched by several compatible edits.
/// `None` removes the construct.
fn resolve_region(location: &str, changes: &[&SemanticChange]) -> Result<Option<String>, String> {
    let mut distinct: Vec<&SemanticChange> = Vec::new();
    for &change in changes {
        if !distinct.iter().any(|c| c.is_equivalent(change)) {
            distinct.push(change);
        }
    }

    let structural: Vec<&SemanticChange> = distinct
        .iter()
        .copied()
        .filter(|c| c.change_type != ChangeType::FormattingOnly)
        .collect();
    let effective = if structural.is_empty() { distinct } else { structural };

    if let [only] = effective.as_slice() {
        return Ok(if only.change_type.is_removal() {
            None
        } else {
            only.content_after.clone()
        });
    }

    let wraps: Vec<&WrapSpan> = effective.iter().filter_map(|c| c.wrap.as_ref()).collect();
    if wraps.len() == effective.len() && effective.iter().all(|c| c.change_type == ChangeType::WrapFunction) {
        let base = effective[0].content_before.clone().unwrap_or_default();
        return Ok(Some(nest_wraps(&base, &wraps)));
    }

    Err(format!("{} incompatible edits at '{}'", effective.len(), location))
}

/// Apply wraps outside-in: the first wrap ends up outermost
pub fn nest_wraps(base: &str, wraps: &[&WrapSpan]) -> String {
    let lines: Vec<&str> = base.lines().collect();
    let Some(first) = wraps.first() else {
        return base.to_string();
    };
    let (start, end) = (first.span_start.min(lines.len()), first.span_end.min(lines.len()));

    let mut inner: Vec<String> = lines[start..end].iter().map(|l| l.to_string()).collect();
    for wrap in wraps.iter().rev() {
        let mut wrapped = wrap.prefix.clone();
        wrapped.extend(inner.iter().map(|l| indent_line(l, &wrap.indent)));
        wrapped.extend(wrap.suffix.iter().cloned());
        inner = wrapped;
    }

    let mut result: Vec<String> = lines[..start].iter().map(|l| l.to_string()).collect();
    result.extend(inner);
    result.extend(lines[end..].iter().map(|l| l.to_string()));
    result.join("\n")
}

fn indent_line(line: &str, indent: &str) -> String {
    if line.trim().is_empty() {
        line.to_string()
    } else {
        format!("{}{}", indent, line)
    }
}

/// Result of combining every participant's edits to one file
#[derive(Debug, Clone)]
pub struct AutoMergeOutcome {
    pub strategy: MergeStrategy,
    /// Present when nothing remains unresolved
    pub content: Option<String>,
    pub conflicts: Vec<ConflictRegion>,
    pub auto_resolved: usize,
    /// Present on the structured path; conflict resolutions are applied to it
    pub plan: Option<FilePlan>,
}

pub struct AutoMerger;

impl AutoMerger {
    /// Combine all participants' edits of `file_path` onto `baseline`
    pub fn merge_file(file_path: &str, baseline: &str, snapshots: &[TaskSnapshot]) -> AutoMergeOutcome {
        let mut ordered: Vec<TaskSnapshot> = snapshots.to_vec();
        ordered.sort_by(participant_order);

        let language = Language::from_path(file_path);
        let structured = language.filter(|_| ordered.iter().all(|s| !s.is_fallback()));

        if let Some(language) = structured {
            let detection = ConflictDetector::detect(file_path, &ordered);
            match FilePlan::build(baseline, language, &detection) {
                Ok(plan) => {
                    let conflicts = detection.conflicts();
                    let content = conflicts.is_empty().then(|| plan.render());
                    return AutoMergeOutcome {
                        strategy: detection.overall_strategy(),
                        content,
                        conflicts,
                        auto_resolved: detection.auto_resolved_count(),
                        plan: Some(plan),
                    };
                }
                Err(e) => {
                    log::warn!(
                        "[AutoMerger] {}: structured merge unavailable ({}), using line merge",
                        file_path,
                        e
                    );
                }
            }
        }

        match line_merge(file_path, baseline, &ordered) {
            Ok(content) => AutoMergeOutcome {
                strategy: MergeStrategy::LineMerge,
                content: Some(content),
                conflicts: Vec::new(),
                auto_resolved: usize::from(ordered.len() > 1),
                plan: None,
            },
            Err(region) => AutoMergeOutcome {
                strategy: MergeStrategy::LineMerge,
                content: None,
                conflicts: vec![region],
                auto_resolved: 0,
                plan: None,
            },
        }
    }

    /// Combine participants whose changes do not conflict.
    ///
    /// Returns the remaining conflicts when any group is incompatible.
    pub fn combine_non_conflicting_changes(
        file_path: &str,
        baseline: &str,
        snapshots: &[TaskSnapshot],
    ) -> Result<String, Vec<ConflictRegion>> {
        let outcome = Self::merge_file(file_path, baseline, snapshots);
        outcome.content.ok_or(outcome.conflicts)
    }
}

/// Sequential three-way line merge of every participant onto the baseline
pub fn line_merge(
    file_path: &str,
    baseline: &str,
    participants: &[TaskSnapshot],
) -> Result<String, ConflictRegion> {
    let mut merged = baseline.to_string();

    for participant in participants {
        let theirs = participant.content_after.as_str();
        if theirs == baseline || theirs == merged {
            continue;
        }
        if merged == baseline {
            merged = theirs.to_string();
            continue;
        }
        match diffy::merge(baseline, &merged, theirs) {
            Ok(result) => merged = result,
            Err(_) => {
                log::debug!(
                    "[AutoMerger] {}: line merge conflict at participant {}",
                    file_path,
                    participant.task_id
                );
                let reasons: Vec<&str> = participants
                    .iter()
                    .filter_map(|p| p.fallback_reason.as_deref())
                    .collect();
                let reason = if reasons.is_empty() {
                    "overlapping line edits could not be merged".to_string()
                } else {
                    format!(
                        "overlapping line edits could not be merged ({})",
                        reasons.join("; ")
                    )
                };
                return Err(ConflictRegion {
                    file_path: file_path.to_string(),
                    location: LOCATION_FILE.to_string(),
                    tasks_involved: participants.iter().map(|p| p.task_id.clone()).collect(),
                    change_types: vec![ChangeType::Unknown],
                    severity: ConflictSeverity::Medium,
                    reason,
                    merge_strategy: Some(MergeStrategy::AiRequired),
                });
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::semantic::SemanticAnalyzer;
    use crate::merge::types::TaskIntent;
    use chrono::{TimeZone, Utc};

    fn snapshot(task_id: &str, started: i64, path: &str, baseline: &str, after: &str) -> TaskSnapshot {
        let analysis = SemanticAnalyzer::analyze(path, baseline, after);
        TaskSnapshot {
            task_id: task_id.to_string(),
            task_intent: TaskIntent::default(),
            started_at: Utc.timestamp_opt(started, 0).unwrap(),
            semantic_changes: analysis.changes,
            content_after: after.to_string(),
            fallback_reason: analysis.fallback_reason,
        }
    }

    const BASE: &str = "import os\n\n\ndef main():\n    print(os.getcwd())\n";

    #[test]
    fn test_two_import_additions_each_appear_once() {
        let a = snapshot(
            "task-a",
            1,
            "app.py",
            BASE,
            "import os\nimport logging\n\n\ndef main():\n    print(os.getcwd())\n",
        );
        let b = snapshot(
            "task-b",
            2,
            "app.py",
            BASE,
            "import os\nimport json\n\n\ndef main():\n    print(os.getcwd())\n",
        );

        let ab = AutoMerger::combine_non_conflicting_changes("app.py", BASE, &[a.clone(), b.clone()])
            .unwrap();
        let ba = AutoMerger::combine_non_conflicting_changes("app.py", BASE, &[b, a]).unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab.matches("import logging").count(), 1);
        assert_eq!(ab.matches("import json").count(), 1);
        assert_eq!(ab.matches("import os").count(), 1);
        assert_eq!(
            ab,
            "import os\nimport logging\nimport json\n\n\ndef main():\n    print(os.getcwd())\n"
        );
    }

    #[test]
    fn test_same_import_added_by_both_is_kept_once() {
        let after = "import os\nimport sys\n\n\ndef main():\n    print(os.getcwd())\n";
        let a = snapshot("a", 1, "app.py", BASE, after);
        let b = snapshot("b", 2, "app.py", BASE, after);
        let merged = AutoMerger::combine_non_conflicting_changes("app.py", BASE, &[a, b]).unwrap();
        assert_eq!(merged, after);
    }

    #[test]
    fn test_non_overlapping_edits_commute() {
        let base = "import os\n\n\ndef load():\n    return 1\n\n\ndef save():\n    return 2\n";
        let a = snapshot(
            "a",
            5,
            "m.py",
            base,
            "import os\n\n\ndef load():\n    return 10\n\n\ndef save():\n    return 2\n\n\ndef extra_a():\n    pass\n",
        );
        let b = snapshot(
            "b",
            3,
            "m.py",
            base,
            "import os\nimport re\n\n\ndef load():\n    return 1\n\n\ndef save():\n    return 20\n\n\ndef extra_b():\n    pass\n",
        );

        let ab = AutoMerger::combine_non_conflicting_changes("m.py", base, &[a.clone(), b.clone()])
            .unwrap();
        let ba = AutoMerger::combine_non_conflicting_changes("m.py", base, &[b, a]).unwrap();
        assert_eq!(ab, ba);
        assert!(ab.contains("return 10"));
        assert!(ab.contains("return 20"));
        assert!(ab.contains("import re"));
        // b started first, so its addition comes first
        let pos_b = ab.find("def extra_b").unwrap();
        let pos_a = ab.find("def extra_a").unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn test_conflicting_rewrites_are_not_merged() {
        let base = "def process(x):\n    return x\n";
        let a = snapshot("a", 1, "p.py", base, "def process(x):\n    return x + 1\n");
        let b = snapshot("b", 2, "p.py", base, "def process(x):\n    return x * 2\n");

        let outcome = AutoMerger::merge_file("p.py", base, &[a, b]);
        assert!(outcome.content.is_none());
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].severity, ConflictSeverity::High);
        assert_eq!(outcome.conflicts[0].tasks_involved, vec!["a", "b"]);

        // A resolution for the region completes the plan
        let mut plan = outcome.plan.unwrap();
        assert_eq!(plan.baseline_region("function:process"), "def process(x):\n    return x");
        plan.apply_resolution("function:process", "def process(x):\n    return (x + 1) * 2\n")
            .unwrap();
        assert_eq!(plan.render(), "def process(x):\n    return (x + 1) * 2\n");
    }

    #[test]
    fn test_wraps_nest_with_earlier_task_outermost() {
        let base = "def run():\n    work()\n";
        let a = snapshot(
            "timing",
            1,
            "w.py",
            base,
            "def run():\n    start = now()\n    work()\n    report(start)\n",
        );
        let b = snapshot(
            "safety",
            2,
            "w.py",
            base,
            "def run():\n    try:\n        work()\n    except Exception:\n        log()\n",
        );
        assert_eq!(a.semantic_changes[0].change_type, ChangeType::WrapFunction);
        assert_eq!(b.semantic_changes[0].change_type, ChangeType::WrapFunction);

        let merged =
            AutoMerger::combine_non_conflicting_changes("w.py", base, &[b.clone(), a.clone()]).unwrap();
        assert_eq!(
            merged,
            "def run():\n    start = now()\n    try:\n        work()\n    except Exception:\n        log()\n    report(start)\n"
        );
    }

    #[test]
    fn test_formatting_yields_to_structural_edit() {
        let base = "function run() {\n  go();\n}\n";
        let fmt = snapshot("fmt", 1, "r.js", base, "function run() {\n    go();\n}\n");
        let logic = snapshot("logic", 2, "r.js", base, "function run() {\n  go();\n  stop();\n}\n");
        let merged = AutoMerger::combine_non_conflicting_changes("r.js", base, &[fmt, logic]).unwrap();
        assert_eq!(merged, "function run() {\n  go();\n  stop();\n}\n");
    }

    #[test]
    fn test_statements_and_removal() {
        let base = "import os\nimport sys\n\nfn_call = 1\n\ndef main():\n    pass\n";
        let a = snapshot("a", 1, "s.py", base, "import os\n\nfn_call = 1\n\ndef main():\n    pass\n");
        let b = snapshot(
            "b",
            2,
            "s.py",
            base,
            "import os\nimport sys\n\nfn_call = 1\n\ndef main():\n    pass\n\nmain()\n",
        );
        let merged = AutoMerger::combine_non_conflicting_changes("s.py", base, &[a, b]).unwrap();
        assert_eq!(merged, "import os\n\nfn_call = 1\n\ndef main():\n    pass\n\nmain()\n");
    }

    #[test]
    fn test_unsupported_file_uses_line_merge() {
        let base = "one\ntwo\nthree\nfour\nfive\n";
        let a = snapshot("a", 1, "notes.txt", base, "ONE\ntwo\nthree\nfour\nfive\n");
        let b = snapshot("b", 2, "notes.txt", base, "one\ntwo\nthree\nfour\nFIVE\n");
        let outcome = AutoMerger::merge_file("notes.txt", base, &[a, b]);
        assert_eq!(outcome.strategy, MergeStrategy::LineMerge);
        assert_eq!(outcome.content.as_deref(), Some("ONE\ntwo\nthree\nfour\nFIVE\n"));
    }

    #[test]
    fn test_line_merge_conflict_becomes_file_region() {
        let base = "value\n";
        let a = snapshot("a", 1, "v.txt", base, "left\n");
        let b = snapshot("b", 2, "v.txt", base, "right\n");
        let outcome = AutoMerger::merge_file("v.txt", base, &[a, b]);
        assert!(outcome.content.is_none());
        assert_eq!(outcome.conflicts[0].location, LOCATION_FILE);
        assert_eq!(outcome.conflicts[0].tasks_involved, vec!["a", "b"]);
    }
}
