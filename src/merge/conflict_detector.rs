//! Conflict detection
//!
//! Groups every participant's changes to one file by overlapping location,
//! then runs the compatibility rules over each cross-participant pair inside
//! a group. A group with any incompatible pair becomes a `ConflictRegion`;
//! the rest are handed to the auto-merger.

use std::collections::BTreeSet;

use crate::merge::compatibility::{self, Compatibility};
use crate::merge::types::{
    participant_order, ChangeType, ConflictRegion, ConflictSeverity, MergeStrategy,
    SemanticChange, TaskSnapshot, LOCATION_FILE,
};

/// One change tagged with the participant that made it
#[derive(Debug, Clone)]
pub struct LocatedChange {
    pub task_id: String,
    pub change: SemanticChange,
}

#[derive(Debug, Clone)]
pub enum GroupOutcome {
    Compatible(MergeStrategy),
    Conflict(ConflictRegion),
}

/// Changes whose locations overlap, in participant order
#[derive(Debug, Clone)]
pub struct LocationGroup {
    pub location: String,
    pub changes: Vec<LocatedChange>,
    pub outcome: GroupOutcome,
}

impl LocationGroup {
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for entry in &self.changes {
            if !ids.contains(&entry.task_id) {
                ids.push(entry.task_id.clone());
            }
        }
        ids
    }

    pub fn conflict(&self) -> Option<&ConflictRegion> {
        match &self.outcome {
            GroupOutcome::Conflict(region) => Some(region),
            GroupOutcome::Compatible(_) => None,
        }
    }

    pub fn strategy(&self) -> MergeStrategy {
        match &self.outcome {
            GroupOutcome::Compatible(strategy) => *strategy,
            GroupOutcome::Conflict(region) => {
                region.merge_strategy.unwrap_or(MergeStrategy::HumanRequired)
            }
        }
    }
}

/// All groups for one file
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub file_path: String,
    pub groups: Vec<LocationGroup>,
}

impl DetectionResult {
    pub fn conflicts(&self) -> Vec<ConflictRegion> {
        self.groups
            .iter()
            .filter_map(|g| g.conflict().cloned())
            .collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.groups.iter().any(|g| g.conflict().is_some())
    }

    /// Groups where several participants met and the rules settled it
    pub fn auto_resolved_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.conflict().is_none() && g.task_ids().len() > 1)
            .count()
    }

    /// Most significant strategy across groups, for summaries
    pub fn overall_strategy(&self) -> MergeStrategy {
        self.groups
            .iter()
            .map(|g| g.strategy())
            .max_by_key(|s| compatibility::strategy_rank(*s))
            .unwrap_or(MergeStrategy::DirectCopy)
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_boundary_prefix(prefix: &str, full: &str) -> bool {
    full.len() > prefix.len()
        && full.starts_with(prefix)
        && full[prefix.len()..]
            .chars()
            .next()
            .map_or(false, |c| !is_identifier_char(c))
}

fn construct_name(location: &str) -> Option<&str> {
    let (kind, name) = location.split_once(':')?;
    match kind {
        "function" | "class" | "variable" => Some(name),
        _ => None,
    }
}

pub struct ConflictDetector;

impl ConflictDetector {
    /// Exact match, boundary-aware prefix, or the same construct name.
    ///
    /// Renamed symbols are invisible to this check.
    pub fn locations_overlap(a: &str, b: &str) -> bool {
        if a == b || a == LOCATION_FILE || b == LOCATION_FILE {
            return true;
        }
        if is_boundary_prefix(a, b) || is_boundary_prefix(b, a) {
            return true;
        }
        match (construct_name(a), construct_name(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Group and classify every participant's changes to one file
    pub fn detect(file_path: &str, snapshots: &[TaskSnapshot]) -> DetectionResult {
        let mut ordered: Vec<&TaskSnapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| participant_order(a, b));

        let entries: Vec<LocatedChange> = ordered
            .iter()
            .flat_map(|s| {
                s.semantic_changes.iter().map(move |c| LocatedChange {
                    task_id: s.task_id.clone(),
                    change: c.clone(),
                })
            })
            .collect();

        let groups = group_by_overlap(&entries)
            .into_iter()
            .map(|members| classify_group(file_path, members, &entries))
            .collect::<Vec<_>>();

        let conflicts = groups.iter().filter(|g| g.conflict().is_some()).count();
        log::debug!(
            "[ConflictDetector] {}: {} group(s), {} conflict(s)",
            file_path,
            groups.len(),
            conflicts
        );

        DetectionResult {
            file_path: file_path.to_string(),
            groups,
        }
    }
}

/// Union-find over entry indices; groups come back ordered by first member
fn group_by_overlap(entries: &[LocatedChange]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..entries.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            if ConflictDetector::locations_overlap(&entries[i].change.location, &entries[j].change.location)
            {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = rj.min(ri);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut root_slot: Vec<Option<usize>> = vec![None; entries.len()];
    for i in 0..entries.len() {
        let root = find(&mut parent, i);
        match root_slot[root] {
            Some(slot) => groups[slot].push(i),
            None => {
                root_slot[root] = Some(groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

fn classify_group(file_path: &str, members: Vec<usize>, entries: &[LocatedChange]) -> LocationGroup {
    let changes: Vec<LocatedChange> = members.iter().map(|&i| entries[i].clone()).collect();
    let location = if changes.iter().any(|c| c.change.location == LOCATION_FILE) {
        LOCATION_FILE.to_string()
    } else {
        changes
            .first()
            .map(|c| c.change.location.clone())
            .unwrap_or_default()
    };

    let mut best = changes
        .iter()
        .map(|c| compatibility::natural_strategy(c.change.change_type))
        .max_by_key(|s| compatibility::strategy_rank(*s))
        .unwrap_or(MergeStrategy::DirectCopy);
    let mut severity: Option<ConflictSeverity> = None;
    let mut reasons: Vec<String> = Vec::new();

    for i in 0..changes.len() {
        for j in (i + 1)..changes.len() {
            if changes[i].task_id == changes[j].task_id {
                continue;
            }
            match compatibility::check(&changes[i].change, &changes[j].change) {
                Compatibility::Compatible(strategy) => {
                    if compatibility::strategy_rank(strategy) > compatibility::strategy_rank(best) {
                        best = strategy;
                    }
                }
                Compatibility::Incompatible {
                    severity: pair_severity,
                    reason,
                } => {
                    severity = Some(severity.map_or(pair_severity, |s| s.max(pair_severity)));
                    if !reasons.contains(&reason) {
                        reasons.push(reason);
                    }
                }
            }
        }
    }

    let mut group = LocationGroup {
        location,
        changes,
        outcome: GroupOutcome::Compatible(best),
    };

    if let Some(severity) = severity {
        let change_types: Vec<ChangeType> = group
            .changes
            .iter()
            .map(|c| c.change.change_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let merge_strategy = if severity >= ConflictSeverity::Medium {
            MergeStrategy::AiRequired
        } else {
            MergeStrategy::HumanRequired
        };
        log::debug!(
            "[ConflictDetector] {} @ {}: {} conflict ({})",
            file_path,
            group.location,
            severity,
            reasons.join("; ")
        );
        group.outcome = GroupOutcome::Conflict(ConflictRegion {
            file_path: file_path.to_string(),
            location: group.location.clone(),
            tasks_involved: group.task_ids(),
            change_types,
            severity,
            reason: reasons.join("; "),
            merge_strategy: Some(merge_strategy),
        });
    }

    group
}
