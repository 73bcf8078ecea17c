//! Conflict detection logic.
//!
//! Given the diffs from a common base to the source and to the target
//! document, the detector partitions every changed path into source-only
//! changes (safe to apply onto the target) and conflicts.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::diff::{diff, DiffEntry};
use crate::document::{get_at, same_slot, DocPath};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A path both sides changed to different values since the merge base.
///
/// Each value is `None` when the path is absent from that document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: DocPath,
    pub base_value: Option<Value>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
}

/// Changed paths split by how a merge must treat them.
#[derive(Debug, Clone, Default)]
pub struct PathPartition {
    /// Source changes the target did not touch, sorted by path.
    pub source_changes: Vec<DiffEntry>,
    /// Paths changed differently on both sides, sorted by path.
    pub conflicts: Vec<Conflict>,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless detector comparing two edits of a common base.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Partition the paths changed by `source` and `target` relative to `base`.
    ///
    /// - changed on the source only: a source change;
    /// - changed on the target only: nothing to do, the target already has it;
    /// - changed on both to the same value: nothing to do;
    /// - changed on both to different values: a conflict.
    ///
    /// When one side changed a path and the other changed something beneath
    /// it, both edits are compared at the shorter path.
    pub fn classify(base: &Value, source: &Value, target: &Value) -> PathPartition {
        let source_diff = diff(base, source);
        let target_diff = diff(base, target);

        debug!(
            source_changes = source_diff.len(),
            target_changes = target_diff.len(),
            "classifying changed paths"
        );

        let target_by_path: HashMap<&DocPath, &DiffEntry> =
            target_diff.iter().map(|e| (&e.path, e)).collect();
        let target_paths: BTreeSet<&DocPath> = target_diff.iter().map(|e| &e.path).collect();

        let mut source_changes = Vec::new();
        let mut conflicts: BTreeMap<DocPath, Conflict> = BTreeMap::new();

        for change in &source_diff {
            if let Some(theirs) = target_by_path.get(&change.path) {
                if !same_slot(change.right.as_ref(), theirs.right.as_ref()) {
                    debug!(path = %change.path, "conflicting edits");
                    conflicts.insert(
                        change.path.clone(),
                        Conflict {
                            path: change.path.clone(),
                            base_value: change.left.clone(),
                            source_value: change.right.clone(),
                            target_value: theirs.right.clone(),
                        },
                    );
                }
                continue;
            }

            if let Some(shared) = overlapping_path(&change.path, &target_paths) {
                if conflicts.contains_key(&shared) {
                    continue;
                }
                let source_value = get_at(source, &shared).cloned();
                let target_value = get_at(target, &shared).cloned();
                if !same_slot(source_value.as_ref(), target_value.as_ref()) {
                    debug!(path = %shared, "conflicting edits at enclosing path");
                    conflicts.insert(
                        shared.clone(),
                        Conflict {
                            base_value: get_at(base, &shared).cloned(),
                            path: shared,
                            source_value,
                            target_value,
                        },
                    );
                }
                continue;
            }

            source_changes.push(change.clone());
        }

        PathPartition {
            source_changes,
            conflicts: conflicts.into_values().collect(),
        }
    }
}

/// The shorter of `path` and a target path that is its ancestor or
/// descendant, if any.
fn overlapping_path(path: &DocPath, target_paths: &BTreeSet<&DocPath>) -> Option<DocPath> {
    // A target edit above this path.
    for len in 0..path.len() {
        let prefix = DocPath::from_segments(path.segments()[..len].to_vec());
        if target_paths.contains(&prefix) {
            return Some(prefix);
        }
    }
    // A target edit below this path; extensions sort directly after it.
    target_paths
        .range::<&DocPath, _>(path..)
        .find(|candidate| **candidate != path)
        .filter(|candidate| candidate.starts_with(path))
        .map(|_| path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disjoint_edits() {
        let base = json!({"title": "Guide", "steps": [{"title": "A"}]});
        let source = json!({"title": "Guide v2", "steps": [{"title": "A"}]});
        let target = json!({"title": "Guide", "steps": [{"title": "B"}]});
        let partition = ConflictDetector::classify(&base, &source, &target);
        assert!(partition.conflicts.is_empty());
        assert_eq!(partition.source_changes.len(), 1);
        assert_eq!(partition.source_changes[0].path.to_string(), "title");
    }

    #[test]
    fn test_same_edit_on_both_sides() {
        let base = json!({"title": "Guide"});
        let edited = json!({"title": "Same"});
        let partition = ConflictDetector::classify(&base, &edited, &edited);
        assert!(partition.conflicts.is_empty());
        assert!(partition.source_changes.is_empty());
    }

    #[test]
    fn test_divergent_edit() {
        let base = json!({"steps": [{"title": "Base"}]});
        let source = json!({"steps": [{"title": "Title from FEATURE"}]});
        let target = json!({"steps": [{"title": "Title from MAIN"}]});
        let partition = ConflictDetector::classify(&base, &source, &target);
        assert_eq!(partition.conflicts.len(), 1);
        let conflict = &partition.conflicts[0];
        assert_eq!(conflict.path.to_string(), "steps.0.title");
        assert_eq!(conflict.base_value, Some(json!("Base")));
        assert_eq!(conflict.source_value, Some(json!("Title from FEATURE")));
        assert_eq!(conflict.target_value, Some(json!("Title from MAIN")));
    }

    #[test]
    fn test_edit_delete_conflict() {
        let base = json!({"variables": {"user": "Ada"}});
        let source = json!({"variables": {"user": "Grace"}});
        let target = json!({"variables": {}});
        let partition = ConflictDetector::classify(&base, &source, &target);
        assert_eq!(partition.conflicts.len(), 1);
        assert_eq!(partition.conflicts[0].target_value, None);
    }

    #[test]
    fn test_both_deleted_no_conflict() {
        let base = json!({"variables": {"user": "Ada"}});
        let gone = json!({"variables": {}});
        let partition = ConflictDetector::classify(&base, &gone, &gone);
        assert!(partition.conflicts.is_empty());
    }

    #[test]
    fn test_enclosing_path_conflict() {
        let base = json!({"steps": [{"title": "A", "body": "x"}]});
        // Source replaces the whole step with a string; target edits inside it.
        let source = json!({"steps": ["removed"]});
        let target = json!({"steps": [{"title": "B", "body": "y"}]});
        let partition = ConflictDetector::classify(&base, &source, &target);
        assert_eq!(partition.conflicts.len(), 1);
        let conflict = &partition.conflicts[0];
        assert_eq!(conflict.path.to_string(), "steps.0");
        assert_eq!(conflict.base_value, Some(json!({"title": "A", "body": "x"})));
        assert_eq!(conflict.source_value, Some(json!("removed")));
        assert_eq!(conflict.target_value, Some(json!({"title": "B", "body": "y"})));
        assert!(partition.source_changes.is_empty());
    }

    #[test]
    fn test_enclosing_path_conflict_from_target_side() {
        let base = json!({"meta": {"lang": "en", "theme": "light"}});
        let source = json!({"meta": {"lang": "fr", "theme": "dark"}});
        let target = json!({"meta": null});
        let partition = ConflictDetector::classify(&base, &source, &target);
        assert_eq!(partition.conflicts.len(), 1);
        assert_eq!(partition.conflicts[0].path.to_string(), "meta");
    }

    #[test]
    fn test_multiple_conflicts_sorted() {
        let base = json!({"a": 1, "b": 1, "c": 1, "d": 1});
        let source = json!({"a": 2, "b": 2, "c": 2, "d": 1});
        let target = json!({"a": 3, "b": 2, "c": 3, "d": 3});
        let partition = ConflictDetector::classify(&base, &source, &target);
        let paths: Vec<String> = partition
            .conflicts
            .iter()
            .map(|c| c.path.to_string())
            .collect();
        assert_eq!(paths, vec!["a", "c"]);
    }
}
