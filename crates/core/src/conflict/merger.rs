//! Three-way merge engine.
//!
//! The merge starts from the target document as the working copy and
//! overlays every source change the target did not also touch. Paths both
//! sides changed differently are reported as conflicts and keep the
//! target's value until resolved.
//!
//! Conflict paths are addressed in the target's index space. While conflicts
//! are outstanding, source deletions are held back in
//! [`MergeOutcome::pending_deletions`] so that removing an earlier array
//! element cannot shift the element a conflict path points at.

use serde_json::Value;
use tracing::{debug, info};

use crate::conflict::detector::{Conflict, ConflictDetector};
use crate::diff::DiffEntry;
use crate::document::{remove_at, same_value, set_at, DocPath};

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Target document with the non-conflicting source changes applied,
    /// minus any `pending_deletions`.
    pub merged: Value,
    /// Paths that need a resolution, sorted by path.
    pub conflicts: Vec<Conflict>,
    /// Source deletions not yet applied to `merged`, sorted by path.
    /// Always empty for a clean merge.
    pub pending_deletions: Vec<DocPath>,
}

impl MergeOutcome {
    /// True if the merge needs no resolutions.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `source` into `target` using `base` as the common ancestor.
    pub fn three_way_merge(base: &Value, source: &Value, target: &Value) -> MergeOutcome {
        // Fast path: one side unchanged, or both sides identical.
        if same_value(source, base) || same_value(source, target) {
            debug!("source adds nothing, target wins cleanly");
            return MergeOutcome {
                merged: target.clone(),
                conflicts: Vec::new(),
                pending_deletions: Vec::new(),
            };
        }
        if same_value(target, base) {
            debug!("target unchanged, source wins cleanly");
            return MergeOutcome {
                merged: source.clone(),
                conflicts: Vec::new(),
                pending_deletions: Vec::new(),
            };
        }

        let partition = ConflictDetector::classify(base, source, target);
        let mut merged = target.clone();
        apply_writes(&mut merged, &partition.source_changes);
        let mut pending_deletions: Vec<DocPath> = partition
            .source_changes
            .iter()
            .filter(|change| change.right.is_none())
            .map(|change| change.path.clone())
            .collect();
        if partition.conflicts.is_empty() {
            remove_paths(&mut merged, &pending_deletions);
            pending_deletions.clear();
        }

        info!(
            applied = partition.source_changes.len(),
            deferred = pending_deletions.len(),
            conflicts = partition.conflicts.len(),
            "three-way merge complete"
        );

        MergeOutcome {
            merged,
            conflicts: partition.conflicts,
            pending_deletions,
        }
    }

    /// Quick check: can these three versions be merged without conflicts?
    pub fn can_auto_merge(base: &Value, source: &Value, target: &Value) -> bool {
        if same_value(source, base) || same_value(target, base) || same_value(source, target) {
            return true;
        }
        ConflictDetector::classify(base, source, target)
            .conflicts
            .is_empty()
    }
}

/// Apply the right-hand side of each entry onto `doc`.
///
/// Writes go in ascending path order and deletions in descending order
/// afterwards, so removing several trailing array elements does not shift
/// the indices still to be removed.
pub fn apply_changes(doc: &mut Value, changes: &[DiffEntry]) {
    apply_writes(doc, changes);
    let deletions: Vec<DocPath> = changes
        .iter()
        .filter(|change| change.right.is_none())
        .map(|change| change.path.clone())
        .collect();
    remove_paths(doc, &deletions);
}

fn apply_writes(doc: &mut Value, changes: &[DiffEntry]) {
    for change in changes {
        if let Some(value) = &change.right {
            set_at(doc, &change.path, value.clone());
        }
    }
}

/// Remove every path in `paths`, highest path first.
pub(crate) fn remove_paths(doc: &mut Value, paths: &[DocPath]) {
    let mut ordered: Vec<&DocPath> = paths.iter().collect();
    ordered.sort();
    ordered.dedup();
    for path in ordered.into_iter().rev() {
        remove_at(doc, path);
    }
}
