//! Conflict resolution.
//!
//! The [`ConflictResolver`] settles every conflict of a merge with exactly one
//! caller-supplied [`Resolution`]: take the source, target or base value, or
//! supply a value manually.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::conflict::detector::Conflict;
use crate::conflict::merger::{remove_paths, MergeOutcome};
use crate::document::{set_at, DocPath};
use crate::errors::VersionError;

/// Named resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Accept the source branch's value.
    UseSource,
    /// Accept the target branch's value.
    UseTarget,
    /// Revert to the merge base's value.
    UseBase,
    /// Use the value carried by the resolution.
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseSource => write!(f, "use_source"),
            Self::UseTarget => write!(f, "use_target"),
            Self::UseBase => write!(f, "use_base"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use_source" | "source" => Ok(Self::UseSource),
            "use_target" | "target" => Ok(Self::UseTarget),
            "use_base" | "base" => Ok(Self::UseBase),
            "manual" => Ok(Self::Manual),
            other => Err(VersionError::validation(format!(
                "unknown resolution strategy '{}'",
                other
            ))),
        }
    }
}

/// A caller's decision for one conflicting path.
///
/// For [`ResolutionStrategy::Manual`], an absent `value` deletes the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub path: DocPath,
    pub resolution: ResolutionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Resolution {
    pub fn new(path: impl Into<DocPath>, resolution: ResolutionStrategy) -> Self {
        Self {
            path: path.into(),
            resolution,
            value: None,
        }
    }

    pub fn use_source(path: impl Into<DocPath>) -> Self {
        Self::new(path, ResolutionStrategy::UseSource)
    }

    pub fn use_target(path: impl Into<DocPath>) -> Self {
        Self::new(path, ResolutionStrategy::UseTarget)
    }

    pub fn use_base(path: impl Into<DocPath>) -> Self {
        Self::new(path, ResolutionStrategy::UseBase)
    }

    pub fn manual(path: impl Into<DocPath>, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            resolution: ResolutionStrategy::Manual,
            value,
        }
    }
}

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Apply one resolution per conflict onto the outcome's merged document
    /// and finish its deferred source deletions.
    ///
    /// Resolved values are written first, all on the target's index space;
    /// deletions (deferred source ones plus resolutions that pick an absent
    /// value) then run together from the highest path down.
    ///
    /// Fails with [`VersionError::Validation`] when a conflict has no
    /// resolution, a path is resolved twice, or a resolution matches no
    /// conflict. Paths outside the conflict list are left as merged.
    pub fn apply_resolutions(
        outcome: &MergeOutcome,
        resolutions: &[Resolution],
    ) -> Result<Value, VersionError> {
        let conflicts = outcome.conflicts.as_slice();
        let by_path = Self::validate(conflicts, resolutions)?;

        let mut doc = outcome.merged.clone();
        let mut deletions = outcome.pending_deletions.clone();
        for conflict in conflicts {
            let Some(resolution) = by_path.get(&conflict.path) else {
                continue;
            };
            debug!(
                path = %conflict.path,
                strategy = %resolution.resolution,
                "applying resolution"
            );
            match Self::resolved_value(conflict, resolution) {
                Some(value) => set_at(&mut doc, &conflict.path, value),
                None => deletions.push(conflict.path.clone()),
            }
        }
        remove_paths(&mut doc, &deletions);

        info!(
            resolved = conflicts.len(),
            removed = deletions.len(),
            "conflicts resolved"
        );
        Ok(doc)
    }

    /// Check that `resolutions` covers `conflicts` exactly once each.
    pub fn validate<'a>(
        conflicts: &[Conflict],
        resolutions: &'a [Resolution],
    ) -> Result<HashMap<&'a DocPath, &'a Resolution>, VersionError> {
        let mut by_path: HashMap<&DocPath, &Resolution> = HashMap::new();
        for resolution in resolutions {
            if by_path.insert(&resolution.path, resolution).is_some() {
                return Err(VersionError::validation(format!(
                    "path '{}' has more than one resolution",
                    resolution.path
                )));
            }
        }

        let missing: Vec<String> = conflicts
            .iter()
            .filter(|c| !by_path.contains_key(&c.path))
            .map(|c| c.path.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(VersionError::validation(format!(
                "no resolution supplied for conflicting path(s): {}",
                missing.join(", ")
            )));
        }

        let unmatched: Vec<String> = resolutions
            .iter()
            .filter(|r| !conflicts.iter().any(|c| c.path == r.path))
            .map(|r| r.path.to_string())
            .collect();
        if !unmatched.is_empty() {
            return Err(VersionError::validation(format!(
                "resolution(s) for non-conflicting path(s): {}",
                unmatched.join(", ")
            )));
        }

        Ok(by_path)
    }

    /// The value a resolution selects for a conflict; `None` deletes the path.
    pub fn resolved_value(conflict: &Conflict, resolution: &Resolution) -> Option<Value> {
        match resolution.resolution {
            ResolutionStrategy::UseSource => conflict.source_value.clone(),
            ResolutionStrategy::UseTarget => conflict.target_value.clone(),
            ResolutionStrategy::UseBase => conflict.base_value.clone(),
            ResolutionStrategy::Manual => resolution.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conflict(path: &str, base: Option<Value>, source: Option<Value>, target: Option<Value>) -> Conflict {
        Conflict {
            path: DocPath::parse(path),
            base_value: base,
            source_value: source,
            target_value: target,
        }
    }

    fn outcome(merged: Value, conflicts: Vec<Conflict>) -> MergeOutcome {
        MergeOutcome {
            merged,
            conflicts,
            pending_deletions: Vec::new(),
        }
    }

    fn title_conflict() -> MergeOutcome {
        outcome(
            json!({"steps": [{"title": "MAIN"}], "meta": {"lang": "fr"}}),
            vec![conflict(
                "steps.0.title",
                Some(json!("Base")),
                Some(json!("FEATURE")),
                Some(json!("MAIN")),
            )],
        )
    }

    #[test]
    fn test_use_source() {
        let merged = title_conflict();
        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::use_source("steps.0.title")],
        )
        .unwrap();
        assert_eq!(doc, json!({"steps": [{"title": "FEATURE"}], "meta": {"lang": "fr"}}));
    }

    #[test]
    fn test_use_target_and_base() {
        let merged = title_conflict();
        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::use_target("steps.0.title")],
        )
        .unwrap();
        assert_eq!(doc, merged.merged);

        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::use_base("steps.0.title")],
        )
        .unwrap();
        assert_eq!(doc["steps"][0]["title"], json!("Base"));
    }

    #[test]
    fn test_manual_value_and_deletion() {
        let merged = title_conflict();
        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::manual("steps.0.title", Some(json!("Hand-picked")))],
        )
        .unwrap();
        assert_eq!(doc["steps"][0]["title"], json!("Hand-picked"));

        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::manual("steps.0.title", None)],
        )
        .unwrap();
        assert_eq!(doc, json!({"steps": [{}], "meta": {"lang": "fr"}}));
    }

    #[test]
    fn test_absent_chosen_value_deletes() {
        let merged = outcome(
            json!({"steps": ["a", "b", "c"]}),
            vec![
                conflict("steps.1", Some(json!("b0")), None, Some(json!("b"))),
                conflict("steps.2", Some(json!("c0")), None, Some(json!("c"))),
            ],
        );
        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::use_source("steps.1"), Resolution::use_source("steps.2")],
        )
        .unwrap();
        assert_eq!(doc, json!({"steps": ["a"]}));
    }

    #[test]
    fn test_pending_deletions_run_after_resolved_writes() {
        let merged = MergeOutcome {
            merged: json!({"steps": ["a", "b", "C"]}),
            conflicts: vec![conflict("steps.2", Some(json!("c")), None, Some(json!("C")))],
            pending_deletions: vec![DocPath::parse("steps.1")],
        };

        let doc = ConflictResolver::apply_resolutions(&merged, &[Resolution::use_target("steps.2")])
            .unwrap();
        assert_eq!(doc, json!({"steps": ["a", "C"]}));

        let doc = ConflictResolver::apply_resolutions(&merged, &[Resolution::use_source("steps.2")])
            .unwrap();
        assert_eq!(doc, json!({"steps": ["a"]}));

        let doc = ConflictResolver::apply_resolutions(
            &merged,
            &[Resolution::manual("steps.2", Some(json!("M")))],
        )
        .unwrap();
        assert_eq!(doc, json!({"steps": ["a", "M"]}));
    }

    #[test]
    fn test_missing_resolution_rejected() {
        let merged = title_conflict();
        let result = ConflictResolver::apply_resolutions(&merged, &[]);
        assert!(matches!(result, Err(VersionError::Validation(ref msg)) if msg.contains("steps.0.title")));
    }

    #[test]
    fn test_excess_resolution_rejected() {
        let merged = title_conflict();
        let result = ConflictResolver::apply_resolutions(
            &merged,
            &[
                Resolution::use_source("steps.0.title"),
                Resolution::use_target("meta.lang"),
            ],
        );
        assert!(matches!(result, Err(VersionError::Validation(ref msg)) if msg.contains("meta.lang")));
    }

    #[test]
    fn test_duplicate_resolution_rejected() {
        let merged = title_conflict();
        let result = ConflictResolver::apply_resolutions(
            &merged,
            &[
                Resolution::use_source("steps.0.title"),
                Resolution::use_target("steps.0.title"),
            ],
        );
        assert!(matches!(result, Err(VersionError::Validation(_))));
    }

    #[test]
    fn test_resolution_wire_format() {
        let parsed: Resolution = serde_json::from_value(json!({
            "path": ["steps", 0, "title"],
            "resolution": "use_source"
        }))
        .unwrap();
        assert_eq!(parsed, Resolution::use_source("steps.0.title"));

        let manual = serde_json::to_value(Resolution::manual("title", Some(json!("x")))).unwrap();
        assert_eq!(manual, json!({"path": ["title"], "resolution": "manual", "value": "x"}));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("use_source".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::UseSource);
        assert_eq!("target".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::UseTarget);
        assert!("theirs".parse::<ResolutionStrategy>().is_err());
    }
}
