//! Domain model types: projects, branches, commits and snapshots.
//!
//! All records are plain data. Commits and snapshots are immutable once
//! stored; only a branch's head pointer ever changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::{content_hash, DocPath};

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A versioned guide project. Its branches live in the branch registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub author: String,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}

/// Options for [`VersionManager::init_project`](crate::VersionManager::init_project).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOptions {
    pub author: String,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
}

pub(crate) fn default_branch_name() -> String {
    "main".into()
}

impl ProjectOptions {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            default_branch: default_branch_name(),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named, movable pointer into the commit graph. The id is the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Current head; `None` until the first commit.
    pub head_commit: Option<String>,
    /// Commit the branch was created from; `None` for a project's first branch.
    pub fork_point: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        fork_point: Option<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: name.clone(),
            project_id: project_id.into(),
            name,
            description,
            head_commit: fork_point.clone(),
            fork_point,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if the branch has no commits yet.
    pub fn is_empty(&self) -> bool {
        self.head_commit.is_none()
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// An immutable history record pointing at one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub project_id: String,
    /// Zero parents for a root commit, two for a merge (`[target, source]`).
    pub parents: Vec<String>,
    pub snapshot_id: String,
    pub message: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl Commit {
    /// Create a commit with a fresh UUID.
    pub fn new(
        project_id: impl Into<String>,
        parents: Vec<String>,
        snapshot_id: impl Into<String>,
        message: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            parents,
            snapshot_id: snapshot_id.into(),
            message: message.into(),
            author: author.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() == 2
    }

    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable copy of a document. The id is the document's content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot a copy of `data`.
    pub fn new(data: &Value) -> Self {
        Self {
            id: content_hash(data),
            data: data.clone(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Result of comparing a source branch against a target branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchComparison {
    /// Commits reachable from the source head but not the target head.
    pub ahead: usize,
    /// Commits reachable from the target head but not the source head.
    pub behind: usize,
    pub merge_base: Option<String>,
    /// Paths a merge of source into target would report as conflicting.
    pub conflicts: Vec<DocPath>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_branch_new_points_at_fork() {
        let branch = Branch::new("guide", "feature", None, Some("c1".into()));
        assert_eq!(branch.id, "feature");
        assert_eq!(branch.head_commit.as_deref(), Some("c1"));
        assert_eq!(branch.fork_point.as_deref(), Some("c1"));
        assert!(!branch.is_empty());
        assert!(Branch::new("guide", "main", None, None).is_empty());
    }

    #[test]
    fn test_commit_ids_are_unique() {
        let a = Commit::new("guide", vec![], "s", "first", "ada");
        let b = Commit::new("guide", vec![], "s", "first", "ada");
        assert_ne!(a.id, b.id);
        assert!(!a.is_merge());
        assert_eq!(a.first_parent(), None);
    }

    #[test]
    fn test_snapshot_copies_document() {
        let mut doc = json!({"steps": [{"title": "A"}]});
        let snapshot = Snapshot::new(&doc);
        doc["steps"][0]["title"] = json!("mutated");
        assert_eq!(snapshot.data, json!({"steps": [{"title": "A"}]}));
        assert_eq!(snapshot.id, content_hash(&snapshot.data));
    }

    #[test]
    fn test_project_options_default_branch() {
        let opts: ProjectOptions = serde_json::from_value(json!({"author": "ada"})).unwrap();
        assert_eq!(opts.default_branch, "main");
        assert_eq!(ProjectOptions::new("ada").with_default_branch("trunk").default_branch, "trunk");
    }
}
