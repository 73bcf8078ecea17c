//! The version-control facade.
//!
//! [`VersionManager`] composes the stores, the diff engine and the merge
//! engine into the public API. Every mutation funnels into one
//! [`VersionStore::record_commit`] call, so a merge moves through
//!
//! 1. `Started`: both heads and the merge base are resolved;
//! 2. `Conflicts` / `Awaiting`: conflicting paths are surfaced to the caller;
//! 3. `Resolved`: caller resolutions settle every conflict;
//! 4. `Committed`: the merge commit and the head swap land together,
//!
//! and either reaches `Committed` or leaves the history untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{AppConfig, StorageBackend};
use crate::conflict::{ConflictDetector, ConflictResolver, MergeOutcome, Merger, Resolution};
use crate::db::Database;
use crate::diff::{diff, DiffEntry};
use crate::errors::{StorageError, VersionError};
use crate::graph::{ahead_behind, find_merge_base, first_parent_history};
use crate::models::{Branch, BranchComparison, Commit, Project, ProjectOptions, Snapshot};
use crate::store::{MemoryStore, VersionStore};

type Result<T> = std::result::Result<T, VersionError>;

// ---------------------------------------------------------------------------
// Merge state machine
// ---------------------------------------------------------------------------

/// Stages a merge passes through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Started,
    Conflicts,
    Awaiting,
    Resolved,
    Committed,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Conflicts => write!(f, "conflicts"),
            Self::Awaiting => write!(f, "awaiting"),
            Self::Resolved => write!(f, "resolved"),
            Self::Committed => write!(f, "committed"),
        }
    }
}

/// Everything a merge needs before it can write.
struct MergePlan {
    target: Branch,
    source_head: String,
    target_head: String,
    outcome: MergeOutcome,
    state: MergeState,
}

impl MergePlan {
    fn advance(&mut self, next: MergeState) {
        debug!(
            target = %self.target.id,
            from = %self.state,
            to = %next,
            "merge state transition"
        );
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Public entry point for branch, commit and merge operations.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct VersionManager {
    store: Arc<dyn VersionStore>,
}

impl VersionManager {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// A manager over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Open the backend selected by `config.storage`, creating the data
    /// directory and running migrations for SQLite.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory store");
                Ok(Self::in_memory())
            }
            StorageBackend::Sqlite => {
                std::fs::create_dir_all(&config.storage.data_dir).map_err(StorageError::from)?;
                let db = Database::new(config.storage.database_path())?;
                db.initialize()?;
                Ok(Self::new(Arc::new(db)))
            }
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn VersionStore {
        self.store.as_ref()
    }

    // -- projects & branches ------------------------------------------------

    /// Create a project and its empty default branch.
    pub fn init_project(&self, id: &str, options: ProjectOptions) -> Result<Project> {
        require_non_empty("project id", id)?;
        require_non_empty("author", &options.author)?;
        require_non_empty("default branch", &options.default_branch)?;

        let project = Project {
            id: id.to_string(),
            author: options.author,
            default_branch: options.default_branch,
            created_at: chrono::Utc::now(),
        };
        let branch = Branch::new(id, project.default_branch.as_str(), None, None);
        let project = self.store.create_project(&project, &branch)?;

        info!(project = %project.id, branch = %project.default_branch, "project initialized");
        Ok(project)
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.store
            .get_project(id)?
            .ok_or_else(|| VersionError::not_found("project", id))
    }

    /// All branches of a project, ordered by name.
    pub fn get_branches(&self, project_id: &str) -> Result<Vec<Branch>> {
        self.get_project(project_id)?;
        self.store.list_branches(project_id)
    }

    pub fn get_branch(&self, project_id: &str, branch_id: &str) -> Result<Branch> {
        self.store
            .get_branch(project_id, branch_id)?
            .ok_or_else(|| VersionError::not_found("branch", branch_id))
    }

    /// Create a branch at `from_commit`, or at the default branch head.
    ///
    /// The commit must belong to the project; a commit from another project
    /// is reported as `NotFound`.
    pub fn create_branch(
        &self,
        project_id: &str,
        name: &str,
        description: Option<&str>,
        from_commit: Option<&str>,
    ) -> Result<Branch> {
        let project = self.get_project(project_id)?;
        require_non_empty("branch name", name)?;

        let fork_point = match from_commit {
            Some(id) => {
                let commit = self.get_commit(id)?;
                if commit.project_id != project.id {
                    return Err(VersionError::not_found("commit", id));
                }
                Some(commit.id)
            }
            None => self.get_branch(project_id, &project.default_branch)?.head_commit,
        };

        let branch = Branch::new(
            project_id,
            name,
            description.map(str::to_string),
            fork_point,
        );
        let branch = self.store.create_branch(&branch)?;

        info!(
            project = project_id,
            branch = %branch.id,
            fork_point = branch.fork_point.as_deref().unwrap_or("<none>"),
            "branch created"
        );
        Ok(branch)
    }

    /// Delete a branch. Its commits stay in history.
    pub fn delete_branch(&self, project_id: &str, branch_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        if project.default_branch == branch_id {
            return Err(VersionError::validation(format!(
                "cannot delete default branch '{}'",
                branch_id
            )));
        }
        self.store.delete_branch(project_id, branch_id)?;
        info!(project = project_id, branch = branch_id, "branch deleted");
        Ok(())
    }

    // -- commits ------------------------------------------------------------

    /// Commit `data` on top of the branch's current head.
    pub fn commit(
        &self,
        project_id: &str,
        branch_id: &str,
        message: &str,
        data: &Value,
    ) -> Result<Commit> {
        let head = self.get_branch(project_id, branch_id)?.head_commit;
        self.commit_at(project_id, branch_id, head.as_deref(), message, data)
    }

    /// Commit `data` with `expected_head` as the parent.
    ///
    /// Fails with `ConcurrentModification`, writing nothing, if the branch
    /// head is no longer `expected_head`.
    pub fn commit_at(
        &self,
        project_id: &str,
        branch_id: &str,
        expected_head: Option<&str>,
        message: &str,
        data: &Value,
    ) -> Result<Commit> {
        let project = self.get_project(project_id)?;
        self.get_branch(project_id, branch_id)?;

        let snapshot = Snapshot::new(data);
        let parents = expected_head.map(str::to_string).into_iter().collect();
        let commit = Commit::new(
            project_id,
            parents,
            snapshot.id.as_str(),
            message,
            project.author.as_str(),
        );
        self.store
            .record_commit(&snapshot, &commit, branch_id, expected_head)?;

        info!(
            project = project_id,
            branch = branch_id,
            commit = %commit.id,
            snapshot = %snapshot.id,
            "commit recorded"
        );
        Ok(commit)
    }

    pub fn get_commit(&self, id: &str) -> Result<Commit> {
        self.store
            .get_commit(id)?
            .ok_or_else(|| VersionError::not_found("commit", id))
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.store
            .get_snapshot(id)?
            .ok_or_else(|| VersionError::not_found("snapshot", id))
    }

    /// The document a commit points at.
    pub fn get_document(&self, commit_id: &str) -> Result<Value> {
        let commit = self.get_commit(commit_id)?;
        Ok(self.get_snapshot(&commit.snapshot_id)?.data)
    }

    /// First-parent history of a branch, newest first.
    pub fn log(
        &self,
        project_id: &str,
        branch_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Commit>> {
        match self.get_branch(project_id, branch_id)?.head_commit {
            Some(head) => first_parent_history(self.store.as_ref(), &head, limit),
            None => Ok(Vec::new()),
        }
    }

    /// Structural diff from commit `from` to commit `to`.
    pub fn diff_commits(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>> {
        let left = self.get_document(from)?;
        let right = self.get_document(to)?;
        Ok(diff(&left, &right))
    }

    // -- comparison & merge -------------------------------------------------

    /// Ahead/behind counts and the paths a merge of `source` into `target`
    /// would conflict on. Writes nothing.
    pub fn compare_branches(
        &self,
        project_id: &str,
        source: &str,
        target: &str,
    ) -> Result<BranchComparison> {
        self.get_project(project_id)?;
        let source_head = self.get_branch(project_id, source)?.head_commit;
        let target_head = self.get_branch(project_id, target)?.head_commit;

        let (ahead, behind) = ahead_behind(
            self.store.as_ref(),
            source_head.as_deref(),
            target_head.as_deref(),
        )?;

        let (Some(source_head), Some(target_head)) = (source_head, target_head) else {
            return Ok(BranchComparison {
                ahead,
                behind,
                merge_base: None,
                conflicts: Vec::new(),
            });
        };

        let base = find_merge_base(self.store.as_ref(), &source_head, &target_head)?
            .ok_or_else(|| no_common_ancestor(source, target))?;
        let partition = ConflictDetector::classify(
            &self.get_document(&base)?,
            &self.get_document(&source_head)?,
            &self.get_document(&target_head)?,
        );

        debug!(source, target, ahead, behind, base = %base, "branches compared");
        Ok(BranchComparison {
            ahead,
            behind,
            merge_base: Some(base),
            conflicts: partition.conflicts.into_iter().map(|c| c.path).collect(),
        })
    }

    /// Merge `source` into `target`.
    ///
    /// Fails with `MergeConflict`, writing nothing, when both sides changed a
    /// path differently. Otherwise records a commit with parents
    /// `[target_head, source_head]` on `target`.
    pub fn merge_branches(
        &self,
        project_id: &str,
        source: &str,
        target: &str,
        message: &str,
    ) -> Result<Commit> {
        let mut plan = self.plan_merge(project_id, source, target)?;
        if !plan.outcome.is_clean() {
            plan.advance(MergeState::Conflicts);
            return Err(VersionError::MergeConflict {
                conflicts: plan.outcome.conflicts,
            });
        }
        let merged = std::mem::take(&mut plan.outcome.merged);
        self.write_merge(plan, source, &merged, message)
    }

    /// Merge `source` into `target`, settling every conflict with exactly one
    /// of `resolutions`.
    pub fn merge_with_resolutions(
        &self,
        project_id: &str,
        source: &str,
        target: &str,
        resolutions: &[Resolution],
        message: &str,
    ) -> Result<Commit> {
        let mut plan = self.plan_merge(project_id, source, target)?;
        if !plan.outcome.is_clean() {
            plan.advance(MergeState::Conflicts);
            plan.advance(MergeState::Awaiting);
        }
        let merged = ConflictResolver::apply_resolutions(&plan.outcome, resolutions)?;
        plan.advance(MergeState::Resolved);
        self.write_merge(plan, source, &merged, message)
    }

    fn plan_merge(&self, project_id: &str, source: &str, target: &str) -> Result<MergePlan> {
        self.get_project(project_id)?;
        let source_branch = self.get_branch(project_id, source)?;
        let target = self.get_branch(project_id, target)?;

        let Some(source_head) = source_branch.head_commit else {
            return Err(VersionError::validation(format!(
                "branch '{}' has no commits to merge",
                source_branch.id
            )));
        };
        let Some(target_head) = target.head_commit.clone() else {
            return Err(no_common_ancestor(source, &target.id));
        };

        let base = find_merge_base(self.store.as_ref(), &source_head, &target_head)?
            .ok_or_else(|| no_common_ancestor(source, &target.id))?;

        let outcome = Merger::three_way_merge(
            &self.get_document(&base)?,
            &self.get_document(&source_head)?,
            &self.get_document(&target_head)?,
        );

        info!(
            project = project_id,
            source,
            target = %target.id,
            base = %base,
            conflicts = outcome.conflicts.len(),
            "merge started"
        );
        Ok(MergePlan {
            target,
            source_head,
            target_head,
            outcome,
            state: MergeState::Started,
        })
    }

    fn write_merge(
        &self,
        mut plan: MergePlan,
        source: &str,
        merged: &Value,
        message: &str,
    ) -> Result<Commit> {
        let project = self.get_project(&plan.target.project_id)?;
        let snapshot = Snapshot::new(merged);
        let commit = Commit::new(
            project.id.as_str(),
            vec![plan.target_head.clone(), plan.source_head.clone()],
            snapshot.id.as_str(),
            message,
            project.author.as_str(),
        );
        self.store.record_commit(
            &snapshot,
            &commit,
            &plan.target.id,
            Some(&plan.target_head),
        )?;
        plan.advance(MergeState::Committed);

        info!(
            project = %project.id,
            source,
            target = %plan.target.id,
            commit = %commit.id,
            "merge committed"
        );
        Ok(commit)
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VersionError::validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn no_common_ancestor(source: &str, target: &str) -> VersionError {
    VersionError::NoCommonAncestor {
        source_branch: source.to_string(),
        target_branch: target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocPath;
    use serde_json::json;

    fn setup() -> VersionManager {
        let vm = VersionManager::in_memory();
        vm.init_project("guide", ProjectOptions::new("ada")).unwrap();
        vm
    }

    #[test]
    fn test_init_project_validation() {
        let vm = VersionManager::in_memory();
        assert!(matches!(
            vm.init_project("", ProjectOptions::new("ada")),
            Err(VersionError::Validation(_))
        ));
        assert!(matches!(
            vm.init_project("guide", ProjectOptions::new(" ")),
            Err(VersionError::Validation(_))
        ));
        vm.init_project("guide", ProjectOptions::new("ada").with_default_branch("trunk"))
            .unwrap();
        assert!(matches!(
            vm.init_project("guide", ProjectOptions::new("ada")),
            Err(VersionError::AlreadyExists { .. })
        ));
        let branch = vm.get_branch("guide", "trunk").unwrap();
        assert!(branch.is_empty());
    }

    #[test]
    fn test_commit_chains_parents_and_author() {
        let vm = setup();
        let c1 = vm.commit("guide", "main", "first", &json!({"title": "A"})).unwrap();
        let c2 = vm.commit("guide", "main", "second", &json!({"title": "B"})).unwrap();
        assert!(c1.parents.is_empty());
        assert_eq!(c2.parents, vec![c1.id.clone()]);
        assert_eq!(c2.author, "ada");
        assert_eq!(vm.get_document(&c2.id).unwrap(), json!({"title": "B"}));

        let log = vm.log("guide", "main", None).unwrap();
        assert_eq!(log.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec![c2.id.as_str(), c1.id.as_str()]);
    }

    #[test]
    fn test_commit_at_stale_head() {
        let vm = setup();
        let c1 = vm.commit("guide", "main", "first", &json!({"n": 1})).unwrap();
        vm.commit("guide", "main", "second", &json!({"n": 2})).unwrap();
        let err = vm
            .commit_at("guide", "main", Some(&c1.id), "stale", &json!({"n": 3}))
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(vm.log("guide", "main", None).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_default_branch_rejected() {
        let vm = setup();
        assert!(matches!(
            vm.delete_branch("guide", "main"),
            Err(VersionError::Validation(_))
        ));
        vm.create_branch("guide", "draft", None, None).unwrap();
        vm.delete_branch("guide", "draft").unwrap();
        assert!(matches!(
            vm.get_branch("guide", "draft"),
            Err(VersionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_create_branch_from_foreign_commit() {
        let vm = setup();
        vm.init_project("other", ProjectOptions::new("grace")).unwrap();
        let foreign = vm.commit("other", "main", "x", &json!({})).unwrap();
        assert!(matches!(
            vm.create_branch("guide", "feature", None, Some(&foreign.id)),
            Err(VersionError::NotFound { entity: "commit", .. })
        ));
        assert_eq!(vm.get_branches("guide").unwrap().len(), 1);
    }

    #[test]
    fn test_merge_from_empty_branch_rejected() {
        let vm = setup();
        vm.create_branch("guide", "empty", None, None).unwrap();
        vm.commit("guide", "main", "c", &json!({})).unwrap();
        assert!(matches!(
            vm.merge_branches("guide", "empty", "main", "m"),
            Err(VersionError::Validation(_))
        ));
    }

    #[test]
    fn test_merge_with_resolutions_manual_value() {
        let vm = setup();
        let base = vm.commit("guide", "main", "base", &json!({"title": "A", "tags": []})).unwrap();
        vm.create_branch("guide", "feature", None, Some(&base.id)).unwrap();
        vm.commit("guide", "feature", "f", &json!({"title": "B", "tags": []})).unwrap();
        vm.commit("guide", "main", "m", &json!({"title": "C", "tags": ["x"]})).unwrap();

        let merge = vm
            .merge_with_resolutions(
                "guide",
                "feature",
                "main",
                &[Resolution::manual(DocPath::parse("title"), Some(json!("D")))],
                "merge",
            )
            .unwrap();
        assert!(merge.is_merge());
        assert_eq!(
            vm.get_document(&merge.id).unwrap(),
            json!({"title": "D", "tags": ["x"]})
        );
    }

    #[test]
    fn test_merge_state_display() {
        assert_eq!(MergeState::Awaiting.to_string(), "awaiting");
        assert_eq!(
            serde_json::to_string(&MergeState::Committed).unwrap(),
            "\"committed\""
        );
    }
}
