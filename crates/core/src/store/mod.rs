//! Storage abstraction for version history.
//!
//! The engine persists four collections: projects, branches, commits and
//! snapshots. They are reached through three traits, [`SnapshotStore`],
//! [`CommitStore`] and [`BranchRegistry`], which [`VersionStore`] combines
//! with an atomic [`record_commit`](VersionStore::record_commit).
//!
//! Two backends implement them: [`MemoryStore`] for tests and ephemeral use,
//! and the SQLite [`Database`](crate::db::Database).

pub mod memory;

use std::collections::{HashSet, VecDeque};

use crate::errors::VersionError;
use crate::models::{Branch, Commit, Project, Snapshot};

pub use memory::MemoryStore;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, VersionError>;

/// Immutable document snapshots keyed by content hash.
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot. Storing an id that already exists is a no-op that
    /// returns the stored record.
    fn put_snapshot(&self, snapshot: &Snapshot) -> StoreResult<Snapshot>;

    fn get_snapshot(&self, id: &str) -> StoreResult<Option<Snapshot>>;
}

/// Immutable commit records forming a DAG through parent ids.
pub trait CommitStore: Send + Sync {
    /// Store a commit.
    ///
    /// Fails with `NotFound` if a parent or the snapshot does not exist, and
    /// with `AlreadyExists` if the id is taken.
    fn put_commit(&self, commit: &Commit) -> StoreResult<Commit>;

    fn get_commit(&self, id: &str) -> StoreResult<Option<Commit>>;

    /// All commit ids reachable from `id` through parent links, `id` included.
    fn find_ancestors(&self, id: &str) -> StoreResult<HashSet<String>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            if seen.contains(&current) {
                continue;
            }
            let commit = self
                .get_commit(&current)?
                .ok_or_else(|| VersionError::not_found("commit", current.as_str()))?;
            queue.extend(commit.parents.into_iter().filter(|p| !seen.contains(p)));
            seen.insert(current);
        }
        Ok(seen)
    }
}

/// Projects and their named branches.
pub trait BranchRegistry: Send + Sync {
    /// Create a project together with its (empty) default branch.
    fn create_project(&self, project: &Project, default_branch: &Branch) -> StoreResult<Project>;

    fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;

    /// Create a branch. `NotFound` if the project or the branch's head commit
    /// does not exist, `AlreadyExists` if the id is taken.
    fn create_branch(&self, branch: &Branch) -> StoreResult<Branch>;

    fn get_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<Option<Branch>>;

    /// Branches of a project ordered by id.
    fn list_branches(&self, project_id: &str) -> StoreResult<Vec<Branch>>;

    fn delete_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<()>;

    /// Compare-and-swap the branch head from `expected` to `new_head`.
    ///
    /// Fails with `ConcurrentModification` if the current head is not
    /// `expected`, and with `NotFound` if the branch or `new_head` is missing.
    fn advance_head(
        &self,
        project_id: &str,
        branch_id: &str,
        expected: Option<&str>,
        new_head: &str,
    ) -> StoreResult<Branch>;
}

/// A complete backend: all three collections plus an atomic commit write.
pub trait VersionStore: SnapshotStore + CommitStore + BranchRegistry {
    /// Store `snapshot` and `commit`, then swap the branch head from
    /// `expected` to the new commit, as one unit: if any step fails, none of
    /// the records become visible.
    fn record_commit(
        &self,
        snapshot: &Snapshot,
        commit: &Commit,
        branch_id: &str,
        expected: Option<&str>,
    ) -> StoreResult<Branch>;
}
