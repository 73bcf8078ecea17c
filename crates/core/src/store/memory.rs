//! In-memory storage backend.
//!
//! Every collection sits behind its own `RwLock`. Writers that touch several
//! collections always lock in the order projects → branches → commits →
//! snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, warn};

use super::{BranchRegistry, CommitStore, SnapshotStore, StoreResult, VersionStore};
use crate::errors::VersionError;
use crate::models::{Branch, Commit, Project, Snapshot};

type BranchKey = (String, String);

/// Thread-safe in-memory store. Data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    branches: RwLock<BTreeMap<BranchKey, Branch>>,
    commits: RwLock<HashMap<String, Commit>>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored commits.
    pub fn commit_count(&self) -> usize {
        read(&self.commits).len()
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        read(&self.snapshots).len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn branch_key(project_id: &str, branch_id: &str) -> BranchKey {
    (project_id.to_string(), branch_id.to_string())
}

/// Validate a commit against already-stored commits and snapshots.
fn check_commit(
    commit: &Commit,
    commits: &HashMap<String, Commit>,
    snapshot_exists: bool,
) -> StoreResult<()> {
    if commits.contains_key(&commit.id) {
        return Err(VersionError::already_exists("commit", commit.id.as_str()));
    }
    if let Some(missing) = commit.parents.iter().find(|p| !commits.contains_key(*p)) {
        return Err(VersionError::not_found("commit", missing.as_str()));
    }
    if !snapshot_exists {
        return Err(VersionError::not_found("snapshot", commit.snapshot_id.as_str()));
    }
    Ok(())
}

/// Check the CAS precondition on a branch without mutating it.
fn check_head<'a>(
    branches: &'a BTreeMap<BranchKey, Branch>,
    project_id: &str,
    branch_id: &str,
    expected: Option<&str>,
) -> StoreResult<&'a Branch> {
    let branch = branches
        .get(&branch_key(project_id, branch_id))
        .ok_or_else(|| VersionError::not_found("branch", branch_id))?;
    if branch.head_commit.as_deref() != expected {
        warn!(
            branch = branch_id,
            expected = expected.unwrap_or("<none>"),
            actual = branch.head_commit.as_deref().unwrap_or("<none>"),
            "branch head moved, rejecting update"
        );
        return Err(VersionError::ConcurrentModification {
            branch: branch_id.to_string(),
            expected: expected.map(str::to_string),
            actual: branch.head_commit.clone(),
        });
    }
    Ok(branch)
}

fn swap_head(
    branches: &mut BTreeMap<BranchKey, Branch>,
    project_id: &str,
    branch_id: &str,
    new_head: &str,
) -> StoreResult<Branch> {
    let branch = branches
        .get_mut(&branch_key(project_id, branch_id))
        .ok_or_else(|| VersionError::not_found("branch", branch_id))?;
    branch.head_commit = Some(new_head.to_string());
    branch.updated_at = Utc::now();
    Ok(branch.clone())
}

impl SnapshotStore for MemoryStore {
    fn put_snapshot(&self, snapshot: &Snapshot) -> StoreResult<Snapshot> {
        let mut snapshots = write(&self.snapshots);
        let stored = snapshots
            .entry(snapshot.id.clone())
            .or_insert_with(|| snapshot.clone());
        Ok(stored.clone())
    }

    fn get_snapshot(&self, id: &str) -> StoreResult<Option<Snapshot>> {
        Ok(read(&self.snapshots).get(id).cloned())
    }
}

impl CommitStore for MemoryStore {
    fn put_commit(&self, commit: &Commit) -> StoreResult<Commit> {
        let mut commits = write(&self.commits);
        let snapshot_exists = read(&self.snapshots).contains_key(&commit.snapshot_id);
        check_commit(commit, &commits, snapshot_exists)?;
        commits.insert(commit.id.clone(), commit.clone());
        debug!(commit = %commit.id, "stored commit");
        Ok(commit.clone())
    }

    fn get_commit(&self, id: &str) -> StoreResult<Option<Commit>> {
        Ok(read(&self.commits).get(id).cloned())
    }
}

impl BranchRegistry for MemoryStore {
    fn create_project(&self, project: &Project, default_branch: &Branch) -> StoreResult<Project> {
        let mut projects = write(&self.projects);
        if projects.contains_key(&project.id) {
            return Err(VersionError::already_exists("project", project.id.as_str()));
        }
        let mut branches = write(&self.branches);
        projects.insert(project.id.clone(), project.clone());
        branches.insert(
            branch_key(&project.id, &default_branch.id),
            default_branch.clone(),
        );
        Ok(project.clone())
    }

    fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(read(&self.projects).get(id).cloned())
    }

    fn create_branch(&self, branch: &Branch) -> StoreResult<Branch> {
        if !read(&self.projects).contains_key(&branch.project_id) {
            return Err(VersionError::not_found("project", branch.project_id.as_str()));
        }
        let mut branches = write(&self.branches);
        let key = branch_key(&branch.project_id, &branch.id);
        if branches.contains_key(&key) {
            return Err(VersionError::already_exists("branch", branch.id.as_str()));
        }
        if let Some(head) = &branch.head_commit {
            if !read(&self.commits).contains_key(head) {
                return Err(VersionError::not_found("commit", head.as_str()));
            }
        }
        branches.insert(key, branch.clone());
        Ok(branch.clone())
    }

    fn get_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<Option<Branch>> {
        Ok(read(&self.branches)
            .get(&branch_key(project_id, branch_id))
            .cloned())
    }

    fn list_branches(&self, project_id: &str) -> StoreResult<Vec<Branch>> {
        Ok(read(&self.branches)
            .values()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect())
    }

    fn delete_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<()> {
        write(&self.branches)
            .remove(&branch_key(project_id, branch_id))
            .map(|_| ())
            .ok_or_else(|| VersionError::not_found("branch", branch_id))
    }

    fn advance_head(
        &self,
        project_id: &str,
        branch_id: &str,
        expected: Option<&str>,
        new_head: &str,
    ) -> StoreResult<Branch> {
        let mut branches = write(&self.branches);
        check_head(&branches, project_id, branch_id, expected)?;
        if !read(&self.commits).contains_key(new_head) {
            return Err(VersionError::not_found("commit", new_head));
        }
        swap_head(&mut branches, project_id, branch_id, new_head)
    }
}

impl VersionStore for MemoryStore {
    fn record_commit(
        &self,
        snapshot: &Snapshot,
        commit: &Commit,
        branch_id: &str,
        expected: Option<&str>,
    ) -> StoreResult<Branch> {
        // Hold the branch lock for the whole write so a losing CAS leaves
        // nothing behind.
        let mut branches = write(&self.branches);
        check_head(&branches, &commit.project_id, branch_id, expected)?;

        let mut commits = write(&self.commits);
        let mut snapshots = write(&self.snapshots);
        let snapshot_exists = snapshots.contains_key(&snapshot.id) || snapshot.id == commit.snapshot_id;
        check_commit(commit, &commits, snapshot_exists)?;

        snapshots
            .entry(snapshot.id.clone())
            .or_insert_with(|| snapshot.clone());
        commits.insert(commit.id.clone(), commit.clone());
        swap_head(&mut branches, &commit.project_id, branch_id, &commit.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let project = Project {
            id: "guide".into(),
            author: "ada".into(),
            default_branch: "main".into(),
            created_at: Utc::now(),
        };
        store
            .create_project(&project, &Branch::new("guide", "main", None, None))
            .unwrap();
        store
    }

    fn root_commit(store: &MemoryStore, title: &str) -> Commit {
        let snapshot = store.put_snapshot(&Snapshot::new(&json!({"title": title}))).unwrap();
        store
            .put_commit(&Commit::new("guide", vec![], snapshot.id, "root", "ada"))
            .unwrap()
    }

    #[test]
    fn test_snapshot_dedup() {
        let store = MemoryStore::new();
        let a = store.put_snapshot(&Snapshot::new(&json!({"a": 1}))).unwrap();
        let b = store.put_snapshot(&Snapshot::new(&json!({"a": 1}))).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.snapshot_count(), 1);
    }

    #[test]
    fn test_put_commit_requires_parents_and_snapshot() {
        let store = seeded();
        let snapshot = store.put_snapshot(&Snapshot::new(&json!({}))).unwrap();
        let orphan = Commit::new("guide", vec!["missing".into()], snapshot.id.clone(), "m", "ada");
        assert!(matches!(
            store.put_commit(&orphan),
            Err(VersionError::NotFound { entity: "commit", .. })
        ));

        let no_snapshot = Commit::new("guide", vec![], "nope", "m", "ada");
        assert!(matches!(
            store.put_commit(&no_snapshot),
            Err(VersionError::NotFound { entity: "snapshot", .. })
        ));

        let ok = Commit::new("guide", vec![], snapshot.id, "m", "ada");
        store.put_commit(&ok).unwrap();
        assert!(matches!(
            store.put_commit(&ok),
            Err(VersionError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_advance_head_compare_and_swap() {
        let store = seeded();
        let first = root_commit(&store, "one");
        let second = root_commit(&store, "two");

        let branch = store.advance_head("guide", "main", None, &first.id).unwrap();
        assert_eq!(branch.head_commit.as_deref(), Some(first.id.as_str()));

        let stale = store.advance_head("guide", "main", None, &second.id);
        assert!(matches!(
            stale,
            Err(VersionError::ConcurrentModification { ref actual, .. })
                if actual.as_deref() == Some(first.id.as_str())
        ));

        store
            .advance_head("guide", "main", Some(&first.id), &second.id)
            .unwrap();
        assert!(matches!(
            store.advance_head("guide", "main", Some(&second.id), "ghost"),
            Err(VersionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_commit_is_all_or_nothing() {
        let store = seeded();
        let first = root_commit(&store, "one");
        store.advance_head("guide", "main", None, &first.id).unwrap();

        let snapshot = Snapshot::new(&json!({"title": "lost"}));
        let commit = Commit::new("guide", vec![first.id.clone()], snapshot.id.clone(), "m", "ada");
        let result = store.record_commit(&snapshot, &commit, "main", None);
        assert!(matches!(result, Err(VersionError::ConcurrentModification { .. })));
        assert!(store.get_commit(&commit.id).unwrap().is_none());
        assert!(store.get_snapshot(&snapshot.id).unwrap().is_none());

        let branch = store
            .record_commit(&snapshot, &commit, "main", Some(&first.id))
            .unwrap();
        assert_eq!(branch.head_commit.as_deref(), Some(commit.id.as_str()));
    }

    #[test]
    fn test_find_ancestors_follows_both_parents() {
        let store = seeded();
        let root = root_commit(&store, "root");
        let snap = root.snapshot_id.clone();
        let left = store
            .put_commit(&Commit::new("guide", vec![root.id.clone()], snap.clone(), "l", "ada"))
            .unwrap();
        let right = store
            .put_commit(&Commit::new("guide", vec![root.id.clone()], snap.clone(), "r", "ada"))
            .unwrap();
        let merge = store
            .put_commit(&Commit::new(
                "guide",
                vec![left.id.clone(), right.id.clone()],
                snap,
                "merge",
                "ada",
            ))
            .unwrap();

        let ancestors = store.find_ancestors(&merge.id).unwrap();
        assert_eq!(ancestors.len(), 4);
        assert!(ancestors.contains(&right.id));
        assert!(ancestors.contains(&root.id));
        assert!(matches!(
            store.find_ancestors("ghost"),
            Err(VersionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_branch_registry() {
        let store = seeded();
        let project = store.get_project("guide").unwrap().unwrap();
        assert!(matches!(
            store.create_project(&project, &Branch::new("guide", "main", None, None)),
            Err(VersionError::AlreadyExists { entity: "project", .. })
        ));

        assert!(matches!(
            store.create_branch(&Branch::new("guide", "feature", None, Some("ghost".into()))),
            Err(VersionError::NotFound { entity: "commit", .. })
        ));
        assert!(store.get_branch("guide", "feature").unwrap().is_none());

        store
            .create_branch(&Branch::new("guide", "feature", None, None))
            .unwrap();
        let names: Vec<String> = store
            .list_branches("guide")
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(names, vec!["feature", "main"]);

        store.delete_branch("guide", "feature").unwrap();
        assert!(store.delete_branch("guide", "feature").is_err());
    }
}
