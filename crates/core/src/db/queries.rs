//! Typed queries for every table, exposed through the store traits.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use super::Database;
use crate::errors::{StorageError, VersionError};
use crate::models::{Branch, Commit, Project, Snapshot};
use crate::store::{BranchRegistry, CommitStore, SnapshotStore, StoreResult, VersionStore};

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn parse_time(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_time(&raw, column)
}

const PROJECT_COLUMNS: &str = "id, author, default_branch, created_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        author: row.get(1)?,
        default_branch: row.get(2)?,
        created_at: time_column(row, 3)?,
    })
}

const BRANCH_COLUMNS: &str =
    "id, project_id, name, description, head_commit, fork_point, created_at, updated_at";

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        head_commit: row.get(4)?,
        fork_point: row.get(5)?,
        created_at: time_column(row, 6)?,
        updated_at: time_column(row, 7)?,
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside a transaction)
// ---------------------------------------------------------------------------

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, VersionError> {
    let count: i64 = conn.query_row(sql, params![id], |row| row.get(0))?;
    Ok(count > 0)
}

pub(super) fn commit_exists(conn: &Connection, id: &str) -> Result<bool, VersionError> {
    exists(conn, "SELECT COUNT(*) FROM commits WHERE id = ?1", id)
}

pub(super) fn snapshot_exists(conn: &Connection, id: &str) -> Result<bool, VersionError> {
    exists(conn, "SELECT COUNT(*) FROM snapshots WHERE id = ?1", id)
}

fn project_exists(conn: &Connection, id: &str) -> Result<bool, VersionError> {
    exists(conn, "SELECT COUNT(*) FROM projects WHERE id = ?1", id)
}

fn load_branch(
    conn: &Connection,
    project_id: &str,
    branch_id: &str,
) -> Result<Option<Branch>, VersionError> {
    let sql = format!(
        "SELECT {} FROM branches WHERE project_id = ?1 AND id = ?2",
        BRANCH_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![project_id, branch_id], branch_from_row)
        .optional()?)
}

fn insert_branch_row(conn: &Connection, branch: &Branch) -> Result<(), VersionError> {
    conn.execute(
        "INSERT INTO branches (project_id, id, name, description, head_commit, fork_point, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            branch.project_id,
            branch.id,
            branch.name,
            branch.description,
            branch.head_commit,
            branch.fork_point,
            branch.created_at.to_rfc3339(),
            branch.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(super) fn insert_snapshot_row(conn: &Connection, snapshot: &Snapshot) -> Result<(), VersionError> {
    let data = serde_json::to_string(&snapshot.data)?;
    conn.execute(
        "INSERT OR IGNORE INTO snapshots (id, data, created_at) VALUES (?1, ?2, ?3)",
        params![snapshot.id, data, snapshot.created_at.to_rfc3339()],
    )?;
    Ok(())
}

fn load_snapshot(conn: &Connection, id: &str) -> Result<Option<Snapshot>, VersionError> {
    let row = conn
        .query_row(
            "SELECT id, data, created_at FROM snapshots WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, time_column(row, 2)?)),
        )
        .optional()?;

    let Some((id, raw, created_at)) = row else {
        return Ok(None);
    };
    let data = serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
        entity: "snapshot",
        id: id.clone(),
        detail: e.to_string(),
    })?;
    Ok(Some(Snapshot {
        id,
        data,
        created_at,
    }))
}

pub(super) fn insert_commit_row(conn: &Connection, commit: &Commit) -> Result<(), VersionError> {
    if commit_exists(conn, &commit.id)? {
        return Err(VersionError::already_exists("commit", commit.id.as_str()));
    }
    for parent in &commit.parents {
        if !commit_exists(conn, parent)? {
            return Err(VersionError::not_found("commit", parent.as_str()));
        }
    }
    if !snapshot_exists(conn, &commit.snapshot_id)? {
        return Err(VersionError::not_found("snapshot", commit.snapshot_id.as_str()));
    }

    conn.execute(
        "INSERT INTO commits (id, project_id, snapshot_id, message, author, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            commit.id,
            commit.project_id,
            commit.snapshot_id,
            commit.message,
            commit.author,
            commit.created_at.to_rfc3339(),
        ],
    )?;
    for (position, parent) in commit.parents.iter().enumerate() {
        conn.execute(
            "INSERT INTO commit_parents (commit_id, position, parent_id) VALUES (?1, ?2, ?3)",
            params![commit.id, position as i64, parent],
        )?;
    }
    debug!(commit = %commit.id, parents = commit.parents.len(), "inserted commit");
    Ok(())
}

fn load_commit(conn: &Connection, id: &str) -> Result<Option<Commit>, VersionError> {
    let row = conn
        .query_row(
            "SELECT id, project_id, snapshot_id, message, author, created_at FROM commits WHERE id = ?1",
            params![id],
            |row| {
                Ok(Commit {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    parents: Vec::new(),
                    snapshot_id: row.get(2)?,
                    message: row.get(3)?,
                    author: row.get(4)?,
                    created_at: time_column(row, 5)?,
                })
            },
        )
        .optional()?;

    let Some(mut commit) = row else {
        return Ok(None);
    };
    let mut stmt = conn
        .prepare("SELECT parent_id FROM commit_parents WHERE commit_id = ?1 ORDER BY position")?;
    commit.parents = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Some(commit))
}

/// Compare-and-swap a branch head. `head_commit IS ?` matches NULL too.
pub(super) fn swap_head(
    conn: &Connection,
    project_id: &str,
    branch_id: &str,
    expected: Option<&str>,
    new_head: &str,
) -> Result<Branch, VersionError> {
    if !commit_exists(conn, new_head)? {
        return Err(VersionError::not_found("commit", new_head));
    }

    let changed = conn.execute(
        "UPDATE branches SET head_commit = ?1, updated_at = ?2
         WHERE project_id = ?3 AND id = ?4 AND head_commit IS ?5",
        params![new_head, Utc::now().to_rfc3339(), project_id, branch_id, expected],
    )?;

    let branch = load_branch(conn, project_id, branch_id)?
        .ok_or_else(|| VersionError::not_found("branch", branch_id))?;
    if changed == 0 {
        warn!(
            branch = branch_id,
            expected = expected.unwrap_or("<none>"),
            actual = branch.head_commit.as_deref().unwrap_or("<none>"),
            "branch head moved, rejecting update"
        );
        return Err(VersionError::ConcurrentModification {
            branch: branch_id.to_string(),
            expected: expected.map(str::to_string),
            actual: branch.head_commit,
        });
    }
    Ok(branch)
}

// ---------------------------------------------------------------------------
// Store trait implementations
// ---------------------------------------------------------------------------

impl SnapshotStore for Database {
    fn put_snapshot(&self, snapshot: &Snapshot) -> StoreResult<Snapshot> {
        let conn = self.conn();
        insert_snapshot_row(&conn, snapshot)?;
        load_snapshot(&conn, &snapshot.id)?
            .ok_or_else(|| VersionError::not_found("snapshot", snapshot.id.as_str()))
    }

    fn get_snapshot(&self, id: &str) -> StoreResult<Option<Snapshot>> {
        load_snapshot(&self.conn(), id)
    }
}

impl CommitStore for Database {
    fn put_commit(&self, commit: &Commit) -> StoreResult<Commit> {
        self.transaction(|conn| insert_commit_row(conn, commit))?;
        Ok(commit.clone())
    }

    fn get_commit(&self, id: &str) -> StoreResult<Option<Commit>> {
        load_commit(&self.conn(), id)
    }

    fn find_ancestors(&self, id: &str) -> StoreResult<HashSet<String>> {
        let conn = self.conn();
        if !commit_exists(&conn, id)? {
            return Err(VersionError::not_found("commit", id));
        }
        let mut stmt = conn.prepare(
            "WITH RECURSIVE ancestry (id) AS (
                 SELECT ?1
                 UNION
                 SELECT commit_parents.parent_id
                 FROM commit_parents JOIN ancestry ON commit_parents.commit_id = ancestry.id
             )
             SELECT id FROM ancestry",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(ids)
    }
}

impl BranchRegistry for Database {
    fn create_project(&self, project: &Project, default_branch: &Branch) -> StoreResult<Project> {
        self.transaction(|conn| {
            if project_exists(conn, &project.id)? {
                return Err(VersionError::already_exists("project", project.id.as_str()));
            }
            conn.execute(
                "INSERT INTO projects (id, author, default_branch, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.id,
                    project.author,
                    project.default_branch,
                    project.created_at.to_rfc3339(),
                ],
            )?;
            insert_branch_row(conn, default_branch)
        })?;
        Ok(project.clone())
    }

    fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        Ok(self
            .conn()
            .query_row(&sql, params![id], project_from_row)
            .optional()?)
    }

    fn create_branch(&self, branch: &Branch) -> StoreResult<Branch> {
        self.transaction(|conn| {
            if !project_exists(conn, &branch.project_id)? {
                return Err(VersionError::not_found("project", branch.project_id.as_str()));
            }
            if load_branch(conn, &branch.project_id, &branch.id)?.is_some() {
                return Err(VersionError::already_exists("branch", branch.id.as_str()));
            }
            if let Some(head) = &branch.head_commit {
                if !commit_exists(conn, head)? {
                    return Err(VersionError::not_found("commit", head.as_str()));
                }
            }
            insert_branch_row(conn, branch)
        })?;
        Ok(branch.clone())
    }

    fn get_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<Option<Branch>> {
        load_branch(&self.conn(), project_id, branch_id)
    }

    fn list_branches(&self, project_id: &str) -> StoreResult<Vec<Branch>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM branches WHERE project_id = ?1 ORDER BY id",
            BRANCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let branches = stmt
            .query_map(params![project_id], branch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(branches)
    }

    fn delete_branch(&self, project_id: &str, branch_id: &str) -> StoreResult<()> {
        let changed = self.conn().execute(
            "DELETE FROM branches WHERE project_id = ?1 AND id = ?2",
            params![project_id, branch_id],
        )?;
        if changed == 0 {
            return Err(VersionError::not_found("branch", branch_id));
        }
        Ok(())
    }

    fn advance_head(
        &self,
        project_id: &str,
        branch_id: &str,
        expected: Option<&str>,
        new_head: &str,
    ) -> StoreResult<Branch> {
        swap_head(&self.conn(), project_id, branch_id, expected, new_head)
    }
}

impl VersionStore for Database {
    fn record_commit(
        &self,
        snapshot: &Snapshot,
        commit: &Commit,
        branch_id: &str,
        expected: Option<&str>,
    ) -> StoreResult<Branch> {
        self.transaction(|conn| {
            insert_snapshot_row(conn, snapshot)?;
            insert_commit_row(conn, commit)?;
            swap_head(conn, &commit.project_id, branch_id, expected, &commit.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let project = Project {
            id: "guide".into(),
            author: "ada".into(),
            default_branch: "main".into(),
            created_at: Utc::now(),
        };
        db.create_project(&project, &Branch::new("guide", "main", None, None))
            .unwrap();
        db
    }

    fn root_commit(db: &Database, title: &str) -> Commit {
        let snapshot = db.put_snapshot(&Snapshot::new(&json!({"title": title}))).unwrap();
        db.put_commit(&Commit::new("guide", vec![], snapshot.id, "root", "ada"))
            .unwrap()
    }

    #[test]
    fn test_project_round_trip() {
        let db = setup_db();
        let project = db.get_project("guide").unwrap().unwrap();
        assert_eq!(project.author, "ada");
        assert!(db.get_project("other").unwrap().is_none());

        let again = db.create_project(&project, &Branch::new("guide", "main", None, None));
        assert!(matches!(again, Err(VersionError::AlreadyExists { entity: "project", .. })));
    }

    #[test]
    fn test_snapshot_round_trip_and_dedup() {
        let db = setup_db();
        let doc = json!({"steps": [{"title": "A", "hotspot": {"x": 0.5, "y": 12}}], "published": true});
        let first = db.put_snapshot(&Snapshot::new(&doc)).unwrap();
        let second = db.put_snapshot(&Snapshot::new(&doc)).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.get_snapshot(&first.id).unwrap().unwrap().data, doc);
    }

    #[test]
    fn test_commit_round_trip_preserves_parent_order() {
        let db = setup_db();
        let a = root_commit(&db, "a");
        let b = root_commit(&db, "b");
        let merge = Commit::new("guide", vec![b.id.clone(), a.id.clone()], a.snapshot_id.clone(), "merge", "ada");
        db.put_commit(&merge).unwrap();

        let loaded = db.get_commit(&merge.id).unwrap().unwrap();
        assert_eq!(loaded, merge);
        assert_eq!(loaded.parents, vec![b.id, a.id]);
    }

    #[test]
    fn test_put_commit_rejects_missing_parent() {
        let db = setup_db();
        let a = root_commit(&db, "a");
        let bad = Commit::new("guide", vec!["ghost".into()], a.snapshot_id, "m", "ada");
        assert!(matches!(db.put_commit(&bad), Err(VersionError::NotFound { entity: "commit", .. })));
        assert!(db.get_commit(&bad.id).unwrap().is_none());
    }

    #[test]
    fn test_find_ancestors_recursive() {
        let db = setup_db();
        let root = root_commit(&db, "root");
        let child = Commit::new("guide", vec![root.id.clone()], root.snapshot_id.clone(), "c", "ada");
        db.put_commit(&child).unwrap();
        let ancestors = db.find_ancestors(&child.id).unwrap();
        assert_eq!(ancestors, HashSet::from([root.id.clone(), child.id.clone()]));
        assert!(matches!(db.find_ancestors("ghost"), Err(VersionError::NotFound { .. })));
    }

    #[test]
    fn test_advance_head_cas() {
        let db = setup_db();
        let first = root_commit(&db, "one");
        let second = root_commit(&db, "two");

        db.advance_head("guide", "main", None, &first.id).unwrap();
        let lost = db.advance_head("guide", "main", None, &second.id);
        assert!(matches!(lost, Err(VersionError::ConcurrentModification { .. })));

        let branch = db.advance_head("guide", "main", Some(&first.id), &second.id).unwrap();
        assert_eq!(branch.head_commit.as_deref(), Some(second.id.as_str()));

        assert!(matches!(
            db.advance_head("guide", "nope", None, &first.id),
            Err(VersionError::NotFound { entity: "branch", .. })
        ));
    }

    #[test]
    fn test_record_commit_rolls_back_on_lost_race() {
        let db = setup_db();
        let first = root_commit(&db, "one");
        db.advance_head("guide", "main", None, &first.id).unwrap();

        let snapshot = Snapshot::new(&json!({"title": "never stored"}));
        let commit = Commit::new("guide", vec![first.id.clone()], snapshot.id.clone(), "m", "ada");
        let result = db.record_commit(&snapshot, &commit, "main", None);
        assert!(matches!(result, Err(VersionError::ConcurrentModification { .. })));
        assert!(db.get_commit(&commit.id).unwrap().is_none());
        assert!(db.get_snapshot(&snapshot.id).unwrap().is_none());
    }

    #[test]
    fn test_branches_listing_and_delete() {
        let db = setup_db();
        let root = root_commit(&db, "root");
        db.create_branch(&Branch::new("guide", "feature", Some("try things".into()), Some(root.id.clone())))
            .unwrap();
        assert!(matches!(
            db.create_branch(&Branch::new("guide", "feature", None, None)),
            Err(VersionError::AlreadyExists { .. })
        ));
        assert!(matches!(
            db.create_branch(&Branch::new("guide", "ghost", None, Some("missing".into()))),
            Err(VersionError::NotFound { .. })
        ));

        let branches = db.list_branches("guide").unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].id, "feature");
        assert_eq!(branches[0].fork_point.as_deref(), Some(root.id.as_str()));
        assert_eq!(branches[0].description.as_deref(), Some("try things"));

        db.delete_branch("guide", "feature").unwrap();
        assert!(db.get_branch("guide", "feature").unwrap().is_none());
        assert!(db.delete_branch("guide", "feature").is_err());
    }
}
