//! Database schema definitions and migration runner.
//!
//! Migrations are SQL batches keyed by version. SQLite's `user_version`
//! pragma records the last one applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StorageError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id              TEXT PRIMARY KEY,
            author          TEXT NOT NULL,
            default_branch  TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id          TEXT PRIMARY KEY,
            data        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commits (
            id           TEXT PRIMARY KEY,
            project_id   TEXT NOT NULL REFERENCES projects (id),
            snapshot_id  TEXT NOT NULL REFERENCES snapshots (id),
            message      TEXT NOT NULL DEFAULT '',
            author       TEXT NOT NULL DEFAULT '',
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_commits_project ON commits (project_id);

        CREATE TABLE IF NOT EXISTS commit_parents (
            commit_id   TEXT    NOT NULL REFERENCES commits (id),
            position    INTEGER NOT NULL,
            parent_id   TEXT    NOT NULL REFERENCES commits (id),
            PRIMARY KEY (commit_id, position)
        );

        CREATE TABLE IF NOT EXISTS branches (
            project_id   TEXT NOT NULL REFERENCES projects (id),
            id           TEXT NOT NULL,
            name         TEXT NOT NULL,
            description  TEXT,
            head_commit  TEXT REFERENCES commits (id),
            fork_point   TEXT REFERENCES commits (id),
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (project_id, id)
        );
        "#,
    ),
    (
        2,
        "parent lookup index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_commit_parents_parent ON commit_parents (parent_id);
        "#,
    ),
];

/// Bring `conn` up to the newest schema.
///
/// Each migration and its `user_version` bump commit together, so an
/// interrupted run resumes at the first unapplied version. A database written
/// by a newer build is refused.
pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    let applied = get_schema_version(conn)?;
    let latest = MIGRATIONS.last().map_or(0, |&(version, _, _)| version);
    if applied > latest {
        return Err(StorageError::MigrationFailed {
            version: applied,
            detail: format!("database schema is newer than this build (knows up to {})", latest),
        });
    }

    let pending: Vec<_> = MIGRATIONS.iter().filter(|m| m.0 > applied).collect();
    info!(applied, latest, pending = pending.len(), "checking database migrations");

    for &&(version, description, sql) in &pending {
        info!(version, description, "applying migration");
        let failed = |e: rusqlite::Error| StorageError::MigrationFailed {
            version,
            detail: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        set_schema_version(&tx, version)?;
        tx.commit().map_err(failed)?;
        debug!(version, "migration applied");
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, StorageError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StorageError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
