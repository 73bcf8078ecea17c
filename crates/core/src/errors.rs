//! Error types for the guidevcs core library.
//!
//! [`VersionError`] is the error every public engine operation returns. Its
//! variants mirror the taxonomy callers branch on: missing references,
//! duplicates, lost head races, merge conflicts, disjoint histories and bad
//! input. Storage backends report through [`StorageError`], and configuration
//! loading has its own [`ConfigError`].

use thiserror::Error;

use crate::conflict::Conflict;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Unified error type for version-control operations.
#[derive(Debug, Error)]
pub enum VersionError {
    /// A project, branch, commit or snapshot reference does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A project or branch id is already taken.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// The branch head moved between read and write.
    #[error(
        "branch '{branch}' was modified concurrently: expected head {}, found {}",
        display_head(.expected),
        display_head(.actual)
    )]
    ConcurrentModification {
        branch: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// The merge touched paths that both sides changed differently.
    #[error("merge has {} unresolved conflict(s): {}", .conflicts.len(), display_paths(.conflicts))]
    MergeConflict { conflicts: Vec<Conflict> },

    /// The two branches share no commit.
    #[error("branches '{source_branch}' and '{target_branch}' have no common ancestor")]
    NoCommonAncestor {
        source_branch: String,
        target_branch: String,
    },

    /// Malformed input, such as an incomplete resolution set.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VersionError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    /// True for the errors a caller is expected to recover from: a merge
    /// conflict (show the resolver) or a lost head race (re-read and retry).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MergeConflict { .. } | Self::ConcurrentModification { .. }
        )
    }

    /// The conflict list carried by a [`VersionError::MergeConflict`].
    pub fn conflicts(&self) -> Option<&[Conflict]> {
        match self {
            Self::MergeConflict { conflicts } => Some(conflicts),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for VersionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(err))
    }
}

impl From<serde_json::Error> for VersionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

fn display_head(head: &Option<String>) -> &str {
    head.as_deref().unwrap_or("<none>")
}

fn display_paths(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.path.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from the persistence backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored row could not be decoded.
    #[error("corrupt {entity} record '{id}': {detail}")]
    Corrupt {
        entity: &'static str,
        id: String,
        detail: String,
    },

    /// Document (de)serialization failed.
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error (e.g. creating the data directory).
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
