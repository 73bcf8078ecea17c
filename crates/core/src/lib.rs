//! guidevcs core library.
//!
//! A branch/commit/snapshot history store for structured JSON documents,
//! with structural diffs, three-way merge and explicit conflict resolution.
//! [`VersionManager`] is the public facade; the store traits let it run over
//! the SQLite [`Database`] or the in-memory [`MemoryStore`].

pub mod config;
pub mod conflict;
pub mod db;
pub mod diff;
pub mod document;
pub mod errors;
pub mod graph;
pub mod manager;
pub mod models;
pub mod store;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{Conflict, MergeOutcome, Resolution, ResolutionStrategy};
pub use db::Database;
pub use diff::{ChangeKind, DiffEntry};
pub use document::{DocPath, Document, PathSegment};
pub use errors::{ConfigError, StorageError, VersionError};
pub use manager::{MergeState, VersionManager};
pub use models::{Branch, BranchComparison, Commit, Project, ProjectOptions, Snapshot};
pub use store::{MemoryStore, VersionStore};
