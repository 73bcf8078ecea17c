//! Conflict detection, three-way merging, and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- comparing base→source and base→target diffs to find
//!    paths both sides changed differently.
//! 2. **Merging** -- overlaying non-conflicting source changes onto the target.
//! 3. **Resolution** -- applying caller-chosen values at conflicting paths.

pub mod detector;
pub mod merger;
pub mod resolver;

pub use detector::{Conflict, ConflictDetector, PathPartition};
pub use merger::{MergeOutcome, Merger};
pub use resolver::{ConflictResolver, Resolution, ResolutionStrategy};
