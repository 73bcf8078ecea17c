//! Commit graph queries: merge bases, ancestry counts and history walks.

use std::collections::HashSet;

use tracing::debug;

use crate::errors::VersionError;
use crate::models::Commit;
use crate::store::CommitStore;

/// Find the merge base of two commits.
///
/// The merge base is a common ancestor that is not an ancestor of another
/// common ancestor. When criss-cross history leaves several such commits,
/// the most recently created one is chosen (ties broken by id). Returns
/// `None` for disjoint histories.
pub fn find_merge_base(
    store: &dyn CommitStore,
    a: &str,
    b: &str,
) -> Result<Option<String>, VersionError> {
    let ancestors_a = store.find_ancestors(a)?;
    if ancestors_a.contains(b) {
        return Ok(Some(b.to_string()));
    }
    let ancestors_b = store.find_ancestors(b)?;
    if ancestors_b.contains(a) {
        return Ok(Some(a.to_string()));
    }

    let common: HashSet<&String> = ancestors_a.intersection(&ancestors_b).collect();
    if common.is_empty() {
        debug!(a, b, "no common ancestor");
        return Ok(None);
    }

    // Every proper ancestor of a common commit is itself common, so the
    // dominated set is exactly the parents of common commits.
    let mut commits = Vec::with_capacity(common.len());
    let mut dominated: HashSet<String> = HashSet::new();
    for id in &common {
        let commit = load(store, id)?;
        dominated.extend(commit.parents.iter().cloned());
        commits.push(commit);
    }

    let base = commits
        .into_iter()
        .filter(|c| !dominated.contains(&c.id))
        .max_by(|x, y| x.created_at.cmp(&y.created_at).then_with(|| x.id.cmp(&y.id)))
        .map(|c| c.id);

    debug!(a, b, base = base.as_deref().unwrap_or("<none>"), "merge base resolved");
    Ok(base)
}

/// Counts of commits exclusive to each side: `(only_in_a, only_in_b)`.
pub fn ahead_behind(
    store: &dyn CommitStore,
    a: Option<&str>,
    b: Option<&str>,
) -> Result<(usize, usize), VersionError> {
    let ancestors_a = match a {
        Some(id) => store.find_ancestors(id)?,
        None => HashSet::new(),
    };
    let ancestors_b = match b {
        Some(id) => store.find_ancestors(id)?,
        None => HashSet::new(),
    };
    Ok((
        ancestors_a.difference(&ancestors_b).count(),
        ancestors_b.difference(&ancestors_a).count(),
    ))
}

/// First-parent history starting at `head`, newest first.
pub fn first_parent_history(
    store: &dyn CommitStore,
    head: &str,
    limit: Option<usize>,
) -> Result<Vec<Commit>, VersionError> {
    let mut history = Vec::new();
    let mut next = Some(head.to_string());
    while let Some(id) = next {
        if limit.is_some_and(|max| history.len() >= max) {
            break;
        }
        let commit = load(store, &id)?;
        next = commit.first_parent().map(str::to_string);
        history.push(commit);
    }
    Ok(history)
}

fn load(store: &dyn CommitStore, id: &str) -> Result<Commit, VersionError> {
    store
        .get_commit(id)?
        .ok_or_else(|| VersionError::not_found("commit", id))
}
