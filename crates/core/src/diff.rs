//! Structural diff between two documents.
//!
//! The diff walks both documents in lock-step and reports every leaf where
//! they differ. Objects are matched by key. Arrays are matched by position:
//! indices up to the shorter length are compared pairwise and the remaining
//! indices on the longer side become one-sided entries. Element identity is
//! not tracked, so an insertion near the front of an array shows up as a
//! change at every later index.
//!
//! Leaves are compared with [`same_value`], so a number written as `1` on one
//! side and `1.0` on the other is not a change.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{same_value, DocPath};

/// Kind of change recorded by a [`DiffEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// One differing leaf. `None` on a side means the path is absent there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: DocPath,
    pub left: Option<Value>,
    pub right: Option<Value>,
}

impl DiffEntry {
    pub fn kind(&self) -> ChangeKind {
        match (&self.left, &self.right) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }
}

/// Compute the leaf-level differences from `left` to `right`, sorted by path.
///
/// No entry's path is an ancestor of another's: a subtree that exists on one
/// side only is reported once, at its root.
pub fn diff(left: &Value, right: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    walk(left, right, DocPath::root(), &mut entries);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn walk(left: &Value, right: &Value, path: DocPath, out: &mut Vec<DiffEntry>) {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            for (key, lv) in l {
                match r.get(key) {
                    Some(rv) => walk(lv, rv, path.key(key), out),
                    None => out.push(entry(path.key(key), Some(lv), None)),
                }
            }
            for (key, rv) in r {
                if !l.contains_key(key) {
                    out.push(entry(path.key(key), None, Some(rv)));
                }
            }
        }
        (Value::Array(l), Value::Array(r)) => {
            let shared = l.len().min(r.len());
            for (i, (lv, rv)) in l.iter().zip(r.iter()).enumerate() {
                walk(lv, rv, path.index(i), out);
            }
            for (i, lv) in l.iter().enumerate().skip(shared) {
                out.push(entry(path.index(i), Some(lv), None));
            }
            for (i, rv) in r.iter().enumerate().skip(shared) {
                out.push(entry(path.index(i), None, Some(rv)));
            }
        }
        _ if same_value(left, right) => {}
        _ => out.push(entry(path, Some(left), Some(right))),
    }
}

fn entry(path: DocPath, left: Option<&Value>, right: Option<&Value>) -> DiffEntry {
    DiffEntry {
        path,
        left: left.cloned(),
        right: right.cloned(),
    }
}
