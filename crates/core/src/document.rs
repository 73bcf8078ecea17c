//! Authored documents and path addressing.
//!
//! A document is a closed recursive value (`null`, bool, number, string,
//! array, object) represented by [`serde_json::Value`]. Object keys are kept
//! in sorted order, so the compact JSON encoding of a document is canonical
//! and can be hashed to identify its content.
//!
//! A [`DocPath`] addresses a node inside a document as a sequence of object
//! keys and array indices. It displays as `steps.0.title` and serializes as
//! `["steps", 0, "title"]`, which keeps key `"0"` and index `0` distinct.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// An authored guide document (steps, variables, metadata, ...).
pub type Document = Value;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step of a [`DocPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Position inside an array.
    Index(usize),
    /// Key inside an object.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Key(k) => write!(f, "{}", k),
        }
    }
}

/// Location of a node inside a document. The empty path is the root.
///
/// Paths order lexicographically by segment, so every extension of a path
/// sorts directly after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(Vec<PathSegment>);

impl DocPath {
    /// The root path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path such as `steps.0.title`.
    ///
    /// All-digit segments become array indices. Use [`DocPath::from_segments`]
    /// to address an object key made of digits.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        let segments = dotted
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(index) if part.bytes().all(|b| b.is_ascii_digit()) => PathSegment::Index(index),
                _ => PathSegment::Key(part.to_string()),
            })
            .collect();
        Self(segments)
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by an object key.
    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    /// This path extended by an array index.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &DocPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True if one path is a proper ancestor of the other.
    pub fn overlaps(&self, other: &DocPath) -> bool {
        self != other && (self.starts_with(other) || other.starts_with(self))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for DocPath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

// ---------------------------------------------------------------------------
// Path access
// ---------------------------------------------------------------------------

/// Read the node at `path`, if present.
pub fn get_at<'a>(doc: &'a Value, path: &DocPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(doc, |node, segment| match (node, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key),
            (Value::Array(items), PathSegment::Index(i)) => items.get(*i),
            _ => None,
        })
}

/// Write `value` at `path`, creating intermediate containers as needed.
///
/// A node whose kind does not match the next segment (a string where an
/// object key is expected, say) is replaced by an empty container. Writing an
/// array index at or past the end appends.
pub fn set_at(doc: &mut Value, path: &DocPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *doc = value;
        return;
    };

    let mut cursor = doc;
    for (i, segment) in parents.iter().enumerate() {
        let next = parents.get(i + 1).unwrap_or(last);
        cursor = child_or_insert(cursor, segment, next);
    }

    ensure_container(cursor, last);
    match (cursor, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
        }
        (Value::Array(items), PathSegment::Index(i)) => {
            if *i < items.len() {
                items[*i] = value;
            } else {
                items.push(value);
            }
        }
        _ => {}
    }
}

/// Remove the node at `path`, returning it. Removing an array element shifts
/// the elements after it. Removing the root leaves `null` behind.
pub fn remove_at(doc: &mut Value, path: &DocPath) -> Option<Value> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Some(std::mem::take(doc));
    };

    let mut cursor = doc;
    for segment in parents {
        cursor = match (cursor, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }

    match (cursor, last) {
        (Value::Object(map), PathSegment::Key(key)) => map.remove(key),
        (Value::Array(items), PathSegment::Index(i)) if *i < items.len() => Some(items.remove(*i)),
        _ => None,
    }
}

/// Deep equality with numbers compared by value, so `1` and `1.0` match.
///
/// Integers are compared exactly; the `f64` comparison only applies when at
/// least one side is a float.
pub fn same_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l == r
                || ((l.is_f64() || r.is_f64())
                    && matches!((l.as_f64(), r.as_f64()), (Some(a), Some(b)) if a == b))
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| same_value(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(key, a)| r.get(key).is_some_and(|b| same_value(a, b)))
        }
        _ => left == right,
    }
}

/// [`same_value`] over optional slots; two absent slots match.
pub fn same_slot(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => same_value(l, r),
        (None, None) => true,
        _ => false,
    }
}

/// SHA-256 of the canonical JSON encoding, hex encoded.
///
/// The hash follows the encoding, not [`same_value`]: documents that differ
/// only in number spelling (`1` vs `1.0`) get different ids.
pub fn content_hash(doc: &Value) -> String {
    let encoded = doc.to_string();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

fn empty_container_for(segment: &PathSegment) -> Value {
    match segment {
        PathSegment::Key(_) => Value::Object(Map::new()),
        PathSegment::Index(_) => Value::Array(Vec::new()),
    }
}

fn ensure_container(node: &mut Value, segment: &PathSegment) {
    let fits = matches!(
        (&*node, segment),
        (Value::Object(_), PathSegment::Key(_)) | (Value::Array(_), PathSegment::Index(_))
    );
    if !fits {
        *node = empty_container_for(segment);
    }
}

fn child_or_insert<'a>(node: &'a mut Value, segment: &PathSegment, next: &PathSegment) -> &'a mut Value {
    ensure_container(node, segment);
    match (node, segment) {
        (Value::Object(map), PathSegment::Key(key)) => map
            .entry(key.clone())
            .or_insert_with(|| empty_container_for(next)),
        (Value::Array(items), PathSegment::Index(i)) => {
            if *i >= items.len() {
                items.push(empty_container_for(next));
                let end = items.len() - 1;
                &mut items[end]
            } else {
                &mut items[*i]
            }
        }
        (node, _) => node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let path = DocPath::parse("steps.0.title");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("steps".into()),
                PathSegment::Index(0),
                PathSegment::Key("title".into()),
            ]
        );
        assert_eq!(path.to_string(), "steps.0.title");
        assert!(DocPath::parse("").is_root());
    }

    #[test]
    fn test_path_serializes_as_segment_array() {
        let path = DocPath::parse("steps.2.title");
        let encoded = serde_json::to_value(&path).unwrap();
        assert_eq!(encoded, json!(["steps", 2, "title"]));

        let decoded: DocPath = serde_json::from_value(json!(["vars", "0"])).unwrap();
        assert_eq!(decoded.segments()[1], PathSegment::Key("0".into()));
    }

    #[test]
    fn test_ordering_keeps_extensions_adjacent() {
        let mut paths = vec![
            DocPath::parse("steps.1"),
            DocPath::parse("title"),
            DocPath::parse("steps.0.title"),
            DocPath::parse("steps.0"),
            DocPath::parse("steps.10"),
        ];
        paths.sort();
        let shown: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(shown, vec!["steps.0", "steps.0.title", "steps.1", "steps.10", "title"]);
    }

    #[test]
    fn test_overlaps() {
        let parent = DocPath::parse("steps.0");
        let child = DocPath::parse("steps.0.title");
        assert!(parent.overlaps(&child));
        assert!(child.overlaps(&parent));
        assert!(!child.overlaps(&child));
        assert!(!DocPath::parse("steps.1").overlaps(&child));
    }

    #[test]
    fn test_get_at() {
        let doc = json!({"steps": [{"title": "A"}], "meta": {"lang": "en"}});
        assert_eq!(get_at(&doc, &DocPath::parse("steps.0.title")), Some(&json!("A")));
        assert_eq!(get_at(&doc, &DocPath::parse("meta.lang")), Some(&json!("en")));
        assert_eq!(get_at(&doc, &DocPath::parse("steps.3")), None);
        assert_eq!(get_at(&doc, &DocPath::parse("meta.lang.x")), None);
        assert_eq!(get_at(&doc, &DocPath::root()), Some(&doc));
    }

    #[test]
    fn test_set_at_creates_intermediate_containers() {
        let mut doc = json!({});
        set_at(&mut doc, &DocPath::parse("steps.0.title"), json!("First"));
        assert_eq!(doc, json!({"steps": [{"title": "First"}]}));

        set_at(&mut doc, &DocPath::parse("steps.0.title"), json!("Renamed"));
        set_at(&mut doc, &DocPath::parse("steps.5"), json!({"title": "Appended"}));
        assert_eq!(
            doc,
            json!({"steps": [{"title": "Renamed"}, {"title": "Appended"}]})
        );
    }

    #[test]
    fn test_set_at_replaces_mismatched_node() {
        let mut doc = json!({"meta": "plain"});
        set_at(&mut doc, &DocPath::parse("meta.lang"), json!("fr"));
        assert_eq!(doc, json!({"meta": {"lang": "fr"}}));

        set_at(&mut doc, &DocPath::root(), json!(42));
        assert_eq!(doc, json!(42));
    }

    #[test]
    fn test_remove_at() {
        let mut doc = json!({"steps": ["a", "b", "c"], "meta": {"lang": "en"}});
        assert_eq!(remove_at(&mut doc, &DocPath::parse("steps.1")), Some(json!("b")));
        assert_eq!(remove_at(&mut doc, &DocPath::parse("meta.lang")), Some(json!("en")));
        assert_eq!(remove_at(&mut doc, &DocPath::parse("meta.missing")), None);
        assert_eq!(remove_at(&mut doc, &DocPath::parse("steps.9")), None);
        assert_eq!(doc, json!({"steps": ["a", "c"], "meta": {}}));
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": [true, null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": [true, null], "b": 1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&json!({"a": [true], "b": 1})));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn test_same_value_compares_numbers_by_value() {
        assert!(same_value(&json!({"x": [1, {"y": 2}]}), &json!({"x": [1.0, {"y": 2.0}]})));
        assert!(!same_value(&json!(1), &json!(1.5)));
        assert!(!same_value(&json!(1), &json!("1")));
        assert!(!same_value(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!same_value(&json!(9007199254740993u64), &json!(9007199254740992u64)));
        assert!(same_slot(None, None));
        assert!(!same_slot(Some(&json!(null)), None));
    }

}
