//! Path-level diff: compare two property bags.
//!
//! Property bags are compared after normalization. Nested objects recurse to
//! their leaves; arrays and scalars are leaves. Each change is addressed by a
//! JSON pointer (RFC 6901), e.g. `/address/city`.

use std::collections::BTreeSet;

use kvg_types::Properties;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::normalize::normalize_properties;

/// The result of comparing two property bags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PropertyDiff {
    /// Changes ordered by path.
    pub changes: Vec<PropertyChange>,
}

impl PropertyDiff {
    /// Returns `true` if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// The changed paths as a set.
    pub fn paths(&self) -> BTreeSet<String> {
        self.changes.iter().map(|c| c.path().to_string()).collect()
    }

    /// Number of added leaves.
    pub fn additions(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, PropertyChange::Added { .. }))
            .count()
    }

    /// Number of removed leaves.
    pub fn removals(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, PropertyChange::Removed { .. }))
            .count()
    }

    /// Number of modified leaves.
    pub fn modifications(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, PropertyChange::Modified { .. }))
            .count()
    }
}

/// A single leaf-level change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PropertyChange {
    Added { path: String, value: Value },
    Removed { path: String, value: Value },
    Modified { path: String, old: Value, new: Value },
}

impl PropertyChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } | Self::Modified { path, .. } => {
                path
            }
        }
    }
}

/// Compute the diff between two property bags.
///
/// Pure and order-independent: the same pair of bags always yields the same
/// changes, whatever order their keys were inserted in.
pub fn diff_properties(old: &Properties, new: &Properties) -> PropertyDiff {
    let old: Map<String, Value> = normalize_properties(old).into_iter().collect();
    let new: Map<String, Value> = normalize_properties(new).into_iter().collect();

    let mut changes = Vec::new();
    diff_maps("", &old, &new, &mut changes);
    changes.sort_by(|a, b| a.path().cmp(b.path()));
    PropertyDiff { changes }
}

/// Escape one pointer segment: `~` becomes `~0`, `/` becomes `~1`.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn diff_maps(
    prefix: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    out: &mut Vec<PropertyChange>,
) {
    for (key, old_val) in old {
        let path = format!("{prefix}/{}", escape_segment(key));
        match new.get(key) {
            Some(new_val) if new_val == old_val => {}
            Some(Value::Object(new_map)) if old_val.is_object() => {
                if let Value::Object(old_map) = old_val {
                    diff_maps(&path, old_map, new_map, out);
                }
            }
            Some(new_val) => out.push(PropertyChange::Modified {
                path,
                old: old_val.clone(),
                new: new_val.clone(),
            }),
            None => collect_leaves(&path, old_val, &mut |path, value| {
                out.push(PropertyChange::Removed { path, value })
            }),
        }
    }

    for (key, new_val) in new {
        if old.contains_key(key) {
            continue;
        }
        let path = format!("{prefix}/{}", escape_segment(key));
        collect_leaves(&path, new_val, &mut |path, value| {
            out.push(PropertyChange::Added { path, value })
        });
    }
}

fn collect_leaves(path: &str, value: &Value, emit: &mut dyn FnMut(String, Value)) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let child_path = format!("{path}/{}", escape_segment(key));
                collect_leaves(&child_path, child, emit);
            }
        }
        leaf => emit(path.to_string(), leaf.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected object"),
        }
    }

    fn paths(diff: &PropertyDiff) -> Vec<String> {
        diff.paths().into_iter().collect()
    }

    #[test]
    fn identical_bags_have_no_diff() {
        let p = props(json!({"a": 1, "b": {"c": "x"}}));
        assert!(diff_properties(&p, &p).is_empty());
    }

    #[test]
    fn creation_reports_every_leaf() {
        let new = props(json!({"title": "T", "address": {"city": "Oslo", "zip": "0150"}}));
        let diff = diff_properties(&Properties::new(), &new);
        assert_eq!(
            paths(&diff),
            vec!["/address/city", "/address/zip", "/title"]
        );
        assert_eq!(diff.additions(), 3);
    }

    #[test]
    fn nested_modification_is_leaf_addressed() {
        let old = props(json!({"address": {"city": "Oslo", "zip": "0150"}}));
        let new = props(json!({"address": {"city": "Bergen", "zip": "0150"}}));
        let diff = diff_properties(&old, &new);
        assert_eq!(paths(&diff), vec!["/address/city"]);
        assert_eq!(diff.modifications(), 1);
    }

    #[test]
    fn arrays_are_leaves() {
        let old = props(json!({"tags": [1, 2]}));
        let new = props(json!({"tags": [1, 2, 3]}));
        assert_eq!(paths(&diff_properties(&old, &new)), vec!["/tags"]);
    }

    #[test]
    fn type_change_is_a_modification() {
        let old = props(json!({"x": {"a": 1}}));
        let new = props(json!({"x": 5}));
        let diff = diff_properties(&old, &new);
        assert_eq!(paths(&diff), vec!["/x"]);
        assert_eq!(diff.modifications(), 1);
    }

    #[test]
    fn removal_reports_leaves() {
        let old = props(json!({"keep": true, "gone": {"a": 1, "b": 2}}));
        let new = props(json!({"keep": true}));
        let diff = diff_properties(&old, &new);
        assert_eq!(paths(&diff), vec!["/gone/a", "/gone/b"]);
        assert_eq!(diff.removals(), 2);
    }

    #[test]
    fn null_equals_absent() {
        let old = props(json!({"a": 1}));
        let new = props(json!({"a": 1, "b": null}));
        assert!(diff_properties(&old, &new).is_empty());
    }

    #[test]
    fn segments_are_escaped() {
        let new = props(json!({"a/b": 1, "c~d": 2}));
        assert_eq!(
            paths(&diff_properties(&Properties::new(), &new)),
            vec!["/a~1b", "/c~0d"]
        );
    }

    #[test]
    fn empty_object_is_a_leaf() {
        let new = props(json!({"meta": {}}));
        assert_eq!(paths(&diff_properties(&Properties::new(), &new)), vec!["/meta"]);
    }

    proptest! {
        #[test]
        fn diff_is_independent_of_insertion_order(
            old in proptest::collection::btree_map("[a-d]", 0i64..4, 0..5),
            new in proptest::collection::btree_map("[a-d]", 0i64..4, 0..5),
        ) {
            let to_props = |m: &std::collections::BTreeMap<String, i64>, rev: bool| -> Properties {
                let mut entries: Vec<_> = m.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                if rev {
                    entries.reverse();
                }
                entries.into_iter().collect()
            };
            let forward = diff_properties(&to_props(&old, false), &to_props(&new, false));
            let backward = diff_properties(&to_props(&old, true), &to_props(&new, true));
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn diff_paths_are_symmetric(
            old in proptest::collection::btree_map("[a-d]", 0i64..4, 0..5),
            new in proptest::collection::btree_map("[a-d]", 0i64..4, 0..5),
        ) {
            let old: Properties = old.into_iter().map(|(k, v)| (k, json!(v))).collect();
            let new: Properties = new.into_iter().map(|(k, v)| (k, json!(v))).collect();
            prop_assert_eq!(
                diff_properties(&old, &new).paths(),
                diff_properties(&new, &old).paths()
            );
        }
    }
}
