//! Property normalization and merge-patch.

use kvg_types::Properties;
use serde_json::{Map, Value};

/// Normalize a single JSON value: `null` members of objects are dropped at
/// every depth. Array elements keep their positions.
///
/// Returns `None` when the value itself is `null`.
pub fn normalize_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| normalize_value(v).map(|v| (k.clone(), v)))
                .collect();
            Some(Value::Object(normalized))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| normalize_value(item).unwrap_or(Value::Null))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Normalize a property map; see [`normalize_value`].
pub fn normalize_properties(props: &Properties) -> Properties {
    props
        .iter()
        .filter_map(|(k, v)| normalize_value(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Apply `patch` over `base` at the top level.
///
/// Keys present in `patch` replace the corresponding key in `base`; a `null`
/// value removes the key. Keys absent from `patch` are kept. The result is
/// normalized.
pub fn merge_patch(base: &Properties, patch: &Properties) -> Properties {
    let mut merged = base.clone();
    for (key, value) in patch {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    normalize_properties(&merged)
}

/// Trim labels, drop empties and duplicates, keep first-seen order.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        let label = label.as_ref().trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}
