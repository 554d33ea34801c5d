//! Dotted-path access over JSON values.
//!
//! Request envelopes, object configs and state deltas are all addressed by
//! dotted keys (`params._parent`, `devs.d1`). These helpers resolve such
//! paths against a [`serde_json::Value`] without intermediate allocations,
//! and `set` builds the nested objects a path implies.

use serde_json::{Map, Value};

/// Resolve a dotted path to a reference into `root`. Returns `None` when any
/// segment is missing or a non-object is traversed.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Resolve a dotted path to a string. Non-string values resolve to `None`.
pub fn get_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path).and_then(Value::as_str)
}

/// Set a dotted path inside `root`, creating intermediate objects as needed.
/// Non-object values along the way are replaced.
pub fn set(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }

    let mut cur = root;
    let mut segs = path.split('.').peekable();
    while let Some(seg) = segs.next() {
        let map = cur.as_object_mut().expect("cursor is always an object");
        if segs.peek().is_none() {
            map.insert(seg.to_string(), value);
            return;
        }
        let next = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            *next = Value::Object(Map::new());
        }
        cur = next;
    }
}
