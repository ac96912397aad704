// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The path-addressed, deep-cloning, mutation-tracked state store every
//! primitive reads from and writes to.
//!
//! Values are stored as a [`serde_json::Value`] tree. Reads and writes
//! always copy in/out so that no caller ever holds a reference into the
//! store's interior — the deep-isolation property tested in
//! `tests/property_tests.rs`, carried forward here as
//! `proptest` cases in this crate's own test suite.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Default capacity of the mutation-log ring buffer.
pub const DEFAULT_MUTATION_CAPACITY: usize = 1_000;

/// One recorded write against the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    /// When the write committed.
    pub timestamp: DateTime<Utc>,
    /// What kind of write this was.
    pub operation: Operation,
    /// Dot/bracket path the write targeted (empty string for whole-tree ops).
    pub path: String,
    /// Value at `path` immediately before the write, if any.
    pub old_value: Option<Value>,
    /// Value at `path` immediately after the write, if any.
    pub new_value: Option<Value>,
}

/// The kind of mutation recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `StateStore::set`
    Set,
    /// `StateStore::delete`
    Delete,
    /// `StateStore::merge`
    Merge,
    /// `StateStore::clear`
    Clear,
    /// `StateStore::restore_snapshot`
    Restore,
}

/// An atomic point-in-time copy of the whole state tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Deep clone of the root value at that time.
    pub state: Value,
    /// Number of mutations recorded at the time the snapshot was taken.
    pub mutation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Splits a dotted/bracketed path (`users.3.email`, `items[0].name`) into
/// segments, treating bracket contents as array indices when numeric and as
/// object keys otherwise.
fn parse_path(path: &str) -> Vec<Segment> {
    if path.is_empty() {
        return Vec::new();
    }
    let normalized = path.replace('[', ".").replace(']', "");
    normalized
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|tok| {
            let tok = tok.trim_matches(|c| c == '"' || c == '\'');
            if is_all_digits(tok) {
                Segment::Index(tok.parse().unwrap_or(0))
            } else {
                Segment::Key(tok.to_string())
            }
        })
        .collect()
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap())
}

fn strip_state_prefix(expr: &str) -> &str {
    expr.strip_prefix("state.").unwrap_or(expr)
}

/// Stringifies a value the way template interpolation should: strings pass
/// through unquoted, everything else gets JSON-rendered.
fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The state store.
///
/// Cloning a `StateStore` handle is cheap (it's backed by an internal
/// `Arc`-free `Mutex` that the caller is expected to hold behind their own
/// `Arc`, matching how the dispatcher shares one store across every
/// primitive it owns).
pub struct StateStore {
    root: Mutex<Value>,
    mutations: Mutex<VecDeque<Mutation>>,
    capacity: usize,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// A fresh, empty store with the default mutation-log capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MUTATION_CAPACITY)
    }

    /// A fresh, empty store with a caller-chosen mutation-log capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            root: Mutex::new(Value::Object(serde_json::Map::new())),
            mutations: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Seeds the store from an initial object, e.g. the `state` option
    /// passed to `UnifiedExecutor::run`. Does not log a mutation — seeding
    /// happens before a run's history starts.
    pub fn seed(&self, values: impl IntoIterator<Item = (String, Value)>) {
        let mut root = self.root.lock();
        if let Value::Object(map) = &mut *root {
            for (k, v) in values {
                map.insert(k, v);
            }
        }
    }

    fn record(&self, operation: Operation, path: String, old: Option<Value>, new: Option<Value>) {
        let mut log = self.mutations.lock();
        if log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(Mutation {
            timestamp: Utc::now(),
            operation,
            path,
            old_value: old,
            new_value: new,
        });
    }

    /// Deep-cloned value at `path`, or `None` if any segment is missing.
    /// An empty path returns the whole tree.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = parse_path(path);
        let root = self.root.lock();
        let mut cur = &*root;
        for seg in &segments {
            cur = match (seg, cur) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(cur.clone())
    }

    /// True iff every segment of `path` resolves to an own property. The
    /// value at that property may itself be `null`.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        let segments = parse_path(path);
        if segments.is_empty() {
            return true;
        }
        let root = self.root.lock();
        let mut cur = &*root;
        for (idx, seg) in segments.iter().enumerate() {
            let found = match (seg, cur) {
                (Segment::Key(k), Value::Object(map)) => map.get(k),
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i),
                _ => None,
            };
            match found {
                Some(v) => cur = v,
                None => return false,
            }
            if idx == segments.len() - 1 {
                return true;
            }
        }
        true
    }

    /// Deep clone of the entire tree.
    #[must_use]
    pub fn get_all(&self) -> Value {
        self.root.lock().clone()
    }

    /// Autovivifying write of `value` at `path`. Missing intermediate
    /// containers are created as an array when the *next* segment is an
    /// all-digits token, otherwise as an object.
    pub fn set(&self, path: &str, value: Value) {
        let segments = parse_path(path);
        let old = self.get(path);
        let mut root = self.root.lock();
        if segments.is_empty() {
            *root = value.clone();
        } else {
            set_at(&mut root, &segments, value.clone());
        }
        drop(root);
        self.record(Operation::Set, path.to_string(), old, Some(value));
    }

    /// Removes the leaf named by `path`. For an array whose last segment is
    /// numeric, splices the element out (preserving order of the rest)
    /// rather than leaving a hole.
    pub fn delete(&self, path: &str) {
        let segments = parse_path(path);
        if segments.is_empty() {
            return;
        }
        let old = self.get(path);
        let mut root = self.root.lock();
        delete_at(&mut root, &segments);
        drop(root);
        self.record(Operation::Delete, path.to_string(), old, None);
    }

    /// Shallow-merges `object`'s keys into the object at `path` (root if
    /// `path` is empty). Returns `false` (and does not write) if the
    /// existing value at `path` is present and not an object.
    pub fn merge(&self, path: &str, object: &Value) -> bool {
        let Value::Object(incoming) = object else {
            return false;
        };
        let segments = parse_path(path);
        let old = self.get(path);
        let mut root = self.root.lock();
        let target = if segments.is_empty() {
            Some(&mut *root)
        } else {
            navigate_autoviv(&mut root, &segments)
        };
        let Some(target) = target else { return false };
        match target {
            Value::Null => {
                *target = Value::Object(incoming.clone());
            }
            Value::Object(map) => {
                for (k, v) in incoming {
                    map.insert(k.clone(), v.clone());
                }
            }
            _ => return false,
        }
        let new = self.get(path);
        drop(root);
        self.record(Operation::Merge, path.to_string(), old, new);
        true
    }

    /// Resets the whole tree to an empty object.
    pub fn clear(&self) {
        let old = self.get_all();
        let mut root = self.root.lock();
        *root = Value::Object(serde_json::Map::new());
        drop(root);
        self.record(Operation::Clear, String::new(), Some(old), None);
    }

    /// An atomic deep copy of the whole tree plus a mutation-count marker.
    #[must_use]
    pub fn create_snapshot(&self) -> Snapshot {
        let state = self.root.lock().clone();
        let mutation_count = self.mutations.lock().len();
        Snapshot {
            timestamp: Utc::now(),
            state,
            mutation_count,
        }
    }

    /// Restores the whole tree from `snapshot` as a single atomic write.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) {
        let old = self.get_all();
        let mut root = self.root.lock();
        *root = snapshot.state.clone();
        drop(root);
        self.record(
            Operation::Restore,
            String::new(),
            Some(old),
            Some(snapshot.state.clone()),
        );
    }

    /// The most recent `limit` mutations, newest last.
    #[must_use]
    pub fn get_mutation_history(&self, limit: usize) -> Vec<Mutation> {
        let log = self.mutations.lock();
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    /// Replaces every `{{expr}}` occurrence in `s` with the stringified
    /// result of `get(expr)` (after stripping a leading `state.` prefix
    /// from `expr`). References that don't resolve are left verbatim.
    #[must_use]
    pub fn resolve_template(&self, s: &str) -> String {
        if !s.contains("{{") {
            return s.to_string();
        }
        template_regex()
            .replace_all(s, |caps: &regex::Captures<'_>| {
                let expr = strip_state_prefix(caps[1].trim());
                match self.get(expr) {
                    Some(v) => stringify(&v),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Recursively expands string templates nested arbitrarily deep inside
    /// arrays and objects. Non-plain, non-string values pass through
    /// untouched.
    #[must_use]
    pub fn resolve_templates(&self, v: &Value) -> Value {
        match v {
            Value::String(s) => Value::String(self.resolve_template(s)),
            Value::Array(arr) => Value::Array(arr.iter().map(|x| self.resolve_templates(x)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_templates(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn navigate_autoviv<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    let mut cur = root;
    for (i, seg) in segments.iter().enumerate() {
        let next_is_index_container = segments
            .get(i + 1)
            .map(|s| matches!(s, Segment::Index(_)))
            .unwrap_or(false);
        match seg {
            Segment::Key(k) => {
                if !cur.is_object() {
                    *cur = Value::Object(serde_json::Map::new());
                }
                let map = cur.as_object_mut().unwrap();
                let entry = map.entry(k.clone()).or_insert_with(|| {
                    if next_is_index_container {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(serde_json::Map::new())
                    }
                });
                cur = entry;
            }
            Segment::Index(idx) => {
                if !cur.is_array() {
                    *cur = Value::Array(Vec::new());
                }
                let arr = cur.as_array_mut().unwrap();
                while arr.len() <= *idx {
                    arr.push(if next_is_index_container {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(serde_json::Map::new())
                    });
                }
                cur = &mut arr[*idx];
            }
        }
    }
    Some(cur)
}

fn set_at(root: &mut Value, segments: &[Segment], value: Value) {
    if let Some(slot) = navigate_autoviv(root, segments) {
        *slot = value;
    }
}

fn delete_at(root: &mut Value, segments: &[Segment]) {
    if segments.is_empty() {
        return;
    }
    let (last, parents) = segments.split_last().unwrap();
    let mut cur = root;
    for seg in parents {
        let next = match seg {
            Segment::Key(k) => cur.as_object_mut().and_then(|m| m.get_mut(k)),
            Segment::Index(i) => cur.as_array_mut().and_then(|a| a.get_mut(*i)),
        };
        match next {
            Some(v) => cur = v,
            None => return,
        }
    }
    match last {
        Segment::Key(k) => {
            if let Some(map) = cur.as_object_mut() {
                map.remove(k);
            }
        }
        Segment::Index(i) => {
            if let Some(arr) = cur.as_array_mut() {
                if *i < arr.len() {
                    arr.remove(*i);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_roundtrip_dotted_path() {
        let store = StateStore::new();
        store.set("users.0.email", json!("a@example.com"));
        assert_eq!(store.get("users.0.email"), Some(json!("a@example.com")));
        assert!(store.has("users.0.email"));
        assert!(store.has("users"));
    }

    #[test]
    fn bracket_and_dot_paths_are_equivalent() {
        let store = StateStore::new();
        store.set("items[0].name", json!("widget"));
        assert_eq!(store.get("items.0.name"), Some(json!("widget")));
    }

    #[test]
    fn autovivification_creates_array_for_numeric_next_segment() {
        let store = StateStore::new();
        store.set("a.0.b", json!(1));
        let all = store.get_all();
        assert!(all["a"].is_array());
    }

    #[test]
    fn autovivification_creates_object_for_non_numeric_next_segment() {
        let store = StateStore::new();
        store.set("a.b.c", json!(1));
        let all = store.get_all();
        assert!(all["a"].is_object());
    }

    #[test]
    fn missing_path_returns_none() {
        let store = StateStore::new();
        assert_eq!(store.get("nope.nope"), None);
        assert!(!store.has("nope.nope"));
    }

    #[test]
    fn delete_from_array_splices() {
        let store = StateStore::new();
        store.set("xs", json!([1, 2, 3]));
        store.delete("xs.1");
        assert_eq!(store.get("xs"), Some(json!([1, 3])));
    }

    #[test]
    fn delete_object_key_removes_it() {
        let store = StateStore::new();
        store.set("a.b", json!(1));
        store.delete("a.b");
        assert!(!store.has("a.b"));
    }

    #[test]
    fn merge_shallow_merges_object() {
        let store = StateStore::new();
        store.set("cfg", json!({"a": 1, "b": 2}));
        assert!(store.merge("cfg", &json!({"b": 3, "c": 4})));
        assert_eq!(store.get("cfg"), Some(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn merge_fails_on_non_object_target() {
        let store = StateStore::new();
        store.set("cfg", json!(5));
        assert!(!store.merge("cfg", &json!({"b": 3})));
    }

    #[test]
    fn clear_resets_root_and_logs_mutation() {
        let store = StateStore::new();
        store.set("a", json!(1));
        store.clear();
        assert_eq!(store.get_all(), json!({}));
        let history = store.get_mutation_history(10);
        assert_eq!(history.last().unwrap().operation, Operation::Clear);
    }

    #[test]
    fn snapshot_restore_is_atomic() {
        let store = StateStore::new();
        store.set("a", json!(1));
        let snap = store.create_snapshot();
        store.set("a", json!(2));
        store.restore_snapshot(&snap);
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn deep_isolation_on_get() {
        let store = StateStore::new();
        store.set("a", json!({"nested": [1, 2, 3]}));
        let mut v = store.get("a").unwrap();
        v["nested"].as_array_mut().unwrap().push(json!(4));
        assert_eq!(store.get("a"), Some(json!({"nested": [1, 2, 3]})));
    }

    #[test]
    fn deep_isolation_on_set() {
        let store = StateStore::new();
        let mut v = json!({"nested": [1, 2, 3]});
        store.set("a", v.clone());
        v["nested"].as_array_mut().unwrap().push(json!(4));
        assert_eq!(store.get("a"), Some(json!({"nested": [1, 2, 3]})));
    }

    #[test]
    fn template_resolution_strips_state_prefix() {
        let store = StateStore::new();
        store.set("user.name", json!("Ada"));
        assert_eq!(
            store.resolve_template("hello {{state.user.name}}"),
            "hello Ada"
        );
        assert_eq!(store.resolve_template("hello {{user.name}}"), "hello Ada");
    }

    #[test]
    fn unresolved_template_left_verbatim() {
        let store = StateStore::new();
        assert_eq!(
            store.resolve_template("value: {{nonexistent}}"),
            "value: {{nonexistent}}"
        );
    }

    #[test]
    fn resolve_templates_recurses_into_nested_structures() {
        let store = StateStore::new();
        store.set("x", json!(42));
        let input = json!({"a": ["{{x}}", {"b": "{{x}}"}], "c": 1});
        let out = store.resolve_templates(&input);
        assert_eq!(out, json!({"a": ["42", {"b": "42"}], "c": 1}));
    }

    #[test]
    fn mutation_history_bounded_by_capacity() {
        let store = StateStore::with_capacity(3);
        for i in 0..10 {
            store.set("a", json!(i));
        }
        assert_eq!(store.get_mutation_history(100).len(), 3);
    }

    proptest::proptest! {
        #[test]
        fn prop_set_then_get_roundtrips(n in 0i64..1000, s in "[a-z]{1,8}") {
            let store = StateStore::new();
            let path = format!("p.{s}");
            store.set(&path, json!(n));
            proptest::prop_assert_eq!(store.get(&path), Some(json!(n)));
            proptest::prop_assert!(store.has(&path));
        }

        #[test]
        fn prop_template_purity(n in 0i64..1000) {
            let store = StateStore::new();
            store.set("v", json!(n));
            let a = store.resolve_template("{{v}}");
            let b = store.resolve_template("{{v}}");
            proptest::prop_assert_eq!(a, b);
        }
    }
}
