//! Dotted-path value store
//!
//! The store is the shared state that extraction writes to and criteria read
//! from. Keys are addressed with dotted paths (`build.status`); writing a path
//! creates the intermediate maps on the way, and numeric segments index into
//! arrays on lookup.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Mutable key/value state addressed by dotted paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueStore {
    values: Map<String, Value>,
}

impl ValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the given map
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Look up a value by dotted path
    ///
    /// A top-level key that literally contains dots wins over traversal.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Look up a value by dotted path and render it as text
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).map(value_to_string)
    }

    /// Whether a value exists at the given path
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Write a value at a dotted path, creating intermediate maps
    ///
    /// Intermediate values that are not maps are replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut current = &mut self.values;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value.into());
                return;
            }
            let entry = current
                .entry(segment)
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
    }

    /// Remove the value at a dotted path, returning it if present
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        if let Some(value) = self.values.remove(path) {
            return Some(value);
        }
        let (parent, last) = path.rsplit_once('.')?;
        match self.get_mut(parent)? {
            Value::Object(map) => map.remove(last),
            _ => None,
        }
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let mut current = self.values.get_mut(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write every entry of a flat map into the store, treating keys as paths
    pub fn overlay(&mut self, values: &Map<String, Value>) {
        for (key, value) in values {
            self.set(key, value.clone());
        }
    }

    /// Expand `$name`, `${name}` and `$dotted.path` references in text
    ///
    /// References that do not resolve are left untouched. For the bare form the
    /// longest resolvable prefix is used, so `$file.txt` expands `$file` and
    /// keeps `.txt`.
    pub fn expand(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        variable_pattern()
            .replace_all(text, |caps: &Captures| self.expand_reference(caps))
            .into_owned()
    }

    fn expand_reference(&self, caps: &Captures) -> String {
        if let Some(path) = caps.get(1) {
            return match self.get(path.as_str()) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            };
        }
        let path = &caps[2];
        let mut end = path.len();
        loop {
            if let Some(value) = self.get(&path[..end]) {
                return format!("{}{}", value_to_string(value), &path[end..]);
            }
            match path[..end].rfind('.') {
                Some(dot) => end = dot,
                None => return caps[0].to_string(),
            }
        }
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Consume the store, returning the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    /// Number of top-level entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store has no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for ValueStore {
    fn from(values: Map<String, Value>) -> Self {
        Self::from_map(values)
    }
}

/// Render a stored value as text: strings verbatim, null as empty, anything else as JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)")
            .expect("variable pattern is a valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut store = ValueStore::new();
        store.set("build.status", "done");
        store.set("build.version", json!(3));

        assert_eq!(store.get("build.status"), Some(&json!("done")));
        assert_eq!(store.get("build"), Some(&json!({"status": "done", "version": 3})));
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let mut store = ValueStore::new();
        store.set("build", "pending");
        store.set("build.status", "done");

        assert_eq!(store.get_string("build.status").as_deref(), Some("done"));
    }

    #[test]
    fn test_lookup_descends_into_arrays() {
        let store = ValueStore::from_map(
            json!({"data": [{"name": "a"}, {"name": "b"}]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(store.get_string("data.1.name").as_deref(), Some("b"));
        assert!(store.get("data.7.name").is_none());
    }

    #[test]
    fn test_remove_nested() {
        let mut store = ValueStore::new();
        store.set("a.b", 1);
        store.set("a.c", 2);

        assert_eq!(store.remove("a.b"), Some(json!(1)));
        assert!(!store.contains("a.b"));
        assert!(store.contains("a.c"));
        assert_eq!(store.remove("missing.key"), None);
    }

    #[test]
    fn test_expand_forms() {
        let mut store = ValueStore::new();
        store.set("host", "db01");
        store.set("build.dir", "/opt/build");
        store.set("file", "report");

        assert_eq!(store.expand("ssh $host"), "ssh db01");
        assert_eq!(store.expand("cd ${build.dir}/bin"), "cd /opt/build/bin");
        assert_eq!(store.expand("cd $build.dir"), "cd /opt/build");
        assert_eq!(store.expand("cat $file.txt"), "cat report.txt");
        assert_eq!(store.expand("echo $PATH:${missing}"), "echo $PATH:${missing}");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("x")), "x");
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!(12)), "12");
        assert_eq!(value_to_string(&json!({"a": true})), r#"{"a":true}"#);
    }
}
