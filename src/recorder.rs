// Scoped store of values decoded so far in one message

use crate::error::{DecodeError, DecodeResult};
use crate::value::Value;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// One decoded entry: a scalar, or a nested scope named by its field.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Scalar(Value),
    Scope(Vec<RecordEntry>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub path: String,
    pub value: Recorded,
}

#[derive(Debug)]
struct Scope {
    name: String,
    entries: Vec<RecordEntry>,
}

impl Scope {
    fn append(&mut self, path: &str, value: Recorded) {
        self.entries.push(RecordEntry {
            path: path.to_string(),
            value,
        });
    }
}

/// Append-only recorder with a stack of named scopes.
///
/// A scope is pushed when a nested composite field starts and popped when
/// it ends; the popped scope becomes a nested entry of its parent. Lookups
/// only see entries of a single scope, which is what makes a sibling's
/// earlier value visible to a later array count or mapper while hiding
/// values of unrelated containers. Repeated paths (unnamed members, for
/// one) are all kept and a lookup finds the newest.
#[derive(Debug)]
pub struct ValueRecorder {
    scopes: Vec<Scope>,
}

impl Default for ValueRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueRecorder {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                name: String::new(),
                entries: Vec::new(),
            }],
        }
    }

    /// Number of open scopes, the root included.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self, name: &str) {
        self.scopes.push(Scope {
            name: name.to_string(),
            entries: Vec::new(),
        });
    }

    /// Closes the innermost scope. The root scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() < 2 {
            return;
        }
        if let Some(scope) = self.scopes.pop() {
            if let Some(parent) = self.scopes.last_mut() {
                parent.append(&scope.name, Recorded::Scope(scope.entries));
            }
        }
    }

    /// Appends `value` under `path` in the innermost scope.
    pub fn record(&mut self, path: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.append(path, Recorded::Scalar(value));
        }
    }

    /// Swaps the value of the innermost scope's last entry when it was
    /// recorded under `path`, otherwise appends. Used to turn a raw mapper
    /// value into its resolved name without leaving both behind.
    pub fn replace_last(&mut self, path: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            match scope.entries.last_mut() {
                Some(entry) if entry.path == path && matches!(entry.value, Recorded::Scalar(_)) => {
                    entry.value = Recorded::Scalar(value);
                }
                _ => scope.append(path, Recorded::Scalar(value)),
            }
        }
    }

    /// Looks up a scalar recorded `depth` scopes up: `1` is the innermost
    /// open scope, the one holding the current field's siblings.
    pub fn query(&self, depth: usize, path: &str) -> DecodeResult<&Value> {
        let missing = || DecodeError::MissingValue {
            depth,
            path: path.to_string(),
        };
        if depth == 0 || depth > self.scopes.len() {
            return Err(missing());
        }
        let scope = &self.scopes[self.scopes.len() - depth];
        scope
            .entries
            .iter()
            .rev()
            .find(|e| e.path == path)
            .and_then(|e| match &e.value {
                Recorded::Scalar(v) => Some(v),
                Recorded::Scope(_) => None,
            })
            .ok_or_else(missing)
    }

    /// Closes every open scope and returns what was recorded. Works on a
    /// recorder abandoned mid-decode, so partial results are kept.
    pub fn finish(mut self) -> Record {
        while self.scopes.len() > 1 {
            self.pop_scope();
        }
        let entries = self
            .scopes
            .pop()
            .map(|root| root.entries)
            .unwrap_or_default();
        Record { entries }
    }
}

/// Ordered tree of decoded values for one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<RecordEntry>,
}

impl Record {
    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a scalar by `/`-separated path, e.g. `"position/x"`. When a
    /// path was recorded more than once the newest entry wins.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut entries = &self.entries;
        let mut parts = path.split('/').peekable();
        while let Some(part) = parts.next() {
            let entry = entries.iter().rev().find(|e| e.path == part)?;
            match (&entry.value, parts.peek().is_some()) {
                (Recorded::Scalar(v), false) => return Some(v),
                (Recorded::Scope(children), true) => entries = children,
                _ => return None,
            }
        }
        None
    }

    /// Nested entries recorded for a composite field.
    pub fn scope(&self, name: &str) -> Option<&[RecordEntry]> {
        self.entries.iter().rev().find(|e| e.path == name).and_then(|e| match &e.value {
            Recorded::Scope(children) => Some(children.as_slice()),
            Recorded::Scalar(_) => None,
        })
    }

    /// JSON object keyed by path. A repeated path gets a ` #n` suffix from
    /// its second occurrence on, e.g. `"Anon Field"`, `"Anon Field #2"`.
    pub fn to_json(&self) -> JsonValue {
        entries_to_json(&self.entries)
    }
}

fn entries_to_json(entries: &[RecordEntry]) -> JsonValue {
    let mut map = Map::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        let value = match &entry.value {
            Recorded::Scalar(v) => v.to_json(),
            Recorded::Scope(children) => entries_to_json(children),
        };
        let occurrence = seen.entry(entry.path.as_str()).or_insert(0);
        *occurrence += 1;
        let key = match *occurrence {
            1 => entry.path.clone(),
            n => format!("{} #{}", entry.path, n),
        };
        map.insert(key, value);
    }
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_query_in_same_scope() {
        let mut rec = ValueRecorder::new();
        rec.record("count", Value::Uint(3));
        assert_eq!(rec.query(1, "count").unwrap(), &Value::Uint(3));
    }

    #[test]
    fn test_query_does_not_see_outer_scope_at_depth_one() {
        let mut rec = ValueRecorder::new();
        rec.record("count", Value::Uint(3));
        rec.push_scope("inner");
        assert!(matches!(
            rec.query(1, "count"),
            Err(DecodeError::MissingValue { depth: 1, .. })
        ));
        assert_eq!(rec.query(2, "count").unwrap(), &Value::Uint(3));
    }

    #[test]
    fn test_query_missing_path_fails() {
        let rec = ValueRecorder::new();
        assert!(rec.query(1, "nope").is_err());
        assert!(rec.query(0, "nope").is_err());
        assert!(rec.query(5, "nope").is_err());
    }

    #[test]
    fn test_record_keeps_repeated_paths() {
        let mut rec = ValueRecorder::new();
        rec.record("Anon Field", Value::Uint(1));
        rec.record("Anon Field", Value::Uint(2));
        assert_eq!(rec.query(1, "Anon Field").unwrap(), &Value::Uint(2));
        let record = rec.finish();
        assert_eq!(record.entries().len(), 2);
        assert_eq!(record.get("Anon Field"), Some(&Value::Uint(2)));
        assert_eq!(
            record.to_json(),
            serde_json::json!({ "Anon Field": 1, "Anon Field #2": 2 })
        );
    }

    #[test]
    fn test_replace_last_swaps_only_newest_entry() {
        let mut rec = ValueRecorder::new();
        rec.record("kind", Value::Uint(0));
        rec.record("kind", Value::Uint(1));
        rec.replace_last("kind", Value::String("B".into()));
        rec.replace_last("other", Value::Bool(true));
        let record = rec.finish();
        assert_eq!(record.entries().len(), 3);
        assert_eq!(record.entries()[0].value, Recorded::Scalar(Value::Uint(0)));
        assert_eq!(record.entries()[1].value, Recorded::Scalar(Value::String("B".into())));
        assert_eq!(record.get("other"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_repeated_scopes_survive_json() {
        let mut rec = ValueRecorder::new();
        rec.push_scope("Anon Field");
        rec.record("a", Value::Uint(1));
        rec.pop_scope();
        rec.push_scope("Anon Field");
        rec.record("b", Value::Uint(2));
        rec.pop_scope();
        assert_eq!(
            rec.finish().to_json(),
            serde_json::json!({ "Anon Field": { "a": 1 }, "Anon Field #2": { "b": 2 } })
        );
    }

    #[test]
    fn test_pop_attaches_nested_scope() {
        let mut rec = ValueRecorder::new();
        rec.push_scope("position");
        rec.record("x", Value::Int(-1));
        rec.pop_scope();
        rec.record("after", Value::Bool(true));
        let record = rec.finish();
        assert_eq!(record.get("position/x"), Some(&Value::Int(-1)));
        assert_eq!(record.get("after"), Some(&Value::Bool(true)));
        assert_eq!(record.scope("position").map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_finish_keeps_open_scopes() {
        let mut rec = ValueRecorder::new();
        rec.push_scope("a");
        rec.push_scope("b");
        rec.record("x", Value::Uint(1));
        let record = rec.finish();
        assert_eq!(record.get("a/b/x"), Some(&Value::Uint(1)));
    }

    #[test]
    fn test_pop_root_is_noop() {
        let mut rec = ValueRecorder::new();
        rec.pop_scope();
        assert_eq!(rec.depth(), 1);
    }
}
