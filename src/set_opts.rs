//! The Set option DSL: a composable multi-patch builder.

use crate::value::Value;

/// One entry of a `Set` call's builder list. `Path`/`Map`/`Struct` expand
/// into zero or more leaf entries when evaluated; the rest are already
/// leaf-shaped.
pub enum SetOption {
    String(String, String),
    Int(String, i64),
    Int64(String, i64),
    Float(String, f64),
    Bool(String, bool),
    Value(String, Value),
    /// Joins `prefix` with each child option's own path.
    Path(String, Vec<SetOption>),
    /// Expands to `prefix/k = v` for each entry.
    Map(String, Vec<(String, Value)>),
    /// A pre-converted record tree (see [`struct_fields`]); recurses into
    /// nested maps, treating anything that didn't serialize to a JSON
    /// object (including timestamps and other opaque leaf types) as a
    /// leaf value.
    Struct(String, Value),
    /// Modifier: entries whose value equals its type's zero value are
    /// dropped instead of applied.
    SkipZeroValues,
    /// Modifier: a `null` value becomes a `DeletePath`/remove patch
    /// instead of a `SetPath`/add-or-replace patch.
    DeleteNilValue,
}

pub fn string(path: impl Into<String>, value: impl Into<String>) -> SetOption {
    SetOption::String(path.into(), value.into())
}

pub fn int(path: impl Into<String>, value: i64) -> SetOption {
    SetOption::Int(path.into(), value)
}

pub fn int64(path: impl Into<String>, value: i64) -> SetOption {
    SetOption::Int64(path.into(), value)
}

pub fn float(path: impl Into<String>, value: f64) -> SetOption {
    SetOption::Float(path.into(), value)
}

pub fn bool_(path: impl Into<String>, value: bool) -> SetOption {
    SetOption::Bool(path.into(), value)
}

pub fn value(path: impl Into<String>, value: Value) -> SetOption {
    SetOption::Value(path.into(), value)
}

pub fn path(prefix: impl Into<String>, children: Vec<SetOption>) -> SetOption {
    SetOption::Path(prefix.into(), children)
}

pub fn map(prefix: impl Into<String>, entries: Vec<(String, Value)>) -> SetOption {
    SetOption::Map(prefix.into(), entries)
}

/// Serializes `record` through `serde_json` and wraps the result as a
/// `Struct` option; Rust has no runtime field reflection, so this is the
/// idiomatic stand-in for reflecting over a record's exported fields (the
/// `#[derive(Serialize)]` already enumerates the fields).
pub fn struct_fields<S: serde::Serialize>(prefix: impl Into<String>, record: &S) -> SetOption {
    let json = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
    SetOption::Struct(prefix.into(), Value::from_json(&json))
}

pub fn skip_zero_values() -> SetOption {
    SetOption::SkipZeroValues
}

pub fn delete_nil_value() -> SetOption {
    SetOption::DeleteNilValue
}

/// One flattened `{path, action}` produced by [`evaluate`].
pub struct SetEntry {
    pub path: String,
    pub action: SetAction,
}

pub enum SetAction {
    Set(Value),
    Delete,
}

/// Flatten a builder list into an ordered list of leaf writes, honoring
/// whichever modifiers (`SkipZeroValues`, `DeleteNilValue`) are present
/// anywhere in the list.
pub fn evaluate(options: impl IntoIterator<Item = SetOption>) -> Vec<SetEntry> {
    let options: Vec<SetOption> = options.into_iter().collect();
    let skip_zero = options.iter().any(|o| matches!(o, SetOption::SkipZeroValues));
    let delete_nil = options.iter().any(|o| matches!(o, SetOption::DeleteNilValue));
    let mut out = Vec::new();
    for opt in &options {
        evaluate_one(opt, skip_zero, delete_nil, &mut out);
    }
    out
}

fn evaluate_one(opt: &SetOption, skip_zero: bool, delete_nil: bool, out: &mut Vec<SetEntry>) {
    match opt {
        SetOption::String(p, v) => push_leaf(p, Value::String(v.clone()), skip_zero, delete_nil, out),
        SetOption::Int(p, v) | SetOption::Int64(p, v) => {
            push_leaf(p, Value::Int(*v), skip_zero, delete_nil, out);
        }
        SetOption::Float(p, v) => push_leaf(p, Value::Float(*v), skip_zero, delete_nil, out),
        SetOption::Bool(p, v) => push_leaf(p, Value::Bool(*v), skip_zero, delete_nil, out),
        SetOption::Value(p, v) => push_leaf(p, v.clone(), skip_zero, delete_nil, out),
        SetOption::Path(prefix, children) => {
            let mut nested = Vec::new();
            for child in children {
                evaluate_one(child, skip_zero, delete_nil, &mut nested);
            }
            for entry in nested {
                out.push(SetEntry {
                    path: crate::path::join(prefix, &entry.path),
                    action: entry.action,
                });
            }
        }
        SetOption::Map(prefix, entries) => {
            for (k, v) in entries {
                let child_path = crate::path::join(prefix, &crate::path::escape(k));
                push_leaf(&child_path, v.clone(), skip_zero, delete_nil, out);
            }
        }
        SetOption::Struct(prefix, record) => flatten_struct(prefix, record, skip_zero, delete_nil, out),
        SetOption::SkipZeroValues | SetOption::DeleteNilValue => {}
    }
}

fn flatten_struct(prefix: &str, value: &Value, skip_zero: bool, delete_nil: bool, out: &mut Vec<SetEntry>) {
    match value {
        Value::Map(m) if !m.is_empty() => {
            for (k, v) in m {
                let child_path = crate::path::join(prefix, &crate::path::escape(k));
                flatten_struct(&child_path, v, skip_zero, delete_nil, out);
            }
        }
        _ => push_leaf(prefix, value.clone(), skip_zero, delete_nil, out),
    }
}

fn push_leaf(path: &str, value: Value, skip_zero: bool, delete_nil: bool, out: &mut Vec<SetEntry>) {
    if delete_nil && value.is_null() {
        out.push(SetEntry {
            path: path.to_string(),
            action: SetAction::Delete,
        });
        return;
    }
    if skip_zero && value.is_zero() {
        return;
    }
    out.push(SetEntry {
        path: path.to_string(),
        action: SetAction::Set(value),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_joins_prefix_with_children() {
        let entries = evaluate(vec![path("/server", vec![string("host", "x"), int("port", 1)])]);
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/server/host", "/server/port"]);
    }

    #[test]
    fn map_expands_each_entry() {
        let entries = evaluate(vec![map("/tags", vec![("a".to_string(), Value::Int(1))])]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/tags/a");
    }

    #[test]
    fn skip_zero_values_drops_zero_entries() {
        let entries = evaluate(vec![int("/a", 0), int("/b", 1), skip_zero_values()]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/b");
    }

    #[test]
    fn delete_nil_value_turns_null_into_delete() {
        let entries = evaluate(vec![value("/a", Value::Null), delete_nil_value()]);
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].action, SetAction::Delete));
    }

    #[derive(serde::Serialize)]
    struct Inner {
        host: String,
        port: u16,
    }

    #[test]
    fn struct_fields_recurses_into_nested_objects() {
        let record = Inner {
            host: "localhost".to_string(),
            port: 8080,
        };
        let entries = evaluate(vec![struct_fields("/server", &record)]);
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/server/host"));
        assert!(paths.contains(&"/server/port"));
    }
}
