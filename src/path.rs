//! RFC 6901 JSON Pointer parsing, escaping, and tree access.

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("pointer must be empty or start with '/': {0:?}")]
    MustStartWithSlash(String),
}

/// Unescape a single pointer segment: `~1` -> `/` before `~0` -> `~`.
fn unescape_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    let mut chars = seg.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.peek() {
                Some('0') => {
                    out.push('~');
                    chars.next();
                }
                Some('1') => {
                    out.push('/');
                    chars.next();
                }
                _ => out.push('~'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape a raw key for use as a pointer segment: `~` -> `~0` then `/` -> `~1`.
pub fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '~' => out.push_str("~0"),
            '/' => out.push_str("~1"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse a JSON Pointer into its unescaped segments. Empty string is root
/// (zero segments).
pub fn parse(pointer: &str) -> Result<Vec<String>, PathError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(PathError::MustStartWithSlash(pointer.to_string()));
    }
    Ok(pointer[1..].split('/').map(unescape_segment).collect())
}

/// Build a pointer string from raw (unescaped) segments.
pub fn build<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(&escape(part.as_ref()));
    }
    out
}

/// Join a prefix pointer with a relative pointer fragment (no leading `/`
/// required on `rel`; if `rel` already starts with `/` it is treated as
/// already-escaped segments appended after `prefix`).
pub fn join(prefix: &str, rel: &str) -> String {
    if rel.is_empty() {
        return prefix.to_string();
    }
    let prefix = prefix.trim_end_matches('/');
    if let Some(stripped) = rel.strip_prefix('/') {
        format!("{prefix}/{stripped}")
    } else {
        format!("{prefix}/{rel}")
    }
}

fn get_path_segments<'a>(tree: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut cur = tree;
    for seg in segments {
        cur = match cur {
            Value::Map(m) => m.get(seg.as_str())?,
            Value::List(l) => {
                let idx: usize = seg.parse().ok()?;
                l.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Read a value at a pointer. Returns `None` if the path does not exist.
pub fn get_path<'a>(tree: &'a Value, pointer: &str) -> Option<&'a Value> {
    let segments = parse(pointer).ok()?;
    get_path_segments(tree, &segments)
}

/// Result of [`set_path`]: whether a new key/index was created (`add`
/// semantics) versus an existing one replaced (`replace` semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    pub success: bool,
    pub created: bool,
}

/// Write `value` at `pointer` inside `tree`, auto-creating intermediate
/// maps. List indices must be numeric; extending a list by exactly its
/// current length is permitted (append), any other out-of-range index
/// fails.
pub fn set_path(tree: &mut Value, pointer: &str, value: Value) -> Result<SetOutcome, PathError> {
    let segments = parse(pointer)?;
    if segments.is_empty() {
        *tree = value;
        return Ok(SetOutcome {
            success: true,
            created: false,
        });
    }
    Ok(set_recursive(tree, &segments, value))
}

fn set_recursive(cur: &mut Value, segments: &[String], value: Value) -> SetOutcome {
    let (seg, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        return set_leaf(cur, seg, value);
    }
    match cur {
        Value::Map(m) => {
            let entry = m
                .entry(seg.clone())
                .or_insert_with(|| Value::Map(Default::default()));
            set_recursive(entry, rest, value)
        }
        Value::List(l) => {
            let Ok(idx) = seg.parse::<usize>() else {
                return SetOutcome {
                    success: false,
                    created: false,
                };
            };
            if idx >= l.len() {
                return SetOutcome {
                    success: false,
                    created: false,
                };
            }
            set_recursive(&mut l[idx], rest, value)
        }
        _ => {
            *cur = Value::Map(Default::default());
            set_recursive(cur, segments, value)
        }
    }
}

fn set_leaf(cur: &mut Value, seg: &str, value: Value) -> SetOutcome {
    match cur {
        Value::Map(m) => {
            let created = !m.contains_key(seg);
            m.insert(seg.to_string(), value);
            SetOutcome {
                success: true,
                created,
            }
        }
        Value::List(l) => {
            let Ok(idx) = seg.parse::<usize>() else {
                return SetOutcome {
                    success: false,
                    created: false,
                };
            };
            if idx == l.len() {
                l.push(value);
                SetOutcome {
                    success: true,
                    created: true,
                }
            } else if idx < l.len() {
                l[idx] = value;
                SetOutcome {
                    success: true,
                    created: false,
                }
            } else {
                SetOutcome {
                    success: false,
                    created: false,
                }
            }
        }
        _ => {
            let mut m = indexmap::IndexMap::new();
            m.insert(seg.to_string(), value);
            *cur = Value::Map(m);
            SetOutcome {
                success: true,
                created: true,
            }
        }
    }
}

/// Delete the value at `pointer`. Returns whether something was actually
/// removed.
pub fn delete_path(tree: &mut Value, pointer: &str) -> Result<bool, PathError> {
    let segments = parse(pointer)?;
    if segments.is_empty() {
        return Ok(false);
    }
    Ok(delete_recursive(tree, &segments))
}

fn delete_recursive(cur: &mut Value, segments: &[String]) -> bool {
    let (seg, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        return match cur {
            Value::Map(m) => m.shift_remove(seg).is_some(),
            Value::List(l) => {
                if let Ok(idx) = seg.parse::<usize>() {
                    if idx < l.len() {
                        l.remove(idx);
                        return true;
                    }
                }
                false
            }
            _ => false,
        };
    }
    match cur {
        Value::Map(m) => m
            .get_mut(seg.as_str())
            .is_some_and(|v| delete_recursive(v, rest)),
        Value::List(l) => seg
            .parse::<usize>()
            .ok()
            .and_then(|idx| l.get_mut(idx))
            .is_some_and(|v| delete_recursive(v, rest)),
        _ => false,
    }
}
