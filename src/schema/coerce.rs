//! Pluggable leaf type coercion.

use crate::value::{Map, Value};

/// The runtime kind a target field expects a leaf value to be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Bool,
    Int,
    UInt,
    Float,
    String,
    List,
    Map,
}

/// Invoked when a leaf's runtime type doesn't match the target field's
/// expected kind. Implementations may substitute their own rules; the
/// default covers the common scalar conversions explicitly.
pub trait Coercer: Send + Sync {
    fn coerce(&self, value: &Value, target: TargetKind) -> Value;
}

/// The default coercer: string<->bool, string->numeric, numeric->string,
/// bool<->numeric. Unsupported pairs return the original value unchanged;
/// the decoder then produces the final error.
pub struct DefaultCoercer;

impl Coercer for DefaultCoercer {
    fn coerce(&self, value: &Value, target: TargetKind) -> Value {
        coerce(value, target)
    }
}

pub fn coerce(value: &Value, target: TargetKind) -> Value {
    match (value, target) {
        (Value::String(s), TargetKind::Bool) => {
            parse_bool(s).map_or_else(|| value.clone(), Value::Bool)
        }
        (Value::Bool(b), TargetKind::String) => Value::String(b.to_string()),
        (Value::String(s), TargetKind::Int) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| coerce_string_via_float_to_int(s, value)),
        (Value::String(s), TargetKind::UInt) => s
            .trim()
            .parse::<u64>()
            .map(Value::UInt)
            .unwrap_or_else(|_| value.clone()),
        (Value::String(s), TargetKind::Float) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| value.clone()),
        (Value::Int(i), TargetKind::String) => Value::String(i.to_string()),
        (Value::UInt(u), TargetKind::String) => Value::String(u.to_string()),
        (Value::Float(f), TargetKind::String) => Value::String(f.to_string()),
        (Value::Int(i), TargetKind::Bool) => Value::Bool(*i != 0),
        (Value::UInt(u), TargetKind::Bool) => Value::Bool(*u != 0),
        (Value::Float(f), TargetKind::Bool) => Value::Bool(*f != 0.0),
        (Value::Bool(b), TargetKind::Int) => Value::Int(i64::from(*b)),
        (Value::Bool(b), TargetKind::UInt) => Value::UInt(u64::from(*b)),
        (Value::Bool(b), TargetKind::Float) => Value::Float(if *b { 1.0 } else { 0.0 }),
        (Value::Int(i), TargetKind::Float) => Value::Float(*i as f64),
        (Value::UInt(u), TargetKind::Float) => Value::Float(*u as f64),
        (Value::Float(f), TargetKind::Int) => Value::Int(f.trunc() as i64),
        (Value::Float(f), TargetKind::UInt) => Value::UInt(f.trunc().max(0.0) as u64),
        _ => value.clone(),
    }
}

/// String -> int with a float fallback then truncation.
fn coerce_string_via_float_to_int(s: &str, original: &Value) -> Value {
    s.trim()
        .parse::<f64>()
        .map(|f| Value::Int(f.trunc() as i64))
        .unwrap_or_else(|_| original.clone())
}

/// Element-wise coercion for a list's items.
pub fn coerce_list(list: &[Value], elem: TargetKind) -> Value {
    Value::List(list.iter().map(|v| coerce(v, elem)).collect())
}

/// Value-wise coercion for a string-keyed map's values.
pub fn coerce_map(map: &Map, value_kind: TargetKind) -> Value {
    Value::Map(map.iter().map(|(k, v)| (k.clone(), coerce(v, value_kind))).collect())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
        _ => None,
    }
}
