//! `${path}` interpolation against the request context.
//!
//! Two modes, decided per string:
//!
//! - *value mode* — the string is exactly one `${…}` expression; the
//!   looked-up value is returned with its native type intact (numbers stay
//!   numbers, objects stay objects, a missing path stays missing).
//! - *string mode* — `${…}` occurrences embedded in other text stringify
//!   and concatenate; null and missing values render as the empty string,
//!   zero renders as `"0"`.

use serde_json::{Map, Value};

use crate::context::FlowContext;

/// Recursively substitute `${path}` expressions in `value`.
///
/// Non-string primitives pass through unchanged; arrays and objects are
/// rebuilt element-wise / key-preserving. A full-expression string whose
/// path is missing resolves to JSON null (the closest representable form
/// of `undefined`).
pub fn resolve(value: &Value, ctx: &FlowContext) -> Value {
    match value {
        Value::String(s) => resolve_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Substitute `${path}` expressions in a single string.
pub fn resolve_str(s: &str, ctx: &FlowContext) -> Value {
    if !s.contains("${") {
        return Value::String(s.to_string());
    }
    if let Some(path) = full_expression(s) {
        return ctx.lookup(path).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let value = ctx.lookup(after[..end].trim());
                out.push_str(&stringify(value));
                rest = &after[end + 1..];
            }
            None => {
                // Unclosed expression: keep the remainder literally.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// If `s` is exactly one `${…}` expression, return the inner path.
fn full_expression(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}

/// The string form of a looked-up value for string-mode interpolation.
fn stringify(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(composite) => composite.to_string(),
    }
}

/// JS-like truthiness over JSON values: null, false, zero, and the empty
/// string are falsy; everything else (including empty arrays and objects)
/// is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
