//! Bounded, cycle-safe value formatter.
//!
//! Turns arbitrary runtime values into transmissible text. This is the only
//! representation of a value that ever crosses the host channel: the context
//! and the host share no memory, so raw values cannot traverse the boundary.
//!
//! The formatter is total. Two independent bounds guarantee termination:
//! a depth bound that collapses composites nested deeper than [`MAX_DEPTH`]
//! levels, and a per-call identity set that replaces revisited composites
//! with a circular-reference marker. Depth alone would mislabel a cycle as
//! mere truncation; the visited set alone would not cap deep acyclic cost.

use std::collections::HashSet;

use crate::interp::value::Value;

/// Maximum number of elements/entries rendered per composite.
pub const MAX_ITEMS: usize = 50;

/// Maximum nesting depth of composite expansion (levels 0..=MAX_DEPTH expand).
pub const MAX_DEPTH: usize = 2;

/// Marker for values revisited within one formatting call.
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Marker substituted when formatting fails internally (poisoned cell).
pub const UNSERIALIZABLE_MARKER: &str = "[Unserializable]";

/// Placeholder for composites collapsed by the depth bound.
const DEPTH_ELLIPSIS: &str = "…";

/// Format a value for transmission.
pub fn format_value(value: &Value) -> String {
    let mut visited = HashSet::new();
    format_at(value, 0, &mut visited)
}

/// Format a value the way string concatenation sees it: text stays bare,
/// everything else renders as [`format_value`] does.
pub fn display_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => format_value(other),
    }
}

/// Numeric literal form: integral doubles print without a fraction,
/// non-finite values by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn format_at(value: &Value, depth: usize, visited: &mut HashSet<usize>) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::BigInt(n) => format!("{}n", n),
        Value::Str(s) => quote(s),
        Value::Symbol(desc) => format!("Symbol({})", desc),
        Value::Function(builtin) => format!("[Function {}]", builtin.name()),
        Value::Date(Some(ts)) => ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        Value::Date(None) => "Invalid Date".to_string(),
        Value::Regex(source) => format!("/{}/", source),
        Value::Fault(fault) => match &fault.trace {
            Some(trace) => format!("{}\n{}", fault, trace),
            None => fault.to_string(),
        },
        // Length only, never contents.
        Value::Bytes(bytes) => format!("ArrayBuffer({})", bytes.len()),
        Value::Pending(_) => "[Pending]".to_string(),
        Value::Array(cell) => {
            composite(value, depth, visited, |visited| {
                let items = match cell.lock() {
                    Ok(guard) => guard,
                    Err(_) => return UNSERIALIZABLE_MARKER.to_string(),
                };
                let body = bounded_join(items.iter(), items.len(), |item| {
                    format_at(item, depth + 1, visited)
                });
                format!("Array({}) [{}]", items.len(), body)
            })
        }
        Value::Set(cell) => {
            composite(value, depth, visited, |visited| {
                let items = match cell.lock() {
                    Ok(guard) => guard,
                    Err(_) => return UNSERIALIZABLE_MARKER.to_string(),
                };
                let body = bounded_join(items.iter(), items.len(), |item| {
                    format_at(item, depth + 1, visited)
                });
                format!("Set({}) {{{}}}", items.len(), body)
            })
        }
        Value::Map(cell) => {
            composite(value, depth, visited, |visited| {
                let entries = match cell.lock() {
                    Ok(guard) => guard,
                    Err(_) => return UNSERIALIZABLE_MARKER.to_string(),
                };
                let body = bounded_join(entries.iter(), entries.len(), |(k, v)| {
                    format!(
                        "{} => {}",
                        format_at(k, depth + 1, visited),
                        format_at(v, depth + 1, visited)
                    )
                });
                format!("Map({}) {{{}}}", entries.len(), body)
            })
        }
        Value::Object(cell) => {
            composite(value, depth, visited, |visited| {
                let entries = match cell.lock() {
                    Ok(guard) => guard,
                    Err(_) => return UNSERIALIZABLE_MARKER.to_string(),
                };
                let body = bounded_join(entries.iter(), entries.len(), |(key, v)| {
                    format!("{}: {}", quote(key), format_at(v, depth + 1, visited))
                });
                format!("{{{}}}", body)
            })
        }
    }
}

/// Apply the depth and cycle bounds, then enumerate.
fn composite<F>(value: &Value, depth: usize, visited: &mut HashSet<usize>, enumerate: F) -> String
where
    F: FnOnce(&mut HashSet<usize>) -> String,
{
    if depth > MAX_DEPTH {
        return DEPTH_ELLIPSIS.to_string();
    }
    let id = match value.identity() {
        Some(id) => id,
        None => return UNSERIALIZABLE_MARKER.to_string(),
    };
    if !visited.insert(id) {
        return CIRCULAR_MARKER.to_string();
    }
    enumerate(visited)
}

/// Join up to [`MAX_ITEMS`] rendered items with a trailing `, …` when more
/// exist.
fn bounded_join<'a, T: 'a, I, F>(items: I, total: usize, mut render: F) -> String
where
    I: Iterator<Item = &'a T>,
    F: FnMut(&'a T) -> String,
{
    let mut parts: Vec<String> = items.take(MAX_ITEMS).map(|item| render(item)).collect();
    if total > MAX_ITEMS {
        parts.push("…".to_string());
    }
    parts.join(", ")
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::{Builtin, ScriptFault};
    use chrono::TimeZone;
    use num_bigint::BigInt;
    use std::sync::Arc;

    #[test]
    fn test_scalar_forms() {
        assert_eq!(format_value(&Value::Undefined), "undefined");
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&Value::Bool(true)), "true");
        assert_eq!(format_value(&Value::Number(1024.0)), "1024");
        assert_eq!(format_value(&Value::Number(3.5)), "3.5");
        assert_eq!(format_value(&Value::Number(f64::NAN)), "NaN");
        assert_eq!(format_value(&Value::Number(f64::INFINITY)), "Infinity");
        assert_eq!(format_value(&Value::BigInt(BigInt::from(42))), "42n");
        assert_eq!(format_value(&Value::str("hi")), "\"hi\"");
        assert_eq!(format_value(&Value::str("a\"b\n")), "\"a\\\"b\\n\"");
        assert_eq!(format_value(&Value::Symbol("tag".into())), "Symbol(tag)");
        assert_eq!(
            format_value(&Value::Function(Builtin::ConsoleLog)),
            "[Function log]"
        );
        assert_eq!(format_value(&Value::Regex("a+b".into())), "/a+b/");
    }

    #[test]
    fn test_dates() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            format_value(&Value::Date(Some(ts))),
            "2024-03-01T12:30:00.000Z"
        );
        assert_eq!(format_value(&Value::Date(None)), "Invalid Date");
    }

    #[test]
    fn test_fault_with_trace() {
        let fault = ScriptFault::type_error("bad").with_trace("at line 3");
        assert_eq!(format_value(&Value::Fault(fault)), "TypeError: bad\nat line 3");
    }

    #[test]
    fn test_bytes_length_only() {
        let value = Value::Bytes(Arc::new(vec![1, 2, 3, 4]));
        assert_eq!(format_value(&value), "ArrayBuffer(4)");
    }

    #[test]
    fn test_collections() {
        let arr = Value::array(vec![Value::Number(1.0), Value::str("x")]);
        assert_eq!(format_value(&arr), "Array(2) [1, \"x\"]");

        let set = Value::set(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(format_value(&set), "Set(2) {1, 2}");

        let map = Value::map(vec![(Value::str("a"), Value::Number(1.0))]);
        assert_eq!(format_value(&map), "Map(1) {\"a\" => 1}");

        let obj = Value::object(vec![("a".into(), Value::Number(1.0))]);
        assert_eq!(format_value(&obj), "{\"a\": 1}");
    }

    #[test]
    fn test_truncation_at_fifty() {
        let items: Vec<Value> = (0..60).map(|i| Value::Number(i as f64)).collect();
        let rendered = format_value(&Value::array(items));
        assert!(rendered.starts_with("Array(60) [0, 1, "));
        assert!(rendered.ends_with(", …]"));
        // 50 rendered elements plus the truncation marker.
        assert_eq!(rendered.matches(", ").count(), 50);
        assert!(rendered.contains("49"));
        assert!(!rendered.contains("50,"));
    }

    #[test]
    fn test_keyed_collections_truncate_at_fifty() {
        let entries: Vec<(Value, Value)> = (0..60)
            .map(|i| (Value::Number(i as f64), Value::str(format!("v{}", i))))
            .collect();
        let rendered = format_value(&Value::map(entries));
        assert!(rendered.starts_with("Map(60) {0 => \"v0\", "));
        assert!(rendered.contains("49 => \"v49\""));
        assert!(!rendered.contains("50 => "));
        assert!(rendered.ends_with(", …}"));

        let items: Vec<Value> = (0..55).map(|i| Value::Number(i as f64)).collect();
        let rendered = format_value(&Value::set(items));
        assert!(rendered.starts_with("Set(55) {0, 1, "));
        assert!(rendered.ends_with(", …}"));
    }

    #[test]
    fn test_depth_collapse() {
        let deep = Value::array(vec![Value::array(vec![Value::array(vec![
            Value::array(vec![Value::Number(1.0)]),
        ])])]);
        let rendered = format_value(&deep);
        // Three levels expand, the fourth collapses.
        assert_eq!(rendered, "Array(1) [Array(1) [Array(1) […]]]");
    }

    #[test]
    fn test_direct_cycle() {
        let arr = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(cell) = &arr {
            cell.lock().unwrap().push(arr.clone());
        }
        assert_eq!(format_value(&arr), "Array(2) [1, [Circular]]");
    }

    #[test]
    fn test_indirect_cycle() {
        let inner = Value::object(vec![]);
        let outer = Value::object(vec![("inner".into(), inner.clone())]);
        if let Value::Object(cell) = &inner {
            cell.lock().unwrap().push(("outer".into(), outer.clone()));
        }
        assert_eq!(
            format_value(&outer),
            "{\"inner\": {\"outer\": [Circular]}}"
        );
    }

    #[test]
    fn test_pending_is_opaque() {
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let value = Value::Pending(crate::interp::value::PendingHandle::new(rx));
        assert_eq!(format_value(&value), "[Pending]");
    }

    #[test]
    fn test_poisoned_cell_is_unserializable() {
        let arr = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(cell) = &arr {
            let cell = Arc::clone(cell);
            let _ = std::thread::spawn(move || {
                let _guard = cell.lock().unwrap();
                panic!("poison the lock");
            })
            .join();
        }
        assert_eq!(format_value(&arr), "[Unserializable]");
    }

    #[test]
    fn test_display_text_leaves_strings_bare() {
        assert_eq!(display_text(&Value::str("plain")), "plain");
        assert_eq!(display_text(&Value::Number(2.0)), "2");
    }
}
