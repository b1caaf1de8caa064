//! Structural diff over JSON trees.
//!
//! Objects are walked over the sorted union of their keys, arrays index by
//! index. A path that exists on only one side is reported with `<absent>` on
//! the other, which keeps "missing" and `null` apart in the rendered output.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::ComparisonError;

/// Cap on rendered divergences; large receipts can differ on every log.
pub const MAX_RENDERED: usize = 32;

const ABSENT: &str = "<absent>";

/// One divergent path. `None` means the path does not exist on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub path: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

pub fn diff_values(expected: &Value, actual: &Value) -> Vec<Divergence> {
    let mut out = Vec::new();
    walk("$".to_string(), Some(expected), Some(actual), &mut out);
    out
}

fn walk(path: String, expected: Option<&Value>, actual: Option<&Value>, out: &mut Vec<Divergence>) {
    match (expected, actual) {
        (Some(Value::Object(e)), Some(Value::Object(a))) => {
            let keys: BTreeSet<&String> = e.keys().chain(a.keys()).collect();
            for k in keys {
                walk(format!("{path}.{k}"), e.get(k), a.get(k), out);
            }
        }
        (Some(Value::Array(e)), Some(Value::Array(a))) => {
            for i in 0..e.len().max(a.len()) {
                walk(format!("{path}[{i}]"), e.get(i), a.get(i), out);
            }
        }
        (e, a) if e == a => {}
        (e, a) => out.push(Divergence {
            path,
            expected: e.cloned(),
            actual: a.cloned(),
        }),
    }
}

fn show(v: &Option<Value>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => ABSENT.to_string(),
    }
}

pub fn render(divergences: &[Divergence]) -> String {
    let mut lines: Vec<String> = divergences
        .iter()
        .take(MAX_RENDERED)
        .flat_map(|d| {
            [
                format!("- {}: {}", d.path, show(&d.expected)),
                format!("+ {}: {}", d.path, show(&d.actual)),
            ]
        })
        .collect();
    if divergences.len() > MAX_RENDERED {
        lines.push(format!("... {} more", divergences.len() - MAX_RENDERED));
    }
    lines.join("\n")
}

/// Deep equality over raw trees.
pub fn compare_values(label: &str, expected: &Value, actual: &Value) -> Result<(), ComparisonError> {
    if expected == actual {
        return Ok(());
    }
    let divergences = diff_values(expected, actual);
    let Some(first) = divergences.first() else {
        return Err(ComparisonError::new(label, "$", expected.to_string(), actual.to_string()));
    };
    Err(
        ComparisonError::new(label, first.path.clone(), show(&first.expected), show(&first.actual))
            .with_diff(render(&divergences)),
    )
}

/// Deep equality for any serializable record. Equal values short-circuit;
/// unequal ones are serialized so the diff can name the divergent path.
pub fn compare_serialized<T>(label: &str, expected: &T, actual: &T) -> Result<(), ComparisonError>
where
    T: PartialEq + Serialize + ?Sized,
{
    if expected == actual {
        return Ok(());
    }
    let e = serde_json::to_value(expected);
    let a = serde_json::to_value(actual);
    match (e, a) {
        (Ok(e), Ok(a)) if e != a => compare_values(label, &e, &a),
        (Ok(e), Ok(_)) => Err(ComparisonError::new(
            label,
            "$",
            e.to_string(),
            "a value that serializes identically but differs in unserialized state",
        )),
        (Err(err), _) | (_, Err(err)) => Err(ComparisonError::new(
            label,
            "$",
            "<serializable>",
            format!("serialization failed: {err}"),
        )),
    }
}
