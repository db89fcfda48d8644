//! Template resolution
//!
//! Substitutes `${outputs.<nodeId>[.segment…]}` and `${variables.<name>}`
//! templates inside string leaves, recursively through arrays and maps.
//! Templates that fail to resolve are preserved verbatim. Pure: repeated
//! application to the same (value, context) is idempotent as long as
//! resolved values do not themselves contain templates.

use crate::context::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// Nested braces are not supported; the expression body is everything up to
// the first closing brace.
static TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid pattern"));

/// Resolve templates in a value of arbitrary shape, preserving the shape
pub fn resolve_value(value: &Value, context: &Context) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, context)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, context))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, context)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Resolve templates inside one string
pub fn resolve_str(input: &str, context: &Context) -> String {
    TEMPLATE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match lookup(&caps[1], context) {
                Some(value) => value_to_string(&value),
                // Unresolvable templates keep their literal text.
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Evaluate one template expression against the context.
///
/// `outputs.<nodeId>` roots in the outputs map, `variables.<name>` in the
/// variables map; further dotted segments traverse object trees by key.
/// Any segment hitting a non-object or missing key aborts the lookup.
fn lookup(expression: &str, context: &Context) -> Option<Value> {
    let mut segments = expression.split('.');
    let root = match segments.next()? {
        "outputs" => context.outputs.get(segments.next()?)?,
        "variables" => context.variables.get(segments.next()?)?,
        _ => return None,
    };

    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Platform default value-to-string conversion for substitution into a
/// larger string: strings verbatim, everything else as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
