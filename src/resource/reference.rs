// src/resource/reference.rs

//! `{ get_resource = "<node>" }` references inside resource properties.
//!
//! A reference stands for the physical id of another node in the same stack.
//! It implies a dependency edge and is resolved when the referring node's
//! operation is dispatched, at which point the target has been created.

use serde_json::Value;

use crate::api::Properties;

const GET_RESOURCE: &str = "get_resource";

/// If `value` is a reference object, the referenced node name.
pub fn target_of(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get(GET_RESOURCE)?.as_str()
}

/// All node names referenced from `props`, in property order.
pub fn collect(props: &Properties) -> Vec<String> {
    let mut out = Vec::new();
    for value in props.values() {
        visit(value, &mut |name| {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        });
    }
    out
}

fn visit(value: &Value, f: &mut impl FnMut(&str)) {
    if let Some(name) = target_of(value) {
        f(name);
        return;
    }
    if let Value::Array(items) = value {
        for item in items {
            visit(item, f);
        }
    }
}

/// Replace every reference with the physical id returned by `lookup`.
///
/// Returns the name of the first reference that could not be resolved.
pub fn resolve<F>(props: &Properties, lookup: F) -> Result<Properties, String>
where
    F: Fn(&str) -> Option<String>,
{
    props
        .iter()
        .map(|(k, v)| -> Result<(String, Value), String> {
            Ok((k.clone(), resolve_value(v, &lookup)?))
        })
        .collect()
}

fn resolve_value<F>(value: &Value, lookup: &F) -> Result<Value, String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = target_of(value) {
        return lookup(name)
            .map(Value::String)
            .ok_or_else(|| name.to_string());
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}
