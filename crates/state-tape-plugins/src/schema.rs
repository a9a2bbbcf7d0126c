// state-tape-plugins/src/schema.rs
// ============================================================================
// Module: Plugin Schema Validation
// Description: JSON-schema validation for plugin configs and outputs.
// Purpose: Enforce the deterministic output contract at the runtime boundary.
// Dependencies: jsonschema, serde_json
// ============================================================================

//! ## Overview
//! Plugin configuration is a closed enumeration: schemas are compiled with
//! Draft 2020-12 and unknown options fail the call at load time. Output items
//! are validated one by one; any failing item discards the whole output.
//! Sorting uses the descriptor's documented JSON-pointer keys so results are
//! byte-stable across runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Value;

use crate::plugin::PluginError;

// ============================================================================
// SECTION: Compilation
// ============================================================================

/// Compiles a JSON schema for validation.
///
/// # Errors
///
/// Returns [`PluginError::LoadFailure`] when the schema is invalid.
pub fn compile_schema(schema: &Value) -> Result<Validator, PluginError> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| PluginError::LoadFailure(format!("invalid schema: {err}")))
}

/// Validates a plugin configuration against its closed schema.
///
/// # Errors
///
/// Returns [`PluginError::ConfigRejected`] naming the first violation.
pub fn validate_config(validator: &Validator, config: &Value) -> Result<(), PluginError> {
    validator
        .validate(config)
        .map_err(|err| PluginError::ConfigRejected(err.to_string()))
}

/// Validates every output item; any failure rejects the whole output.
///
/// # Errors
///
/// Returns [`PluginError::OutputRejected`] naming the first failing item.
pub fn validate_output_items(validator: &Validator, items: &[Value]) -> Result<(), PluginError> {
    for (index, item) in items.iter().enumerate() {
        validator.validate(item).map_err(|err| {
            PluginError::OutputRejected(format!("item {index} failed schema: {err}"))
        })?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Canonical Sorting
// ============================================================================

/// Sorts output items by the documented JSON-pointer keys. The sort is
/// stable, so items equal on every documented key keep the plugin's own
/// canonical order.
pub fn sort_items(items: &mut [Value], pointers: &[String]) {
    items.sort_by(|a, b| compare_items(a, b, pointers));
}

/// Compares two items pointer by pointer.
fn compare_items(a: &Value, b: &Value, pointers: &[String]) -> Ordering {
    for pointer in pointers {
        let left = a.pointer(pointer);
        let right = b.pointer(pointer);
        let ordering = compare_values(left, right);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Total order over optional JSON scalar values: absent < null < bool <
/// number < string < composite (by serialization).
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => match (left, right) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => rank(left).cmp(&rank(right)).then_with(|| left.to_string().cmp(&right.to_string())),
        },
    }
}

/// Rank used to order values of different JSON types.
const fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
