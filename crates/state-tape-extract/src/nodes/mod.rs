// state-tape-extract/src/nodes/mod.rs
// ============================================================================
// Module: Builtin Extraction Nodes
// Description: The audited in-process plugin pack for the extraction DAG.
// Purpose: Group node implementations and their shared helpers.
// Dependencies: state-tape-plugins, serde_json
// ============================================================================

//! ## Overview
//! Every DAG node is a [`state_tape_plugins::TapePlugin`]: it declares the
//! keys it requires and provides, a closed configuration schema, an output
//! item schema, and documented sort keys. The pack is audited and hosted
//! in-process; untrusted third-party nodes would ship the same contract
//! behind the subprocess host instead.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod action;
pub mod chart;
pub mod code;
pub mod cursor;
pub mod delta;
pub mod layout;
pub mod match_ids;
pub mod ocr;
pub mod preprocess;
pub mod state_build;
pub mod table;
pub mod temporal;
pub mod ui_parse;

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use state_tape_core::PluginId;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;

/// Version stamped on every builtin node.
pub const BUILTIN_PACK_VERSION: &str = "1.0.0";

/// Builds a descriptor for a builtin node.
pub(crate) fn node_descriptor(
    id: &str,
    capability: &str,
    requires: &[&str],
    provides: &[&str],
    config_schema: Value,
    output_schema: Value,
    sort_key_pointers: &[&str],
) -> PluginDescriptor {
    PluginDescriptor {
        id: PluginId::new(id),
        version: BUILTIN_PACK_VERSION.to_string(),
        capability: capability.to_string(),
        requires: requires.iter().map(ToString::to_string).collect(),
        provides: provides.iter().map(ToString::to_string).collect(),
        config_schema,
        output_schema,
        sort_key_pointers: sort_key_pointers.iter().map(ToString::to_string).collect(),
    }
}

/// A permissive object schema for items validated structurally downstream.
pub(crate) fn object_schema() -> Value {
    json!({ "type": "object" })
}

/// A closed, empty configuration schema.
pub(crate) fn empty_config_schema() -> Value {
    json!({ "type": "object", "additionalProperties": false })
}

/// Deserializes one required input value.
pub(crate) fn parse_input<T: DeserializeOwned>(
    inputs: &PluginInputs,
    key: &str,
) -> Result<T, PluginError> {
    let value = inputs.require(key)?;
    serde_json::from_value(value.clone())
        .map_err(|err| PluginError::Execution(format!("input {key} malformed: {err}")))
}

/// Deserializes one optional input value, treating `null` as absent.
pub(crate) fn parse_optional_input<T: DeserializeOwned>(
    inputs: &PluginInputs,
    key: &str,
) -> Result<Option<T>, PluginError> {
    match inputs.values.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| PluginError::Execution(format!("input {key} malformed: {err}"))),
    }
}

/// Serializes typed outputs into item values.
pub(crate) fn to_items<T: Serialize>(values: &[T]) -> Result<Vec<Value>, PluginError> {
    values
        .iter()
        .map(|value| {
            serde_json::to_value(value).map_err(|err| PluginError::Execution(err.to_string()))
        })
        .collect()
}
