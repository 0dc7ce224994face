//! CLI command handlers
//!
//! # Modules
//!
//! - `track`: run the tracking pipeline and write its outputs
//! - `config`: print the default configuration, validate a configuration file
//! - `synth`: write a synthetic dataset as session files

pub mod config;
pub mod synth;
pub mod track;

use std::path::Path;

use anyhow::Context;
use roi_graph_core::{merge_with_defaults, Config};
use serde_json::{Map, Value};

/// Load the layered configuration, then apply command-line overrides.
///
/// Overrides go through the same merge as file and environment values, so
/// they are validated the same way.
pub(crate) fn load_config(path: Option<&Path>, overrides: Map<String, Value>) -> anyhow::Result<Config> {
    let base = Config::load(path).with_context(|| match path {
        Some(p) => format!("loading configuration from {}", p.display()),
        None => "loading configuration".to_string(),
    })?;
    if overrides.is_empty() {
        return Ok(base);
    }
    merge_with_defaults(Value::Object(overrides), &base).context("applying command-line overrides")
}

/// Insert `value` at a dotted `path` inside `tree`.
pub(crate) fn set_path(tree: &mut Map<String, Value>, path: &str, value: Value) {
    let mut keys: Vec<&str> = path.split('.').collect();
    let Some(last) = keys.pop() else {
        return;
    };
    let mut node = tree;
    for key in keys {
        let entry = node
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        node = next;
    }
    node.insert(last.to_string(), value);
}
