//! Configuration management for the ROI tracking pipeline.
//!
//! A run configuration is the default tree with user overrides merged on top.
//! Overrides are partial: only the keys a user sets are replaced, and a key
//! that does not exist in the default tree is an error naming its dotted path.

mod sub_configs;

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TrackingError, TrackingResult};
use crate::pruning::PrunePolicy;

pub use sub_configs::{
    AutomaticMixingConfig, ClusteringConfig, DataKind, DataLoadingConfig, FusionConfig, GeneralConfig,
    LoggingConfig, SimilarityConfig, SyntheticConfig,
};

/// Environment prefix for overrides, e.g. `ROI_GRAPH__GENERAL__RANDOM_SEED=7`.
pub const ENV_PREFIX: &str = "ROI_GRAPH";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub data_loading: DataLoadingConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub pruning: PrunePolicy,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// Sources are layered in order:
    /// 1. built-in defaults
    /// 2. the TOML file at `path`, if given
    /// 3. environment variables with the `ROI_GRAPH__` prefix
    pub fn load(path: Option<&Path>) -> TrackingResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(TrackingError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                ));
            }
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let overrides: Value = builder.build()?.try_deserialize()?;
        merge_with_defaults(overrides, &Config::default())
    }

    /// Load configuration from a TOML file, without environment overrides.
    pub fn from_file(path: &Path) -> TrackingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrackingError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Parse a (possibly partial) TOML document over the defaults.
    pub fn from_toml_str(content: &str) -> TrackingResult<Self> {
        let table: toml::Value = toml::from_str(content)?;
        let overrides = serde_json::to_value(table)?;
        merge_with_defaults(overrides, &Config::default())
    }

    /// Render the full tree as TOML. Unset optional values are omitted.
    pub fn to_toml_string(&self) -> TrackingResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrackingError::Serialization(e.to_string()))
    }

    /// Validate configuration values.
    ///
    /// Every message names the offending key by its dotted path.
    pub fn validate(&self) -> TrackingResult<()> {
        self.data_loading.validate()?;
        self.similarity.validate()?;
        self.fusion.validate()?;
        self.pruning.validate()?;
        self.clustering.validate()?;

        for modality in crate::types::Modality::all() {
            let w = self.fusion.weighting(modality);
            if w.required && !self.similarity.modalities.contains(&modality) {
                return Err(TrackingError::config(format!(
                    "fusion.{} is required but not listed in similarity.modalities",
                    modality
                )));
            }
        }

        if LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(TrackingError::config(format!(
                "logging.level must be one of trace, debug, info, warn, error; got '{}'",
                self.logging.level
            )))
        }
    }
}

/// Merge a partial override tree onto `defaults` and validate the result.
///
/// Pure: neither input is modified. Rules:
/// - tables merge key by key, recursively
/// - any other value replaces the default wholesale
/// - a table whose `kind` tag differs from the default's replaces it wholesale
/// - an override key with no default counterpart fails with its dotted path
///
/// Keys are matched exactly first, then case-insensitively, so lowercased
/// environment keys still reach camel-cased options.
pub fn merge_with_defaults(overrides: Value, defaults: &Config) -> TrackingResult<Config> {
    let mut tree = serde_json::to_value(defaults)?;
    merge_value(&mut tree, overrides, "")?;
    let config: Config =
        serde_json::from_value(tree).map_err(|e| TrackingError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

fn merge_value(base: &mut Value, overrides: Value, path: &str) -> TrackingResult<()> {
    let over = match overrides {
        Value::Object(over) => over,
        other => {
            *base = other;
            return Ok(());
        }
    };
    if !base.is_object() {
        // Unset optional section; the typed pass checks its contents.
        *base = Value::Object(over);
        return Ok(());
    }
    let Some(map) = base.as_object_mut() else {
        return Ok(());
    };
    if kind_changes(map, &over) {
        *map = over;
        return Ok(());
    }

    for (key, value) in over {
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let target = if map.contains_key(&key) {
            key
        } else {
            map.keys()
                .find(|k| k.eq_ignore_ascii_case(&key))
                .cloned()
                .ok_or_else(|| TrackingError::config(format!("unrecognized option '{}'", child)))?
        };
        if let Some(slot) = map.get_mut(&target) {
            merge_value(slot, value, &child)?;
        }
    }
    Ok(())
}

fn kind_changes(base: &Map<String, Value>, over: &Map<String, Value>) -> bool {
    match (base.get("kind"), over.get("kind")) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}
