//! Engine configuration.
//!
//! Loaded from a JSON file. Every field has a default, so an empty object is
//! a valid configuration. `validate` runs on every load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PredictError, Result};

/// Names of the members read from a query payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryKeys {
    pub prefix: String,
    pub filters: String,
    pub excludes: String,
    pub fields: String,
    pub num: String,
    pub echo: String,
}

impl Default for QueryKeys {
    fn default() -> Self {
        Self {
            prefix: "prefix".to_string(),
            filters: "filters".to_string(),
            excludes: "excludes".to_string(),
            fields: "fields".to_string(),
            num: "num".to_string(),
            echo: "echo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictConfig {
    /// Shortest accepted query prefix, in bytes.
    pub prefix_min_len: usize,
    /// Longest accepted query prefix, in bytes.
    pub prefix_max_len: usize,
    /// Funnel visits allowed per query before it returns what it has.
    pub max_iterations: usize,
    pub max_matches: usize,
    /// Used when a query omits `num` or passes 0.
    pub default_matches: usize,
    /// Cap on distinct stored items. 0 means unlimited.
    pub max_items: usize,
    /// Cap on raw query payload size. 0 means unlimited.
    pub query_max_bytes: usize,

    /// Document member holding the item id.
    pub id_key: String,
    pub query_keys: QueryKeys,

    /// When false, only `visible_fields` may appear in responses.
    pub visible_all: bool,
    pub visible_fields: Vec<String>,
    /// Never returned, whatever the query asks for.
    pub invisible_fields: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub index_file: String,
    pub items_file: String,
    pub restore_on_start: bool,
    pub store_on_exit: bool,
    /// Seconds between background snapshots. 0 disables them.
    pub store_interval_secs: u64,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            prefix_min_len: 2,
            prefix_max_len: 60,
            max_iterations: 3000,
            max_matches: 100,
            default_matches: 10,
            max_items: 0,
            query_max_bytes: 4096,
            id_key: "id".to_string(),
            query_keys: QueryKeys::default(),
            visible_all: true,
            visible_fields: Vec::new(),
            invisible_fields: Vec::new(),
            data_dir: None,
            index_file: "index.bin.zst".to_string(),
            items_file: "items.bin.zst".to_string(),
            restore_on_start: false,
            store_on_exit: false,
            store_interval_secs: 0,
        }
    }
}

impl PredictConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "Loaded predict config");
        Ok(config)
    }

    /// Parses and validates config JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|error| PredictError::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> { Err(PredictError::InvalidConfig(message)) };

        if self.prefix_min_len < 1 {
            return invalid("prefix_min_len must be at least 1".to_string());
        }
        if self.prefix_min_len > self.prefix_max_len {
            return invalid(format!(
                "prefix_min_len ({}) exceeds prefix_max_len ({})",
                self.prefix_min_len, self.prefix_max_len
            ));
        }
        if self.max_matches < 1 {
            return invalid("max_matches must be at least 1".to_string());
        }
        if self.default_matches < 1 || self.default_matches > self.max_matches {
            return invalid(format!(
                "default_matches must be within 1..={}",
                self.max_matches
            ));
        }
        if self.max_iterations < 1 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        if self.id_key.is_empty() {
            return invalid("id_key must not be empty".to_string());
        }
        let keys = &self.query_keys;
        for (name, value) in [
            ("prefix", &keys.prefix),
            ("filters", &keys.filters),
            ("excludes", &keys.excludes),
            ("fields", &keys.fields),
            ("num", &keys.num),
            ("echo", &keys.echo),
        ] {
            if value.is_empty() {
                return invalid(format!("query_keys.{name} must not be empty"));
            }
        }
        if !self.visible_all
            && self
                .visible_fields
                .iter()
                .all(|field| self.invisible_fields.contains(field))
        {
            return invalid("visible_all is off but no field is visible".to_string());
        }
        let uses_store =
            self.restore_on_start || self.store_on_exit || self.store_interval_secs > 0;
        if uses_store && self.data_dir.is_none() {
            return invalid("store options require data_dir".to_string());
        }
        if self.index_file.is_empty() || self.items_file.is_empty() {
            return invalid("index_file and items_file must not be empty".to_string());
        }
        if self.index_file == self.items_file {
            return invalid("index_file and items_file must differ".to_string());
        }
        Ok(())
    }

    /// Path of the index artifact, when a data directory is configured.
    pub fn index_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(&self.index_file))
    }

    /// Path of the items artifact, when a data directory is configured.
    pub fn items_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(&self.items_file))
    }
}
