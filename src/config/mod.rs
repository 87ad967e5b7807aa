//! Run configuration.
//!
//! One immutable [`RunConfig`] describes a whole job: the selection graph,
//! the tuples, the event pre-filter and the run-level settings. It is
//! validated in full by [`crate::app::Application::new`] before the first
//! event is read.

pub mod presets;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::expr::ExprError;
use crate::selection::{PipelineError, SelectionSpec};
use crate::tuple::{McTupleConfig, TupleConfig, TupleError};
use crate::types::SelectionName;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Tuple '{tuple}': {source}")]
    Tuple {
        tuple: String,
        #[source]
        source: TupleError,
    },
    #[error("Event filter: {0}")]
    EventFilter(#[source] ExprError),
    #[error("Invalid setting {name}: {reason}")]
    Setting { name: &'static str, reason: String },
}

fn default_print_freq() -> u64 {
    1000
}

fn default_evt_max() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub input_type: String,
    /// Simulated input: MC tools and the generator-level tuple are active.
    #[serde(default)]
    pub simulation: bool,
    #[serde(default)]
    pub lumi: bool,
    /// Progress is logged every `print_freq` events; `0` disables it.
    #[serde(default = "default_print_freq")]
    pub print_freq: u64,
    /// Maximum number of events to process; `-1` means all.
    #[serde(default = "default_evt_max")]
    pub evt_max: i64,
    #[serde(default)]
    pub dddb_tag: String,
    #[serde(default)]
    pub conddb_tag: String,
    /// Output directory for the tuples.
    pub tuple_file: PathBuf,
    /// Event-scope predicate over decision reports, e.g.
    /// `HLT_PASS('StrippingXiccXiccPlusToD0PKPiDecision')`.
    #[serde(default)]
    pub event_filter: Option<String>,
    pub selections: Vec<SelectionSpec>,
    pub top_selection: SelectionName,
    pub tuple: TupleConfig,
    #[serde(default)]
    pub mc_tuple: Option<McTupleConfig>,
    /// Log the decay tree of every top-level candidate at debug level.
    #[serde(default)]
    pub print_decay_tree: bool,
}

impl RunConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(s)?;
        config.check_settings()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content digest of the configuration, `sha256:<hex>`.
    pub fn digest(&self) -> Result<String, ConfigError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }

    /// Events to process, `None` for no limit.
    pub fn event_limit(&self) -> Option<u64> {
        u64::try_from(self.evt_max).ok()
    }

    pub(crate) fn check_settings(&self) -> Result<(), ConfigError> {
        if self.evt_max < -1 {
            return Err(ConfigError::Setting {
                name: "evt_max",
                reason: format!("{} (use -1 for all events)", self.evt_max),
            });
        }
        if !self.simulation {
            if let Some(tool) = self.tuple.truth_tools().next() {
                return Err(ConfigError::Setting {
                    name: "simulation",
                    reason: format!("{tool} needs simulated input"),
                });
            }
        }
        if self.tuple_file.as_os_str().is_empty() {
            return Err(ConfigError::Setting {
                name: "tuple_file",
                reason: "empty path".to_string(),
            });
        }
        Ok(())
    }
}
