//! Decay-tree tuples.
//!
//! A tuple is configured with a marked decay descriptor, a set of named
//! branches and a list of tools. At configuration time every tool declares
//! the columns it fills for each branch, so the column set of a tuple never
//! changes from row to row. Values a tool cannot compute for a given
//! candidate are written as absent rather than dropped.

mod matcher;
mod mc;
mod recorder;
mod tools;
mod truth;
mod writer;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::ExprError;
use crate::particles::DescriptorError;

pub use matcher::{CompiledPattern, McTree, TreePath, TreeView};
pub use mc::McTupleRecorder;
pub use recorder::{Branch, TupleRecorder};
pub use writer::{RowSink, TupleBuffer, TupleSchema, TupleWriter};

#[derive(Debug, Error)]
pub enum TupleError {
    #[error("Invalid decay descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("Unknown particle '{0}'")]
    UnknownParticle(String),
    #[error("Unknown tuple tool '{0}'")]
    UnknownTool(String),
    #[error("Branch '{branch}': {reason}")]
    Branch { branch: String, reason: String },
    #[error("Variable '{name}': {source}")]
    Expression {
        name: String,
        #[source]
        source: ExprError,
    },
    #[error("Tuple '{0}' was not registered with the writer")]
    UnknownTable(String),
    #[error("Tuple '{table}' row has {got} values, schema has {expected} columns")]
    RowWidth {
        table: String,
        expected: usize,
        got: usize,
    },
    #[error("Output already exists: {0}")]
    OutputExists(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Options of the trigger-status tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TisTosConfig {
    /// Decisions that get their own `_Dec/_TIS/_TOS` columns when the
    /// verbose flag of their level is set.
    pub trigger_list: Vec<String>,
    pub verbose_l0: bool,
    pub verbose_hlt1: bool,
    pub verbose_hlt2: bool,
}

/// A tool attached to a single branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BranchTool {
    /// `TupleToolDecayTreeFitter/<name>`
    DecayTreeFitter {
        name: String,
        #[serde(default)]
        daughters_to_constrain: Vec<String>,
        #[serde(default)]
        constrain_to_origin_vertex: bool,
        #[serde(default)]
        verbose: bool,
    },
    /// `LoKi::Hybrid::TupleTool/<name>`
    LoKiHybrid {
        name: String,
        #[serde(default)]
        preambulo: Vec<String>,
        variables: BTreeMap<String, String>,
    },
}

/// Reconstructed decay-tree tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleConfig {
    #[serde(default = "default_tuple_name")]
    pub name: String,
    pub decay: String,
    /// Branch name -> descriptor marking at most one node (none = head).
    pub branches: BTreeMap<String, String>,
    pub tool_list: Vec<String>,
    #[serde(default)]
    pub tistos: TisTosConfig,
    #[serde(default)]
    pub branch_tools: BTreeMap<String, Vec<BranchTool>>,
}

impl TupleConfig {
    /// Listed tools that need simulated input.
    pub fn truth_tools(&self) -> impl Iterator<Item = &str> {
        self.tool_list
            .iter()
            .map(String::as_str)
            .filter(|name| tools::TRUTH_TOOLS.contains(name))
    }
}

fn default_tuple_name() -> String {
    "DecayTreeTuple".to_string()
}

fn default_mc_tuple_name() -> String {
    "MCDecayTreeTuple".to_string()
}

/// Generator-level decay-tree tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McTupleConfig {
    #[serde(default = "default_mc_tuple_name")]
    pub name: String,
    pub decay: String,
    pub branches: BTreeMap<String, String>,
    pub tool_list: Vec<String>,
}
