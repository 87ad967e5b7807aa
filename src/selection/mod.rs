//! Selection nodes and the pipeline that wires them together.

pub mod combiner;
pub mod filter;
pub mod pipeline;
pub mod tagger;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::ExprError;
use crate::particles::DescriptorError;
use crate::types::SelectionName;

pub use combiner::{Combiner, CombinerConfig, CombinerStats};
pub use filter::{Filter, FilterConfig};
pub use pipeline::{Pipeline, PipelineError, PipelineOutput};
pub use tagger::{TaggerConfig, Tagger, TisTos};

/// The operation a selection performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Algorithm {
    /// Read-only container supplied by the event.
    Source { location: String },
    Combine(CombinerConfig),
    Filter(FilterConfig),
    Tag(TaggerConfig),
}

/// A named selection and the selections it consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSpec {
    pub name: SelectionName,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub inputs: Vec<SelectionName>,
}

impl SelectionSpec {
    pub fn source(name: &str, location: &str) -> Self {
        Self {
            name: name.into(),
            algorithm: Algorithm::Source {
                location: location.to_string(),
            },
            inputs: Vec::new(),
        }
    }

    pub fn new(name: &str, algorithm: Algorithm, inputs: &[&str]) -> Self {
        Self {
            name: name.into(),
            algorithm,
            inputs: inputs.iter().map(|&s| s.into()).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("unknown particle '{0}'")]
    UnknownParticle(String),
    #[error("{0}")]
    Shape(String),
    #[error("invalid trigger spec '{spec}': {reason}")]
    TagSpec { spec: String, reason: String },
}
