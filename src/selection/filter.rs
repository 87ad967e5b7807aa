use serde::{Deserialize, Serialize};

use super::NodeError;
use crate::expr::{CompiledExpr, EvalContext, Scope};
use crate::particles::ParticleTable;
use crate::types::CandidateId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub code: String,
}

/// Keeps the candidates for which `code` holds. Candidates pass through
/// untouched.
#[derive(Debug, Clone)]
pub struct Filter {
    code: CompiledExpr,
}

impl Filter {
    pub fn compile(config: &FilterConfig, table: &ParticleTable) -> Result<Self, NodeError> {
        Ok(Self {
            code: CompiledExpr::compile_cut(&config.code, Scope::Candidate, table)?,
        })
    }

    pub fn run(&self, inputs: &[CandidateId], ctx: &EvalContext<'_>) -> Vec<CandidateId> {
        inputs
            .iter()
            .copied()
            .filter(|&id| self.code.accepts_candidate(ctx, id))
            .collect()
    }
}
