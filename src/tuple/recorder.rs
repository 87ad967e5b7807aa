use std::collections::{BTreeMap, BTreeSet};

use super::matcher::{bind_any, CompiledPattern, TreePath};
use super::tools::{self, EventTool, ParticleTool, Tool, ToolContext};
use super::{TupleConfig, TupleError};
use crate::event::{CandidateStore, Event};
use crate::particles::{DecayNode, Descriptor, ParticleTable};
use crate::types::CandidateId;

/// A named position in the tuple's decay pattern.
#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    pub path: TreePath,
    pub is_basic: bool,
    pub(crate) node: DecayNode,
}

impl Branch {
    pub fn is_head(&self) -> bool {
        self.path.is_empty()
    }
}

/// Resolves branch descriptors against the tuple decay, ordered head first
/// and then depth first.
pub(crate) fn resolve_branches(
    decay: &Descriptor,
    branches: &BTreeMap<String, String>,
    table: &ParticleTable,
) -> Result<Vec<Branch>, TupleError> {
    let mut allowed: BTreeSet<TreePath> = decay.marked_paths().into_iter().collect();
    allowed.insert(Vec::new());

    let mut out: Vec<Branch> = Vec::with_capacity(branches.len());
    for (name, pattern) in branches {
        let fail = |reason: String| TupleError::Branch {
            branch: name.clone(),
            reason,
        };
        let descriptor = Descriptor::parse_with(pattern, table).map_err(|e| fail(e.to_string()))?;
        if !descriptor.head.same_shape(&decay.head) {
            return Err(fail("pattern does not have the shape of the tuple decay".to_string()));
        }
        let mut marks = descriptor.marked_paths();
        let path = match marks.len() {
            0 => Vec::new(),
            1 => marks.remove(0),
            n => return Err(fail(format!("{n} nodes marked, at most one allowed"))),
        };
        if !allowed.contains(&path) {
            return Err(fail("node is not marked in the tuple decay".to_string()));
        }
        if let Some(other) = out.iter().find(|b| b.path == path) {
            return Err(fail(format!("same node as branch '{}'", other.name)));
        }
        let node = decay
            .head
            .at(&path)
            .cloned()
            .ok_or_else(|| fail("node not found".to_string()))?;
        out.push(Branch {
            name: name.clone(),
            path,
            is_basic: node.is_basic(),
            node,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

pub(crate) fn compile_patterns(decay: &Descriptor, table: &ParticleTable) -> Result<Vec<CompiledPattern>, TupleError> {
    decay
        .patterns(table)?
        .iter()
        .map(|p| CompiledPattern::compile(p, table))
        .collect()
}

/// Adds `column` to the schema, falling back to `fallback` when taken.
pub(crate) fn claim_column(
    columns: &mut Vec<String>,
    seen: &mut BTreeSet<String>,
    column: String,
    fallback: Option<String>,
    branch: &str,
) -> Result<(), TupleError> {
    let chosen = if !seen.contains(&column) {
        column
    } else {
        match fallback {
            Some(f) if !seen.contains(&f) => f,
            _ => {
                return Err(TupleError::Branch {
                    branch: branch.to_string(),
                    reason: format!("column '{column}' declared twice"),
                })
            }
        }
    };
    seen.insert(chosen.clone());
    columns.push(chosen);
    Ok(())
}

struct BranchSlot {
    branch: Branch,
    tools: Vec<ParticleTool>,
}

/// Records one row per top-level candidate matching the tuple decay.
pub struct TupleRecorder {
    name: String,
    patterns: Vec<CompiledPattern>,
    event_tools: Vec<EventTool>,
    slots: Vec<BranchSlot>,
    columns: Vec<String>,
}

impl TupleRecorder {
    pub fn compile(config: &TupleConfig, table: &ParticleTable) -> Result<Self, TupleError> {
        let decay = Descriptor::parse_with(&config.decay, table)?;
        let patterns = compile_patterns(&decay, table)?;
        let branches = resolve_branches(&decay, &config.branches, table)?;

        for name in config.branch_tools.keys() {
            if !config.branches.contains_key(name) {
                return Err(TupleError::Branch {
                    branch: name.clone(),
                    reason: "tools attached to an undeclared branch".to_string(),
                });
            }
        }

        let mut event_tools = Vec::new();
        let mut particle_tools = Vec::new();
        for name in &config.tool_list {
            match tools::from_name(name, &config.tistos)? {
                Tool::Event(t) => event_tools.push(t),
                Tool::Particle(t) => particle_tools.push(t),
            }
        }

        let mut slots = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut tools = particle_tools.clone();
            for t in config.branch_tools.get(&branch.name).into_iter().flatten() {
                tools.push(tools::from_branch_tool(t, table)?);
            }
            slots.push(BranchSlot { branch, tools });
        }

        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        for col in ["nCandidate", "totCandidates", "EventInSequence"] {
            claim_column(&mut columns, &mut seen, col.to_string(), None, "")?;
        }
        for t in &event_tools {
            for col in t.columns() {
                claim_column(&mut columns, &mut seen, col, None, "")?;
            }
        }
        for slot in &slots {
            let b = &slot.branch.name;
            for t in &slot.tools {
                for col in t.columns(&slot.branch) {
                    let fallback = t.instance().map(|i| format!("{b}_{i}_{col}"));
                    claim_column(&mut columns, &mut seen, format!("{b}_{col}"), fallback, b)?;
                }
            }
        }

        tracing::debug!(tuple = %config.name, columns = columns.len(), "tuple configured");
        Ok(Self {
            name: config.name.clone(),
            patterns,
            event_tools,
            slots,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.slots.iter().map(|s| &s.branch)
    }

    /// Rows for the given candidates, in input order. Candidates whose tree
    /// does not match the decay are skipped. `sequence` is the position of
    /// the event in the input, counting from 0.
    pub fn record(
        &self,
        event: &Event,
        sequence: u64,
        store: &CandidateStore,
        table: &ParticleTable,
        candidates: &[CandidateId],
    ) -> Vec<Vec<Option<f64>>> {
        let bound: Vec<BTreeMap<TreePath, CandidateId>> = candidates
            .iter()
            .filter_map(|&id| {
                let b = bind_any(&self.patterns, store, id);
                if b.is_none() {
                    tracing::debug!(candidate = id.index(), "candidate does not match tuple decay");
                }
                b
            })
            .collect();

        let total = bound.len();
        bound
            .iter()
            .enumerate()
            .map(|(n, bindings)| {
                let mut row = Vec::with_capacity(self.columns.len());
                row.push(Some(n as f64));
                row.push(Some(total as f64));
                row.push(Some(sequence as f64));
                for t in &self.event_tools {
                    t.fill(event, &mut row);
                }
                let ctx = ToolContext {
                    event,
                    store,
                    table,
                    bindings,
                };
                for slot in &self.slots {
                    for t in &slot.tools {
                        match bindings.get(&slot.branch.path) {
                            Some(&id) => t.fill(&ctx, &slot.branch, id, &mut row),
                            None => row.extend(t.columns(&slot.branch).iter().map(|_| None)),
                        }
                    }
                }
                debug_assert_eq!(row.len(), self.columns.len());
                row
            })
            .collect()
    }
}
