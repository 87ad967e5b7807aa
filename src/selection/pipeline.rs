use std::collections::BTreeMap;

use super::combiner::{Combiner, CombinerStats};
use super::filter::Filter;
use super::tagger::Tagger;
use super::{Algorithm, NodeError, SelectionSpec};
use crate::event::{CandidateStore, Event};
use crate::expr::EvalContext;
use crate::particles::ParticleTable;
use crate::types::{CandidateId, SelectionName};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Duplicate selection name: {0}")]
    DuplicateSelection(SelectionName),
    #[error("Selection '{selection}' requires undeclared selection '{missing}'")]
    UndeclaredSelection {
        selection: SelectionName,
        missing: SelectionName,
    },
    #[error("Dependency cycle: {0}")]
    Cycle(String),
    #[error("Top selection '{0}' is not declared")]
    UnknownTop(SelectionName),
    #[error("Selection '{selection}' expects {expected} input(s), got {got}")]
    Arity {
        selection: SelectionName,
        expected: &'static str,
        got: usize,
    },
    #[error("Selection '{selection}': {source}")]
    Node {
        selection: SelectionName,
        #[source]
        source: NodeError,
    },
}

#[derive(Debug, Clone)]
enum Operation {
    Source(String),
    Combine(Combiner),
    Filter(Filter),
    Tag(Tagger),
}

#[derive(Debug, Clone)]
struct Node {
    name: SelectionName,
    inputs: Vec<usize>,
    op: Operation,
}

/// Candidates produced by each executed selection in one event.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    selections: BTreeMap<SelectionName, Vec<CandidateId>>,
    top: Option<SelectionName>,
}

impl PipelineOutput {
    pub fn get(&self, name: &SelectionName) -> Option<&[CandidateId]> {
        self.selections.get(name).map(Vec::as_slice)
    }

    pub fn top(&self) -> &[CandidateId] {
        self.top
            .as_ref()
            .and_then(|t| self.get(t))
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SelectionName, &Vec<CandidateId>)> {
        self.selections.iter()
    }
}

/// A validated selection graph, linearised for execution.
#[derive(Debug, Clone)]
pub struct Pipeline {
    nodes: Vec<Node>,
    order: Vec<usize>,
    top: usize,
    stats: BTreeMap<SelectionName, CombinerStats>,
}

impl Pipeline {
    /// Validates and compiles the graph. All configuration errors surface
    /// here, before any event is read.
    pub fn build(
        specs: &[SelectionSpec],
        top: &SelectionName,
        table: &ParticleTable,
    ) -> Result<Self, PipelineError> {
        // 1. Index names
        let mut index = BTreeMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(PipelineError::DuplicateSelection(spec.name.clone()));
            }
        }

        // 2. Resolve edges and compile operations
        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            let inputs = spec
                .inputs
                .iter()
                .map(|dep| {
                    index.get(dep).copied().ok_or_else(|| PipelineError::UndeclaredSelection {
                        selection: spec.name.clone(),
                        missing: dep.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            check_arity(spec)?;
            let op = compile(&spec.algorithm, table).map_err(|source| PipelineError::Node {
                selection: spec.name.clone(),
                source,
            })?;
            nodes.push(Node {
                name: spec.name.clone(),
                inputs,
                op,
            });
        }

        // 3. Reject cycles anywhere in the graph
        let mut marks = vec![Mark::New; nodes.len()];
        for i in 0..nodes.len() {
            visit(&nodes, i, &mut marks, &mut Vec::new(), &mut Vec::new())?;
        }

        // 4. Execution order: dependencies of the top selection, post-order
        let top = *index
            .get(top)
            .ok_or_else(|| PipelineError::UnknownTop(top.clone()))?;
        let mut order = Vec::new();
        let mut marks = vec![Mark::New; nodes.len()];
        visit(&nodes, top, &mut marks, &mut Vec::new(), &mut order)?;

        let skipped = nodes.len() - order.len();
        if skipped > 0 {
            tracing::debug!(skipped, "selections not reachable from the top selection");
        }

        Ok(Self {
            nodes,
            order,
            top,
            stats: BTreeMap::new(),
        })
    }

    pub fn top(&self) -> &SelectionName {
        &self.nodes[self.top].name
    }

    /// Selection names in execution order.
    pub fn order(&self) -> impl Iterator<Item = &SelectionName> {
        self.order.iter().map(|&i| &self.nodes[i].name)
    }

    pub fn combiner_stats(&self) -> &BTreeMap<SelectionName, CombinerStats> {
        &self.stats
    }

    /// Runs every selection once, in dependency order.
    pub fn run(
        &mut self,
        event: &Event,
        store: &mut CandidateStore,
        table: &ParticleTable,
    ) -> PipelineOutput {
        let mut results: Vec<Option<Vec<CandidateId>>> = vec![None; self.nodes.len()];

        for &i in &self.order {
            let node = &self.nodes[i];
            let inputs: Vec<CandidateId> = node
                .inputs
                .iter()
                .flat_map(|&j| results[j].as_deref().unwrap_or(&[]).iter().copied())
                .collect();

            let produced = match &node.op {
                Operation::Source(location) => store.load_container(event, location, table),
                Operation::Filter(filter) => {
                    let ctx = EvalContext::new(event, store);
                    filter.run(&inputs, &ctx)
                }
                Operation::Tag(tagger) => tagger.run(&inputs, store, event),
                Operation::Combine(combiner) => {
                    let stats = self.stats.entry(node.name.clone()).or_default();
                    combiner.run(&inputs, store, event, table, stats)
                }
            };
            tracing::debug!(
                selection = %node.name,
                inputs = inputs.len(),
                outputs = produced.len(),
                "selection executed"
            );
            results[i] = Some(produced);
        }

        let selections = self
            .order
            .iter()
            .filter_map(|&i| Some((self.nodes[i].name.clone(), results[i].take()?)))
            .collect();
        PipelineOutput {
            selections,
            top: Some(self.nodes[self.top].name.clone()),
        }
    }
}

fn check_arity(spec: &SelectionSpec) -> Result<(), PipelineError> {
    let got = spec.inputs.len();
    let (ok, expected) = match spec.algorithm {
        Algorithm::Source { .. } => (got == 0, "0"),
        Algorithm::Filter(_) | Algorithm::Tag(_) => (got == 1, "exactly 1"),
        Algorithm::Combine(_) => (got >= 1, "at least 1"),
    };
    if ok {
        Ok(())
    } else {
        Err(PipelineError::Arity {
            selection: spec.name.clone(),
            expected,
            got,
        })
    }
}

fn compile(algorithm: &Algorithm, table: &ParticleTable) -> Result<Operation, NodeError> {
    Ok(match algorithm {
        Algorithm::Source { location } => Operation::Source(location.clone()),
        Algorithm::Combine(c) => Operation::Combine(Combiner::compile(c, table)?),
        Algorithm::Filter(f) => Operation::Filter(Filter::compile(f, table)?),
        Algorithm::Tag(t) => Operation::Tag(Tagger::compile(t)?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

fn visit(
    nodes: &[Node],
    i: usize,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), PipelineError> {
    match marks[i] {
        Mark::Done => return Ok(()),
        Mark::Active => {
            let start = path.iter().position(|&p| p == i).unwrap_or(0);
            let mut names: Vec<&str> = path[start..].iter().map(|&p| nodes[p].name.as_str()).collect();
            names.push(nodes[i].name.as_str());
            return Err(PipelineError::Cycle(names.join(" -> ")));
        }
        Mark::New => {}
    }
    marks[i] = Mark::Active;
    path.push(i);
    for &dep in &nodes[i].inputs {
        visit(nodes, dep, marks, path, order)?;
    }
    path.pop();
    marks[i] = Mark::Done;
    order.push(i);
    Ok(())
}
