use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::NodeError;
use crate::event::{Candidate, CandidateStore, Event};
use crate::expr::{CompiledExpr, EvalContext, Scope};
use crate::fit::fit_vertex;
use crate::fit::geometry::trajectory;
use crate::particles::{Descriptor, ParticleId, ParticleTable};
use crate::types::{CandidateId, FourMomentum};

/// Configuration of a combiner node, as written in job options.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombinerConfig {
    pub decay_descriptor: String,
    /// Per-daughter cuts keyed by particle name; `""` applies to daughters
    /// without their own entry.
    #[serde(default)]
    pub daughters_cuts: BTreeMap<String, String>,
    #[serde(default)]
    pub combination_cut: String,
    #[serde(default)]
    pub mother_cut: String,
}

#[derive(Debug, Clone)]
struct Pattern {
    mother: ParticleId,
    daughters: Vec<ParticleId>,
}

/// Running totals for one combiner over the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombinerStats {
    pub combinations: u64,
    pub overlaps: u64,
    pub failed_combination_cut: u64,
    pub failed_fit: u64,
    pub failed_mother_cut: u64,
    pub accepted: u64,
}

#[derive(Debug, Clone)]
pub struct Combiner {
    patterns: Vec<Pattern>,
    daughter_cuts: BTreeMap<ParticleId, CompiledExpr>,
    default_cut: Option<CompiledExpr>,
    combination_cut: Option<CompiledExpr>,
    mother_cut: Option<CompiledExpr>,
}

fn optional_cut(src: &str, scope: Scope, table: &ParticleTable) -> Result<Option<CompiledExpr>, NodeError> {
    if src.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(CompiledExpr::compile_cut(src, scope, table)?))
}

impl Combiner {
    pub fn compile(config: &CombinerConfig, table: &ParticleTable) -> Result<Self, NodeError> {
        let descriptor = Descriptor::parse_with(&config.decay_descriptor, table)?;
        if descriptor.head.daughters.is_empty() {
            return Err(NodeError::Shape(format!(
                "'{}' has no daughters",
                config.decay_descriptor
            )));
        }
        if descriptor.head.daughters.iter().any(|d| !d.is_basic()) {
            return Err(NodeError::Shape(format!(
                "'{}': combiner descriptors must be one level deep",
                config.decay_descriptor
            )));
        }

        let id_of = |name: &str| -> Result<ParticleId, NodeError> {
            table
                .by_name(name)
                .map(|p| p.id)
                .ok_or_else(|| NodeError::UnknownParticle(name.to_string()))
        };

        let mut patterns = Vec::new();
        for node in descriptor.patterns(table)? {
            patterns.push(Pattern {
                mother: id_of(&node.particle)?,
                daughters: node
                    .daughters
                    .iter()
                    .map(|d| id_of(&d.particle))
                    .collect::<Result<_, _>>()?,
            });
        }

        let mut daughter_cuts = BTreeMap::new();
        let mut default_cut = None;
        for (name, code) in &config.daughters_cuts {
            let cut = CompiledExpr::compile_cut(code, Scope::Candidate, table)?;
            if name.is_empty() {
                default_cut = Some(cut);
            } else {
                daughter_cuts.insert(id_of(name)?, cut);
            }
        }
        // A cut given for one charge also covers the conjugate unless that
        // has its own entry.
        let explicit: Vec<ParticleId> = daughter_cuts.keys().copied().collect();
        for id in explicit {
            let anti = ParticleId(-id.0);
            if table.by_id(anti).is_some() && !daughter_cuts.contains_key(&anti) {
                let cut = daughter_cuts[&id].clone();
                daughter_cuts.insert(anti, cut);
            }
        }

        Ok(Self {
            patterns,
            daughter_cuts,
            default_cut,
            combination_cut: optional_cut(&config.combination_cut, Scope::Combination, table)?,
            mother_cut: optional_cut(&config.mother_cut, Scope::Candidate, table)?,
        })
    }

    fn daughter_cut(&self, id: ParticleId) -> Option<&CompiledExpr> {
        self.daughter_cuts.get(&id).or(self.default_cut.as_ref())
    }

    /// Builds every valid combination of the input candidates.
    ///
    /// Output order is deterministic: pattern order, then daughters in
    /// input order.
    pub fn run(
        &self,
        inputs: &[CandidateId],
        store: &mut CandidateStore,
        event: &Event,
        table: &ParticleTable,
        stats: &mut CombinerStats,
    ) -> Vec<CandidateId> {
        let mut pool: Vec<CandidateId> = Vec::with_capacity(inputs.len());
        let mut seen = BTreeSet::new();
        for &id in inputs {
            if seen.insert(id) {
                pool.push(id);
            }
        }

        // a. daughter cuts, evaluated once per candidate and type
        let mut passing: BTreeMap<ParticleId, Vec<CandidateId>> = BTreeMap::new();
        {
            let ctx = EvalContext::new(event, store);
            let wanted: BTreeSet<ParticleId> = self
                .patterns
                .iter()
                .flat_map(|p| p.daughters.iter().copied())
                .collect();
            for pid in wanted {
                let cut = self.daughter_cut(pid);
                let list = pool
                    .iter()
                    .copied()
                    .filter(|&c| store.get(c).id == pid)
                    .filter(|&c| cut.map_or(true, |cut| cut.accepts_candidate(&ctx, c)))
                    .collect();
                passing.insert(pid, list);
            }
        }

        let mut accepted = Vec::new();
        for pattern in &self.patterns {
            let mut combos = Vec::new();
            enumerate(&pattern.daughters, &passing, &mut Vec::new(), &mut combos);
            for combo in combos {
                stats.combinations += 1;
                if let Some(id) = self.try_combination(pattern, &combo, store, event, table, stats) {
                    accepted.push(id);
                }
            }
        }
        stats.accepted += accepted.len() as u64;
        accepted
    }

    fn try_combination(
        &self,
        pattern: &Pattern,
        daughters: &[CandidateId],
        store: &mut CandidateStore,
        event: &Event,
        table: &ParticleTable,
        stats: &mut CombinerStats,
    ) -> Option<CandidateId> {
        let mut tracks = BTreeSet::new();
        for &d in daughters {
            for t in store.tracks_of(d) {
                if !tracks.insert(t) {
                    stats.overlaps += 1;
                    return None;
                }
            }
        }

        // b. combination cut, before any fit
        if let Some(cut) = &self.combination_cut {
            let ctx = EvalContext::new(event, store);
            if !cut.accepts_combination(&ctx, daughters) {
                stats.failed_combination_cut += 1;
                return None;
            }
        }

        // c. vertex fit
        let lines = daughters
            .iter()
            .map(|&d| trajectory(store, event, d))
            .collect::<Option<Vec<_>>>();
        let vertex = match lines.map(|l| fit_vertex(&l)) {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                tracing::trace!(error = %e, "vertex fit failed");
                stats.failed_fit += 1;
                return None;
            }
            None => {
                stats.failed_fit += 1;
                return None;
            }
        };

        let momentum: FourMomentum = daughters.iter().map(|&d| store.get(d).momentum).sum();
        let charge = table.by_id(pattern.mother).map_or_else(
            || daughters.iter().map(|&d| store.get(d).charge).sum(),
            |p| p.charge,
        );
        let id = store.insert(Candidate::composite(
            pattern.mother,
            momentum,
            charge,
            daughters.to_vec(),
            vertex,
        ));

        // d. mother cut on the fitted candidate
        if let Some(cut) = &self.mother_cut {
            let ctx = EvalContext::new(event, store);
            if !cut.accepts_candidate(&ctx, id) {
                stats.failed_mother_cut += 1;
                store.discard_last(id);
                return None;
            }
        }
        Some(id)
    }
}

/// Cartesian product over daughter slots. Slots of the same type take
/// candidates in increasing order so each unordered set appears once.
fn enumerate(
    slots: &[ParticleId],
    passing: &BTreeMap<ParticleId, Vec<CandidateId>>,
    chosen: &mut Vec<CandidateId>,
    out: &mut Vec<Vec<CandidateId>>,
) {
    let k = chosen.len();
    if k == slots.len() {
        out.push(chosen.clone());
        return;
    }
    let pid = slots[k];
    let floor = (0..k)
        .rev()
        .find(|&j| slots[j] == pid)
        .map(|j| chosen[j]);
    let Some(list) = passing.get(&pid) else {
        return;
    };
    for &c in list {
        if floor.is_some_and(|f| c <= f) || chosen.contains(&c) {
            continue;
        }
        chosen.push(c);
        enumerate(slots, passing, chosen, out);
        chosen.pop();
    }
}
