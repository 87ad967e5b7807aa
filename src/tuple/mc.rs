//! Generator-level decay-tree tuple.

use std::collections::{BTreeMap, BTreeSet};

use super::matcher::{bind_any, CompiledPattern, McTree, TreePath};
use super::recorder::{claim_column, compile_patterns, resolve_branches, Branch};
use super::truth::{ancestry, final_state};
use super::{McTupleConfig, TupleError};
use crate::event::{Event, McParticle};
use crate::expr::flag;
use crate::particles::{Descriptor, ParticleTable};
use crate::types::{cos_helicity, McKey, C_LIGHT};

/// Distance (mm) within which a generated origin counts as a primary vertex.
const PROMPT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum McTool {
    Kinematic,
    Angles,
    EventType,
    Pid,
    Primaries,
    Prompt,
    Interactions,
    Reconstructed,
    Hierarchy,
}

impl McTool {
    fn from_name(name: &str) -> Result<Self, TupleError> {
        Ok(match name {
            "MCTupleToolKinematic" => McTool::Kinematic,
            "MCTupleToolAngles" => McTool::Angles,
            "MCTupleToolEventType" => McTool::EventType,
            "MCTupleToolPID" => McTool::Pid,
            "MCTupleToolPrimaries" => McTool::Primaries,
            "MCTupleToolPrompt" => McTool::Prompt,
            "MCTupleToolInteractions" => McTool::Interactions,
            "MCTupleToolReconstructed" => McTool::Reconstructed,
            "MCTupleToolHierarchy" => McTool::Hierarchy,
            other => return Err(TupleError::UnknownTool(other.to_string())),
        })
    }

    fn is_event_level(self) -> bool {
        matches!(self, McTool::EventType | McTool::Primaries | McTool::Interactions)
    }

    fn columns(self, branch: Option<&Branch>) -> Vec<&'static str> {
        match self {
            McTool::EventType => vec!["EventType"],
            McTool::Primaries => vec!["nMCPV", "MCPVX", "MCPVY", "MCPVZ"],
            McTool::Interactions => vec!["EVT_Int_I"],
            McTool::Kinematic => vec![
                "TRUEP_E",
                "TRUEP_X",
                "TRUEP_Y",
                "TRUEP_Z",
                "TRUEPT",
                "TRUEORIGINVERTEX_X",
                "TRUEORIGINVERTEX_Y",
                "TRUEORIGINVERTEX_Z",
                "TRUEENDVERTEX_X",
                "TRUEENDVERTEX_Y",
                "TRUEENDVERTEX_Z",
                "TRUEISSTABLE",
                "TRUETAU",
            ],
            McTool::Angles => match branch {
                Some(b) if !b.is_head() => vec!["TRUECosTheta"],
                _ => Vec::new(),
            },
            McTool::Pid => vec!["TRUEID"],
            McTool::Prompt => vec!["MC_ISPROMPT"],
            McTool::Reconstructed => vec!["Reconstructible", "Reconstructed"],
            McTool::Hierarchy => vec![
                "MC_MOTHER_ID",
                "MC_MOTHER_KEY",
                "MC_GD_MOTHER_ID",
                "MC_GD_MOTHER_KEY",
                "MC_GD_GD_MOTHER_ID",
                "MC_GD_GD_MOTHER_KEY",
            ],
        }
    }

    fn fill_event(self, event: &Event, out: &mut Vec<Option<f64>>) {
        match self {
            McTool::EventType => out.push(event.event_type.map(f64::from)),
            McTool::Primaries => {
                let pv = event.mc_primary_vertices.first();
                out.push(Some(event.mc_primary_vertices.len() as f64));
                out.push(pv.map(|p| p.x));
                out.push(pv.map(|p| p.y));
                out.push(pv.map(|p| p.z));
            }
            McTool::Interactions => out.push(Some(event.mc_primary_vertices.len() as f64)),
            _ => {}
        }
    }

    fn fill_particle(
        self,
        event: &Event,
        table: &ParticleTable,
        branch: &Branch,
        bindings: &BTreeMap<TreePath, McKey>,
        particle: &McParticle,
        out: &mut Vec<Option<f64>>,
    ) {
        let p = &particle.momentum;
        match self {
            McTool::Kinematic => {
                out.extend([p.e, p.px, p.py, p.pz, p.pt()].map(Some));
                out.extend([particle.origin.x, particle.origin.y, particle.origin.z].map(Some));
                let end = particle.end_vertex;
                out.push(end.map(|v| v.x));
                out.push(end.map(|v| v.y));
                out.push(end.map(|v| v.z));
                out.push(Some(flag(particle.daughters.is_empty())));
                out.push(end.and_then(|v| {
                    let flight = (v.to_vector() - particle.origin.to_vector()).norm();
                    let momentum = p.p();
                    (momentum > 0.0).then(|| flight * p.mass() / (momentum * C_LIGHT))
                }));
            }
            McTool::Angles => {
                if !branch.is_head() {
                    let mother = branch
                        .path
                        .split_last()
                        .and_then(|(_, parent)| bindings.get(parent))
                        .and_then(|&k| event.mc_particle(k));
                    out.push(mother.and_then(|m| cos_helicity(p, &m.momentum)));
                }
            }
            McTool::Pid => out.push(Some(particle.id.0 as f64)),
            McTool::Prompt => {
                let origin = particle.origin.to_vector();
                let prompt = event
                    .mc_primary_vertices
                    .iter()
                    .any(|pv| (pv.to_vector() - origin).norm() < PROMPT_TOLERANCE);
                out.push(Some(flag(prompt)));
            }
            McTool::Reconstructed => {
                let finals = final_state(event, particle.key);
                let charged: Vec<&McParticle> = finals
                    .iter()
                    .filter_map(|&k| event.mc_particle(k))
                    .filter(|f| table.by_id(f.id).map_or(false, |prop| prop.charge != 0))
                    .collect();
                let reconstructible = !charged.is_empty() && charged.len() == finals.len();
                let reconstructed = !charged.is_empty()
                    && charged
                        .iter()
                        .all(|f| event.tracks.iter().any(|t| t.mc_key == Some(f.key)));
                out.push(Some(flag(reconstructible)));
                out.push(Some(flag(reconstructed)));
            }
            McTool::Hierarchy => {
                let lineage = ancestry(event, particle.key);
                for generation in 1..=3 {
                    let ancestor = lineage.get(generation).and_then(|&k| event.mc_particle(k));
                    out.push(ancestor.map(|a| a.id.0 as f64));
                    out.push(ancestor.map(|a| a.key.0 as f64));
                }
            }
            McTool::EventType | McTool::Primaries | McTool::Interactions => {}
        }
    }
}

/// Records one row per generated particle whose decay matches the pattern.
pub struct McTupleRecorder {
    name: String,
    patterns: Vec<CompiledPattern>,
    branches: Vec<Branch>,
    event_tools: Vec<McTool>,
    particle_tools: Vec<McTool>,
    columns: Vec<String>,
}

impl McTupleRecorder {
    pub fn compile(config: &McTupleConfig, table: &ParticleTable) -> Result<Self, TupleError> {
        let decay = Descriptor::parse_with(&config.decay, table)?;
        let patterns = compile_patterns(&decay, table)?;
        let branches = resolve_branches(&decay, &config.branches, table)?;

        let (event_tools, particle_tools): (Vec<McTool>, Vec<McTool>) = config
            .tool_list
            .iter()
            .map(|n| McTool::from_name(n))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .partition(|t| t.is_event_level());

        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        for col in ["runNumber", "eventNumber"] {
            claim_column(&mut columns, &mut seen, col.to_string(), None, "")?;
        }
        for t in &event_tools {
            for col in t.columns(None) {
                claim_column(&mut columns, &mut seen, col.to_string(), None, "")?;
            }
        }
        for b in &branches {
            for t in &particle_tools {
                for col in t.columns(Some(b)) {
                    claim_column(&mut columns, &mut seen, format!("{}_{col}", b.name), None, &b.name)?;
                }
            }
        }

        Ok(Self {
            name: config.name.clone(),
            patterns,
            branches,
            event_tools,
            particle_tools,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn record(&self, event: &Event, table: &ParticleTable) -> Vec<Vec<Option<f64>>> {
        let view = McTree(event);
        let heads: BTreeSet<i32> = self.patterns.iter().map(|p| p.head().0).collect();
        event
            .mc_particles
            .iter()
            .filter(|p| heads.contains(&p.id.0))
            .filter_map(|p| bind_any(&self.patterns, &view, p.key))
            .map(|bindings| {
                let mut row = Vec::with_capacity(self.columns.len());
                row.push(Some(event.run_number as f64));
                row.push(Some(event.event_number as f64));
                for t in &self.event_tools {
                    t.fill_event(event, &mut row);
                }
                for b in &self.branches {
                    let particle = bindings.get(&b.path).and_then(|&k| event.mc_particle(k));
                    for t in &self.particle_tools {
                        match particle {
                            Some(p) => t.fill_particle(event, table, b, &bindings, p, &mut row),
                            None => row.extend(t.columns(Some(b)).iter().map(|_| None)),
                        }
                    }
                }
                debug_assert_eq!(row.len(), self.columns.len());
                row
            })
            .collect()
    }
}
