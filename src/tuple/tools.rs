//! Reconstructed-tuple tools.
//!
//! Every tool declares its columns for a branch once, at configuration
//! time, and pushes exactly that many values per row.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Matrix3;

use super::matcher::TreePath;
use super::recorder::Branch;
use super::{truth, BranchTool, TisTosConfig, TupleError};
use crate::event::{CandidateStore, Event, TriggerDecision};
use crate::expr::{flag, CompiledExpr, EvalContext, Preamble, Scope};
use crate::fit::geometry::{
    best_pv, flight, flight_between, impact_parameter, impact_parameter_chi2, pv_covariance,
    trajectory, Flight,
};
use crate::fit::{refit, TreeFitOptions};
use crate::particles::ParticleTable;
use crate::selection::tagger::{classify, TisTos};
use crate::types::{cos_helicity, CandidateId, TrackId, C_LIGHT};

/// What a tool sees while filling one row.
pub(crate) struct ToolContext<'a> {
    pub event: &'a Event,
    pub store: &'a CandidateStore,
    pub table: &'a ParticleTable,
    pub bindings: &'a BTreeMap<TreePath, CandidateId>,
}

impl<'a> ToolContext<'a> {
    fn mother(&self, branch: &Branch) -> Option<CandidateId> {
        let (_, parent) = branch.path.split_last()?;
        self.bindings.get(parent).copied()
    }
}

/// Tools whose columns are written once per row, without a branch prefix.
#[derive(Debug, Clone)]
pub(crate) enum EventTool {
    EventInfo,
    Primaries,
}

impl EventTool {
    pub fn columns(&self) -> Vec<String> {
        let names: &[&str] = match self {
            EventTool::EventInfo => &["runNumber", "eventNumber", "GpsTime"],
            EventTool::Primaries => &["nPV", "PVX", "PVY", "PVZ", "PVNTRACKS"],
        };
        names.iter().map(|s| s.to_string()).collect()
    }

    pub fn fill(&self, event: &Event, out: &mut Vec<Option<f64>>) {
        match self {
            EventTool::EventInfo => {
                out.push(Some(event.run_number as f64));
                out.push(Some(event.event_number as f64));
                out.push(Some(event.gps_time as f64));
            }
            EventTool::Primaries => {
                let pv = event.primary_vertices.first();
                out.push(Some(event.primary_vertices.len() as f64));
                out.push(pv.map(|p| p.position.x));
                out.push(pv.map(|p| p.position.y));
                out.push(pv.map(|p| p.position.z));
                out.push(pv.map(|p| p.n_tracks as f64));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DecayTreeFitterTool {
    name: String,
    options: TreeFitOptions,
    verbose: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LoKiTool {
    name: String,
    variables: Vec<(String, CompiledExpr)>,
}

/// Tools that write `{branch}_{column}` values for each branch.
#[derive(Debug, Clone)]
pub(crate) enum ParticleTool {
    Geometry,
    Kinematic,
    TrackInfo,
    TisTos(TisTosConfig),
    Angles,
    Pid,
    Propertime,
    McTruth,
    McBackgroundInfo,
    DecayTreeFitter(DecayTreeFitterTool),
    LoKi(LoKiTool),
}

pub(crate) enum Tool {
    Event(EventTool),
    Particle(ParticleTool),
}

/// Tools that read generator-level truth.
pub(crate) const TRUTH_TOOLS: [&str; 2] = ["TupleToolMCTruth", "TupleToolMCBackgroundInfo"];

/// Resolves a `ToolList` entry.
pub(crate) fn from_name(name: &str, tistos: &TisTosConfig) -> Result<Tool, TupleError> {
    let tool = match name {
        "TupleToolEventInfo" => Tool::Event(EventTool::EventInfo),
        "TupleToolPrimaries" => Tool::Event(EventTool::Primaries),
        "TupleToolGeometry" => Tool::Particle(ParticleTool::Geometry),
        "TupleToolKinematic" => Tool::Particle(ParticleTool::Kinematic),
        "TupleToolTrackInfo" => Tool::Particle(ParticleTool::TrackInfo),
        "TupleToolTISTOS" => Tool::Particle(ParticleTool::TisTos(tistos.clone())),
        "TupleToolAngles" => Tool::Particle(ParticleTool::Angles),
        "TupleToolPid" => Tool::Particle(ParticleTool::Pid),
        "TupleToolPropertime" => Tool::Particle(ParticleTool::Propertime),
        "TupleToolMCTruth" => Tool::Particle(ParticleTool::McTruth),
        "TupleToolMCBackgroundInfo" => Tool::Particle(ParticleTool::McBackgroundInfo),
        other => return Err(TupleError::UnknownTool(other.to_string())),
    };
    Ok(tool)
}

/// Compiles a tool attached to a single branch.
pub(crate) fn from_branch_tool(tool: &BranchTool, table: &ParticleTable) -> Result<ParticleTool, TupleError> {
    match tool {
        BranchTool::DecayTreeFitter {
            name,
            daughters_to_constrain,
            constrain_to_origin_vertex,
            verbose,
        } => {
            let mass_constraints = daughters_to_constrain
                .iter()
                .map(|n| {
                    table
                        .by_name(n)
                        .map(|p| p.id)
                        .ok_or_else(|| TupleError::UnknownParticle(n.clone()))
                })
                .collect::<Result<_, _>>()?;
            Ok(ParticleTool::DecayTreeFitter(DecayTreeFitterTool {
                name: name.clone(),
                options: TreeFitOptions {
                    mass_constraints,
                    origin_constraint: *constrain_to_origin_vertex,
                },
                verbose: *verbose,
            }))
        }
        BranchTool::LoKiHybrid {
            name,
            preambulo,
            variables,
        } => {
            let preamble = Preamble::parse(preambulo, table).map_err(|source| TupleError::Expression {
                name: format!("{name} preamble"),
                source,
            })?;
            let variables = variables
                .iter()
                .map(|(var, code)| {
                    CompiledExpr::compile_with(code, Scope::Candidate, table, &preamble)
                        .map(|e| (var.clone(), e))
                        .map_err(|source| TupleError::Expression {
                            name: var.clone(),
                            source,
                        })
                })
                .collect::<Result<_, _>>()?;
            Ok(ParticleTool::LoKi(LoKiTool {
                name: name.clone(),
                variables,
            }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerLevel {
    L0,
    Hlt1,
    Hlt2,
}

impl TriggerLevel {
    const ALL: [TriggerLevel; 3] = [TriggerLevel::L0, TriggerLevel::Hlt1, TriggerLevel::Hlt2];

    fn prefix(self) -> &'static str {
        match self {
            TriggerLevel::L0 => "L0",
            TriggerLevel::Hlt1 => "Hlt1",
            TriggerLevel::Hlt2 => "Hlt2",
        }
    }

    fn of(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| name.starts_with(l.prefix()))
    }
}

fn verbose_triggers(config: &TisTosConfig) -> impl Iterator<Item = &String> {
    config.trigger_list.iter().filter(|name| match TriggerLevel::of(name) {
        Some(TriggerLevel::L0) => config.verbose_l0,
        Some(TriggerLevel::Hlt1) => config.verbose_hlt1,
        Some(TriggerLevel::Hlt2) => config.verbose_hlt2,
        None => true,
    })
}

fn tistos_values(decisions: &[&TriggerDecision], tracks: &BTreeSet<TrackId>, out: &mut Vec<Option<f64>>) {
    for kind in [TisTos::Dec, TisTos::Tis, TisTos::Tos] {
        if decisions.is_empty() {
            out.push(None);
        } else {
            out.push(Some(flag(classify(decisions, tracks, kind))));
        }
    }
}

fn add(cols: &mut Vec<String>, names: &[&str]) {
    cols.extend(names.iter().map(|s| s.to_string()));
}

/// Composite positions below a branch node, relative to it.
fn composite_descendants(branch: &Branch) -> Vec<(TreePath, String)> {
    fn walk(node: &crate::particles::DecayNode, path: &mut TreePath, out: &mut Vec<(TreePath, String)>) {
        for (i, d) in node.daughters.iter().enumerate() {
            path.push(i);
            if !d.is_basic() {
                out.push((path.clone(), column_safe(&d.particle)));
                walk(d, path, out);
            }
            path.pop();
        }
    }
    let mut out = Vec::new();
    walk(&branch.node, &mut Vec::new(), &mut out);
    out
}

/// Particle names as they may appear inside a column name.
fn column_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_end_matches('_')
        .to_string()
}

fn dira(flight: &Flight, momentum: &nalgebra::Vector3<f64>) -> Option<f64> {
    let d = flight.delta.try_normalize(f64::EPSILON)?;
    let p = momentum.try_normalize(f64::EPSILON)?;
    Some(d.dot(&p))
}

impl ParticleTool {
    /// Instance name for branch-attached tools.
    pub fn instance(&self) -> Option<&str> {
        match self {
            ParticleTool::DecayTreeFitter(t) => Some(&t.name),
            ParticleTool::LoKi(t) => Some(&t.name),
            _ => None,
        }
    }

    pub fn columns(&self, branch: &Branch) -> Vec<String> {
        let mut cols: Vec<String> = Vec::new();
        match self {
            ParticleTool::Geometry => {
                add(&mut cols, &["OWNPV_X", "OWNPV_Y", "OWNPV_Z", "IP_OWNPV", "IPCHI2_OWNPV", "MINIP", "MINIPCHI2"]);
                if !branch.is_head() {
                    add(&mut cols, &["ORIVX_X", "ORIVX_Y", "ORIVX_Z"]);
                }
                if !branch.is_basic {
                    add(&mut cols, &[
                        "ENDVERTEX_X",
                        "ENDVERTEX_Y",
                        "ENDVERTEX_Z",
                        "ENDVERTEX_CHI2",
                        "ENDVERTEX_NDOF",
                        "FD_OWNPV",
                        "FDCHI2_OWNPV",
                        "DIRA_OWNPV",
                    ]);
                }
            }
            ParticleTool::Kinematic => add(&mut cols, &["P", "PT", "PE", "PX", "PY", "PZ", "M"]),
            ParticleTool::TrackInfo => {
                if branch.is_basic {
                    add(&mut cols, &["TRACK_Type", "TRACK_Key", "TRACK_CHI2NDOF", "TRACK_GhostProb"]);
                }
            }
            ParticleTool::TisTos(config) => {
                for level in TriggerLevel::ALL {
                    for kind in ["Dec", "TIS", "TOS"] {
                        cols.push(format!("{}Global_{kind}", level.prefix()));
                    }
                }
                for trigger in verbose_triggers(config) {
                    for kind in ["Dec", "TIS", "TOS"] {
                        cols.push(format!("{trigger}_{kind}"));
                    }
                }
            }
            ParticleTool::Angles => {
                if !branch.is_head() {
                    add(&mut cols, &["CosTheta"]);
                }
            }
            ParticleTool::Pid => {
                add(&mut cols, &["ID"]);
                if branch.is_basic {
                    add(&mut cols, &["PIDe", "PIDmu", "PIDK", "PIDp", "ProbNNk", "ProbNNpi", "ProbNNp"]);
                }
            }
            ParticleTool::Propertime => {
                if !branch.is_basic {
                    add(&mut cols, &["TAU", "TAUERR"]);
                }
            }
            ParticleTool::McTruth => add(&mut cols, &[
                "TRUEID",
                "TRUEP_E",
                "TRUEP_X",
                "TRUEP_Y",
                "TRUEP_Z",
                "TRUEPT",
                "TRUEORIGINVERTEX_Z",
                "TRUEENDVERTEX_Z",
            ]),
            ParticleTool::McBackgroundInfo => {
                if !branch.is_basic {
                    add(&mut cols, &["BKGCAT"]);
                }
            }
            ParticleTool::DecayTreeFitter(t) => {
                for col in ["status", "chi2", "nDOF", "M", "P", "PT"] {
                    cols.push(format!("{}_{col}", t.name));
                }
                if t.options.origin_constraint {
                    cols.push(format!("{}_PV_Z", t.name));
                }
                if t.verbose {
                    for (_, particle) in composite_descendants(branch) {
                        cols.push(format!("{}_{particle}_M", t.name));
                        cols.push(format!("{}_{particle}_P", t.name));
                    }
                }
            }
            ParticleTool::LoKi(t) => cols.extend(t.variables.iter().map(|(v, _)| v.clone())),
        }
        cols
    }

    pub fn fill(&self, ctx: &ToolContext<'_>, branch: &Branch, id: CandidateId, out: &mut Vec<Option<f64>>) {
        let c = ctx.store.get(id);
        match self {
            ParticleTool::Geometry => {
                let line = trajectory(ctx.store, ctx.event, id);
                let own = best_pv(ctx.store, ctx.event, id);
                out.push(own.map(|pv| pv.position.x));
                out.push(own.map(|pv| pv.position.y));
                out.push(own.map(|pv| pv.position.z));
                let pair = line.as_ref().zip(own);
                out.push(pair.map(|(l, pv)| impact_parameter(l, pv)));
                out.push(pair.map(|(l, pv)| impact_parameter_chi2(l, pv)));
                let min_over = |f: fn(&crate::fit::geometry::Line, &crate::event::PrimaryVertex) -> f64| {
                    let l = line.as_ref()?;
                    ctx.event
                        .primary_vertices
                        .iter()
                        .map(|pv| f(l, pv))
                        .reduce(f64::min)
                };
                out.push(min_over(impact_parameter));
                out.push(min_over(impact_parameter_chi2));
                if !branch.is_head() {
                    let origin = ctx
                        .mother(branch)
                        .and_then(|m| ctx.store.get(m).end_vertex.as_ref())
                        .map(|v| v.position);
                    out.push(origin.map(|p| p.x));
                    out.push(origin.map(|p| p.y));
                    out.push(origin.map(|p| p.z));
                }
                if !branch.is_basic {
                    let vertex = c.end_vertex.as_ref();
                    out.push(vertex.map(|v| v.position.x));
                    out.push(vertex.map(|v| v.position.y));
                    out.push(vertex.map(|v| v.position.z));
                    out.push(vertex.map(|v| v.chi2));
                    out.push(vertex.map(|v| v.ndof as f64));
                    let fl = vertex
                        .zip(own)
                        .and_then(|(v, pv)| flight(&v.position.to_vector(), &v.covariance, pv));
                    out.push(fl.map(|f| f.distance));
                    out.push(fl.map(|f| f.chi2));
                    out.push(fl.and_then(|f| dira(&f, &c.momentum.momentum())));
                }
            }
            ParticleTool::Kinematic => {
                let p = &c.momentum;
                out.extend([p.p(), p.pt(), p.e, p.px, p.py, p.pz, p.mass()].map(Some));
            }
            ParticleTool::TrackInfo => {
                if branch.is_basic {
                    let track = c.track.and_then(|t| ctx.event.track(t));
                    out.push(track.map(|t| t.track_type.code() as f64));
                    out.push(track.map(|t| t.id.0 as f64));
                    out.push(track.map(|t| t.chi2_per_dof()));
                    out.push(track.map(|t| t.ghost_prob));
                }
            }
            ParticleTool::TisTos(config) => {
                let tracks: BTreeSet<TrackId> = ctx.store.tracks_of(id).into_iter().collect();
                for level in TriggerLevel::ALL {
                    let decisions: Vec<&TriggerDecision> = ctx
                        .event
                        .decisions
                        .iter()
                        .filter(|d| TriggerLevel::of(&d.name) == Some(level))
                        .collect();
                    tistos_values(&decisions, &tracks, out);
                }
                for trigger in verbose_triggers(config) {
                    let decisions: Vec<&TriggerDecision> = ctx.event.decision(trigger).into_iter().collect();
                    tistos_values(&decisions, &tracks, out);
                }
            }
            ParticleTool::Angles => {
                if !branch.is_head() {
                    let mother = ctx.mother(branch).map(|m| ctx.store.get(m).momentum);
                    out.push(mother.and_then(|m| cos_helicity(&c.momentum, &m)));
                }
            }
            ParticleTool::Pid => {
                out.push(Some(c.id.0 as f64));
                if branch.is_basic {
                    let pid = &c.pid;
                    out.extend(
                        [
                            pid.dll_e,
                            pid.dll_mu,
                            pid.dll_k,
                            pid.dll_p,
                            pid.prob_nn_k,
                            pid.prob_nn_pi,
                            pid.prob_nn_p,
                        ]
                        .map(Some),
                    );
                }
            }
            ParticleTool::Propertime => {
                if !branch.is_basic {
                    let (tau, err) = proper_time(ctx, branch, id).unzip();
                    out.push(tau);
                    out.push(err);
                }
            }
            ParticleTool::McTruth => {
                let truth = truth::associate(ctx.store, ctx.event, id).and_then(|k| ctx.event.mc_particle(k));
                out.push(truth.map(|t| t.id.0 as f64));
                out.push(truth.map(|t| t.momentum.e));
                out.push(truth.map(|t| t.momentum.px));
                out.push(truth.map(|t| t.momentum.py));
                out.push(truth.map(|t| t.momentum.pz));
                out.push(truth.map(|t| t.momentum.pt()));
                out.push(truth.map(|t| t.origin.z));
                out.push(truth.and_then(|t| t.end_vertex).map(|v| v.z));
            }
            ParticleTool::McBackgroundInfo => {
                if !branch.is_basic {
                    let category = if ctx.event.is_simulated() {
                        Some(truth::background_category(ctx.store, ctx.event, id) as f64)
                    } else {
                        None
                    };
                    out.push(category);
                }
            }
            ParticleTool::DecayTreeFitter(t) => t.fill(ctx, branch, id, out),
            ParticleTool::LoKi(t) => {
                let eval = EvalContext::new(ctx.event, ctx.store);
                out.extend(t.variables.iter().map(|(_, e)| e.eval_candidate(&eval, id)));
            }
        }
    }
}

/// Proper time (ns) and its error, measured from the mother's decay vertex,
/// or from the best primary vertex for the head.
fn proper_time(ctx: &ToolContext<'_>, branch: &Branch, id: CandidateId) -> Option<(f64, f64)> {
    let c = ctx.store.get(id);
    let vertex = c.end_vertex.as_ref()?;
    let (origin, origin_cov): (_, Matrix3<f64>) = if branch.is_head() {
        let pv = best_pv(ctx.store, ctx.event, id)?;
        (pv.position.to_vector(), pv_covariance(pv))
    } else {
        let mother = ctx.store.get(ctx.mother(branch)?).end_vertex.as_ref()?;
        (mother.position.to_vector(), mother.covariance)
    };
    let fl = flight_between(&vertex.position.to_vector(), &vertex.covariance, &origin, &origin_cov)?;
    let p = c.momentum.p();
    if p <= 0.0 {
        return None;
    }
    let scale = c.momentum.mass() / (p * C_LIGHT);
    let sign = if fl.delta.dot(&c.momentum.momentum()) < 0.0 { -1.0 } else { 1.0 };
    Some((sign * fl.distance * scale, fl.error() * scale))
}

impl DecayTreeFitterTool {
    fn fill(&self, ctx: &ToolContext<'_>, branch: &Branch, id: CandidateId, out: &mut Vec<Option<f64>>) {
        let fit = refit(ctx.store, ctx.event, ctx.table, id, &self.options);
        if let Err(e) = &fit {
            tracing::debug!(tool = %self.name, error = %e, "decay tree refit failed");
        }
        let fit = fit.ok();
        out.push(Some(if fit.is_some() { 0.0 } else { 1.0 }));
        out.push(fit.as_ref().map(|f| f.chi2));
        out.push(fit.as_ref().map(|f| f.ndof as f64));
        out.push(fit.as_ref().map(|f| f.momentum.mass()));
        out.push(fit.as_ref().map(|f| f.momentum.p()));
        out.push(fit.as_ref().map(|f| f.momentum.pt()));
        if self.options.origin_constraint {
            out.push(fit.as_ref().and_then(|f| f.origin).map(|o| o.z));
        }
        if self.verbose {
            for (rel, _) in composite_descendants(branch) {
                let path: TreePath = branch.path.iter().chain(&rel).copied().collect();
                let refitted = fit
                    .as_ref()
                    .zip(ctx.bindings.get(&path))
                    .and_then(|(f, cid)| f.composites.get(cid));
                out.push(refitted.map(|p| p.mass()));
                out.push(refitted.map(|p| p.p()));
            }
        }
    }
}
