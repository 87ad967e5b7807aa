use super::ast::{BinOp, Expr, Functor, VertexVar};
use super::flag;
use crate::event::{CandidateStore, Event};
use crate::fit::geometry::{
    best_pv, doca, doca_chi2, flight, impact_parameter, impact_parameter_chi2, trajectory,
    Flight, Line,
};
use crate::fit::FittedVertex;
use crate::types::{cos_helicity, CandidateId, FourMomentum};

/// Everything a functor may look at while evaluating.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub event: &'a Event,
    pub store: &'a CandidateStore,
}

impl<'a> EvalContext<'a> {
    pub fn new(event: &'a Event, store: &'a CandidateStore) -> Self {
        Self { event, store }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Target<'t> {
    Candidate(CandidateId),
    Combination(&'t [CandidateId]),
    Event,
}

pub(crate) fn is_true(v: f64) -> bool {
    v > 0.0
}

impl Expr {
    /// `None` means the quantity is undefined for this target (no vertex,
    /// no primary vertex, missing daughter, ...).
    pub(crate) fn eval(&self, ctx: &EvalContext<'_>, target: Target<'_>) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Neg(a) => Some(-a.eval(ctx, target)?),
            Expr::Not(a) => Some(flag(!is_true(a.eval(ctx, target)?))),
            Expr::Binary(op, a, b) => eval_binary(*op, a, b, ctx, target),
            Expr::Functor(f) => match target {
                Target::Candidate(id) => f.eval_candidate(ctx, id),
                Target::Combination(ds) => f.eval_combination(ctx, ds),
                Target::Event => f.eval_event(ctx),
            },
        }
    }
}

fn eval_binary(
    op: BinOp,
    a: &Expr,
    b: &Expr,
    ctx: &EvalContext<'_>,
    target: Target<'_>,
) -> Option<f64> {
    match op {
        // A definite false (true) on either side decides the result even
        // when the other side has no value.
        BinOp::And => {
            let lhs = a.eval(ctx, target);
            if lhs.is_some_and(|v| !is_true(v)) {
                return Some(0.0);
            }
            let rhs = b.eval(ctx, target);
            if rhs.is_some_and(|v| !is_true(v)) {
                return Some(0.0);
            }
            lhs.and(rhs).map(|_| 1.0)
        }
        BinOp::Or => {
            let lhs = a.eval(ctx, target);
            if lhs.is_some_and(is_true) {
                return Some(1.0);
            }
            let rhs = b.eval(ctx, target);
            if rhs.is_some_and(is_true) {
                return Some(1.0);
            }
            lhs.and(rhs).map(|_| 0.0)
        }
        _ => {
            let lhs = a.eval(ctx, target)?;
            let rhs = b.eval(ctx, target)?;
            match op {
                BinOp::Add => Some(lhs + rhs),
                BinOp::Sub => Some(lhs - rhs),
                BinOp::Mul => Some(lhs * rhs),
                BinOp::Div => (rhs != 0.0).then(|| lhs / rhs),
                BinOp::Eq => Some(flag((lhs - rhs).abs() < f64::EPSILON)),
                BinOp::Ne => Some(flag((lhs - rhs).abs() >= f64::EPSILON)),
                BinOp::Lt => Some(flag(lhs < rhs)),
                BinOp::Le => Some(flag(lhs <= rhs)),
                BinOp::Gt => Some(flag(lhs > rhs)),
                BinOp::Ge => Some(flag(lhs >= rhs)),
                BinOp::And | BinOp::Or => unreachable!(),
            }
        }
    }
}

fn vertex_value(v: &FittedVertex, var: VertexVar) -> f64 {
    match var {
        VertexVar::X => v.position.x,
        VertexVar::Y => v.position.y,
        VertexVar::Z => v.position.z,
        VertexVar::Chi2 => v.chi2,
        VertexVar::Chi2PerDof => v.chi2_per_dof(),
        VertexVar::Ndof => v.ndof as f64,
    }
}

fn best_pv_flight(ctx: &EvalContext<'_>, id: CandidateId) -> Option<Flight> {
    let vertex = ctx.store.get(id).end_vertex.as_ref()?;
    let pv = best_pv(ctx.store, ctx.event, id)?;
    flight(&vertex.position.to_vector(), &vertex.covariance, pv)
}

/// Values of `f` over all unordered pairs; `None` if any trajectory is missing.
fn pair_values(
    ctx: &EvalContext<'_>,
    ids: &[CandidateId],
    f: impl Fn(&Line, &Line) -> f64,
) -> Option<Vec<f64>> {
    let lines = ids
        .iter()
        .map(|&d| trajectory(ctx.store, ctx.event, d))
        .collect::<Option<Vec<_>>>()?;
    let mut out = Vec::new();
    for i in 0..lines.len() {
        for j in i + 1..lines.len() {
            out.push(f(&lines[i], &lines[j]));
        }
    }
    Some(out)
}

fn max_of(values: Vec<f64>) -> Option<f64> {
    values.into_iter().reduce(f64::max)
}

fn pair(
    ctx: &EvalContext<'_>,
    ids: &[CandidateId],
    i: usize,
    j: usize,
    f: impl Fn(&Line, &Line) -> f64,
) -> Option<f64> {
    let a = trajectory(ctx.store, ctx.event, *ids.get(i - 1)?)?;
    let b = trajectory(ctx.store, ctx.event, *ids.get(j - 1)?)?;
    Some(f(&a, &b))
}

fn tree_values(
    ctx: &EvalContext<'_>,
    id: CandidateId,
    pred: &Expr,
    fun: &Expr,
) -> Vec<f64> {
    ctx.store
        .tree(id)
        .into_iter()
        .filter(|&n| {
            pred.eval(ctx, Target::Candidate(n))
                .is_some_and(is_true)
        })
        .filter_map(|n| fun.eval(ctx, Target::Candidate(n)))
        .collect()
}

impl Functor {
    fn eval_candidate(&self, ctx: &EvalContext<'_>, id: CandidateId) -> Option<f64> {
        let c = ctx.store.get(id);
        let p4 = c.momentum;
        match self {
            Functor::P => Some(p4.p()),
            Functor::Pt => Some(p4.pt()),
            Functor::Px => Some(p4.px),
            Functor::Py => Some(p4.py),
            Functor::Pz => Some(p4.pz),
            Functor::E => Some(p4.e),
            Functor::M | Functor::Mm => Some(p4.mass()),
            Functor::Eta => Some(p4.eta()),
            Functor::Phi => Some(p4.phi()),
            Functor::Q => Some(c.charge as f64),
            Functor::Id => Some(c.id.0 as f64),
            Functor::AbsId => Some(c.id.abs() as f64),
            Functor::TrChi2Dof => Some(ctx.event.track(c.track?)?.chi2_per_dof()),
            Functor::TrGhostProb => Some(ctx.event.track(c.track?)?.ghost_prob),
            Functor::PidE => c.track.map(|_| c.pid.dll_e),
            Functor::PidMu => c.track.map(|_| c.pid.dll_mu),
            Functor::PidK => c.track.map(|_| c.pid.dll_k),
            Functor::PidP => c.track.map(|_| c.pid.dll_p),
            Functor::ProbNnK => c.track.map(|_| c.pid.prob_nn_k),
            Functor::ProbNnPi => c.track.map(|_| c.pid.prob_nn_pi),
            Functor::ProbNnP => c.track.map(|_| c.pid.prob_nn_p),
            Functor::EndVertex(var) => Some(vertex_value(c.end_vertex.as_ref()?, *var)),
            Functor::BestPv(var) => {
                let pv = best_pv(ctx.store, ctx.event, id)?;
                Some(match var {
                    VertexVar::X => pv.position.x,
                    VertexVar::Y => pv.position.y,
                    VertexVar::Z => pv.position.z,
                    VertexVar::Chi2 => pv.chi2,
                    VertexVar::Chi2PerDof if pv.ndof > 0 => pv.chi2 / pv.ndof as f64,
                    VertexVar::Chi2PerDof => 0.0,
                    VertexVar::Ndof => pv.ndof as f64,
                })
            }
            Functor::BpvVd => Some(best_pv_flight(ctx, id)?.distance),
            Functor::BpvVdChi2 => Some(best_pv_flight(ctx, id)?.chi2),
            Functor::BpvDira => {
                let f = best_pv_flight(ctx, id)?;
                let dir = f.delta.try_normalize(f64::EPSILON)?;
                let p = p4.momentum().try_normalize(f64::EPSILON)?;
                Some(dir.dot(&p))
            }
            Functor::BpvIp | Functor::BpvIpChi2 => {
                let line = trajectory(ctx.store, ctx.event, id)?;
                let pv = best_pv(ctx.store, ctx.event, id)?;
                Some(if matches!(self, Functor::BpvIp) {
                    impact_parameter(&line, pv)
                } else {
                    impact_parameter_chi2(&line, pv)
                })
            }
            Functor::MipDv | Functor::MipChi2Dv => {
                let line = trajectory(ctx.store, ctx.event, id)?;
                let chi2 = matches!(self, Functor::MipChi2Dv);
                ctx.event
                    .primary_vertices
                    .iter()
                    .map(|pv| {
                        if chi2 {
                            impact_parameter_chi2(&line, pv)
                        } else {
                            impact_parameter(&line, pv)
                        }
                    })
                    .reduce(f64::min)
            }
            Functor::DMass(m) => Some(p4.mass() - m),
            Functor::AdMass(m) => Some((p4.mass() - m).abs()),
            Functor::DocaMax => {
                if c.daughters.len() < 2 {
                    return None;
                }
                max_of(pair_values(ctx, &c.daughters, doca)?)
            }
            Functor::DocaChi2Max => {
                if c.daughters.len() < 2 {
                    return None;
                }
                max_of(pair_values(ctx, &c.daughters, doca_chi2)?)
            }
            Functor::Lv01 => {
                let first = ctx.store.get(*c.daughters.first()?).momentum;
                cos_helicity(&first, &p4)
            }
            Functor::IsBasic => Some(flag(c.is_basic())),
            Functor::HasTrack => Some(flag(c.track.is_some())),
            Functor::All => Some(1.0),
            Functor::Never => Some(0.0),
            Functor::Child(e, i) => {
                let d = *c.daughters.get(i - 1)?;
                e.eval(ctx, Target::Candidate(d))
            }
            Functor::MaxTree(pred, fun, default) => {
                Some(max_of(tree_values(ctx, id, pred, fun)).unwrap_or(*default))
            }
            Functor::MinTree(pred, fun, default) => Some(
                tree_values(ctx, id, pred, fun)
                    .into_iter()
                    .reduce(f64::min)
                    .unwrap_or(*default),
            ),
            Functor::NInTree(pred) => Some(
                ctx.store
                    .tree(id)
                    .into_iter()
                    .filter(|&n| pred.eval(ctx, Target::Candidate(n)).is_some_and(is_true))
                    .count() as f64,
            ),
            _ => None,
        }
    }

    fn eval_combination(&self, ctx: &EvalContext<'_>, ids: &[CandidateId]) -> Option<f64> {
        let sum: FourMomentum = ids.iter().map(|&d| ctx.store.get(d).momentum).sum();
        let each = |e: &Expr| -> Option<Vec<f64>> {
            ids.iter()
                .map(|&d| e.eval(ctx, Target::Candidate(d)))
                .collect()
        };
        match self {
            Functor::AM => Some(sum.mass()),
            Functor::APt => Some(sum.pt()),
            Functor::AP => Some(sum.p()),
            Functor::AEta => Some(sum.eta()),
            Functor::AdaMass(m) => Some((sum.mass() - m).abs()),
            Functor::ASum(e) => Some(each(e)?.into_iter().sum()),
            Functor::AMaxChild(e) => max_of(each(e)?),
            Functor::AMinChild(e) => each(e)?.into_iter().reduce(f64::min),
            Functor::AChild(e, i) => e.eval(ctx, Target::Candidate(*ids.get(i - 1)?)),
            Functor::ADoca(i, j) => pair(ctx, ids, *i, *j, doca),
            Functor::ADocaChi2(i, j) => pair(ctx, ids, *i, *j, doca_chi2),
            Functor::ADocaMax => max_of(pair_values(ctx, ids, doca)?),
            Functor::ADocaChi2Max => max_of(pair_values(ctx, ids, doca_chi2)?),
            Functor::ADocaCut(x) => {
                Some(flag(pair_values(ctx, ids, doca)?.iter().all(|d| d < x)))
            }
            Functor::ADocaChi2Cut(x) => {
                Some(flag(pair_values(ctx, ids, doca_chi2)?.iter().all(|d| d < x)))
            }
            _ => None,
        }
    }

    fn eval_event(&self, ctx: &EvalContext<'_>) -> Option<f64> {
        match self {
            Functor::HltPass(name) => Some(flag(
                ctx.event.decision(name).is_some_and(|d| d.decision),
            )),
            Functor::HltPassRe(re) => Some(flag(
                ctx.event
                    .decisions
                    .iter()
                    .any(|d| d.decision && re.is_match(&d.name)),
            )),
            _ => None,
        }
    }
}
