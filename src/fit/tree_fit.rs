//! Constrained refit of an already-assembled decay tree.
//!
//! Works on copies of the candidate values; the candidate store is never
//! modified, so other tuple tools still see the unconstrained tree.

use std::collections::BTreeMap;

use super::geometry::{best_pv, trajectory, Line};
use super::vertex::{fit_vertex, FitError, FittedVertex};
use crate::event::{CandidateStore, Event};
use crate::particles::{ParticleId, ParticleTable};
use crate::types::{CandidateId, FourMomentum, Point3};

/// Relative momentum resolution used to weigh mass-constraint pulls.
const MOMENTUM_RESOLUTION: f64 = 0.005;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeFitOptions {
    /// Particles (either charge) whose mass is constrained to the PDG value.
    pub mass_constraints: Vec<ParticleId>,
    /// Require the head to point back to its best primary vertex.
    pub origin_constraint: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeFit {
    pub momentum: FourMomentum,
    pub vertex: FittedVertex,
    pub chi2: f64,
    pub ndof: u32,
    /// Refitted momenta of composite descendants.
    pub composites: BTreeMap<CandidateId, FourMomentum>,
    /// Primary vertex used for the origin constraint.
    pub origin: Option<Point3>,
}

struct NodeFit {
    momentum: FourMomentum,
    line: Line,
    vertex: Option<FittedVertex>,
    chi2: f64,
    ndof: u32,
}

pub fn refit(
    store: &CandidateStore,
    event: &Event,
    table: &ParticleTable,
    head: CandidateId,
    options: &TreeFitOptions,
) -> Result<TreeFit, FitError> {
    let mut fitter = TreeFitter {
        store,
        event,
        table,
        options,
        composites: BTreeMap::new(),
        origin: None,
    };
    let node = fitter.fit_node(head, true)?;
    let vertex = node.vertex.ok_or(FitError::TooFewTracks(0))?;
    Ok(TreeFit {
        momentum: node.momentum,
        vertex,
        chi2: node.chi2,
        ndof: node.ndof,
        composites: fitter.composites,
        origin: fitter.origin,
    })
}

struct TreeFitter<'a> {
    store: &'a CandidateStore,
    event: &'a Event,
    table: &'a ParticleTable,
    options: &'a TreeFitOptions,
    composites: BTreeMap<CandidateId, FourMomentum>,
    origin: Option<Point3>,
}

impl<'a> TreeFitter<'a> {
    fn constrained(&self, id: ParticleId) -> bool {
        self.options
            .mass_constraints
            .iter()
            .any(|c| c.abs() == id.abs())
    }

    fn fit_node(&mut self, id: CandidateId, is_head: bool) -> Result<NodeFit, FitError> {
        let c = self.store.get(id);
        if c.is_basic() {
            let line =
                trajectory(self.store, self.event, id).ok_or(FitError::NoTrajectory)?;
            return Ok(NodeFit {
                momentum: c.momentum,
                line,
                vertex: None,
                chi2: 0.0,
                ndof: 0,
            });
        }

        let mut daughters = Vec::with_capacity(c.daughters.len());
        for &d in &c.daughters {
            daughters.push(self.fit_node(d, false)?);
        }
        let mut chi2: f64 = daughters.iter().map(|d| d.chi2).sum();
        let mut ndof: u32 = daughters.iter().map(|d| d.ndof).sum();

        let mut momenta: Vec<FourMomentum> = daughters.iter().map(|d| d.momentum).collect();
        if self.constrained(c.id) {
            let target = self
                .table
                .by_id(c.id)
                .map(|p| p.mass)
                .ok_or(FitError::MassConstraint)?;
            let k = solve_mass_scale(&momenta, target)?;
            momenta = scale_momenta(&momenta, k);
            let pull = (k - 1.0) / MOMENTUM_RESOLUTION;
            chi2 += pull * pull * momenta.len() as f64;
            ndof += 1;
        }
        let momentum: FourMomentum = momenta.iter().copied().sum();

        let mut lines: Vec<Line> = daughters
            .iter()
            .zip(&momenta)
            .map(|(d, p)| Line {
                dir: p.momentum().try_normalize(f64::EPSILON).unwrap_or(d.line.dir),
                ..d.line
            })
            .collect();

        if is_head && self.options.origin_constraint {
            let pv = best_pv(self.store, self.event, id).ok_or(FitError::NoTrajectory)?;
            let sigma = 0.5 * (pv.error.x + pv.error.y);
            let pv_line = Line::new(pv.position.to_vector(), momentum.momentum(), sigma)
                .ok_or(FitError::NoTrajectory)?;
            lines.push(pv_line);
            self.origin = Some(pv.position);
        }

        let vertex = fit_vertex(&lines)?;
        chi2 += vertex.chi2;
        ndof += vertex.ndof;

        if !is_head {
            self.composites.insert(id, momentum);
        }

        let sigma = (vertex.covariance.trace() / 3.0).max(0.0).sqrt();
        let line = Line::new(vertex.position.to_vector(), momentum.momentum(), sigma)
            .ok_or(FitError::NoTrajectory)?;
        Ok(NodeFit {
            momentum,
            line,
            vertex: Some(vertex),
            chi2,
            ndof,
        })
    }
}

fn scale_momenta(momenta: &[FourMomentum], k: f64) -> Vec<FourMomentum> {
    momenta
        .iter()
        .map(|p| FourMomentum::from_momentum_and_mass(p.momentum() * k, p.mass()))
        .collect()
}

/// Common momentum scale bringing the invariant mass of the daughters to
/// `target`. The mass grows monotonically with the scale, so bisection
/// suffices.
fn solve_mass_scale(momenta: &[FourMomentum], target: f64) -> Result<f64, FitError> {
    let mass_at = |k: f64| -> f64 {
        scale_momenta(momenta, k)
            .into_iter()
            .sum::<FourMomentum>()
            .mass()
    };
    let (mut lo, mut hi) = (1e-3, 1e3);
    if mass_at(lo) > target || mass_at(hi) < target {
        return Err(FitError::MassConstraint);
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mass_at(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn mass_scale_hits_target() {
        let k = FourMomentum::from_momentum_and_mass(Vector3::new(300.0, 0.0, 5000.0), 493.677);
        let pi = FourMomentum::from_momentum_and_mass(Vector3::new(-300.0, 0.0, 4000.0), 139.57);
        let scale = solve_mass_scale(&[k, pi], 1864.84).unwrap();
        let m = scale_momenta(&[k, pi], scale).into_iter().sum::<FourMomentum>().mass();
        assert!((m - 1864.84).abs() < 1e-6);
    }

    #[test]
    fn unreachable_mass_is_an_error() {
        let k = FourMomentum::from_momentum_and_mass(Vector3::new(0.0, 0.0, 5000.0), 493.677);
        let pi = FourMomentum::from_momentum_and_mass(Vector3::new(0.0, 0.0, 4000.0), 139.57);
        // below threshold
        assert_eq!(solve_mass_scale(&[k, pi], 500.0), Err(FitError::MassConstraint));
    }
}
