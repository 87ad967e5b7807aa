//! Straight-line trajectory geometry used by the vertex fit and by the
//! impact-parameter and flight-distance functors.

use nalgebra::{Matrix3, Vector3};

use crate::event::{CandidateStore, Event, PrimaryVertex};
use crate::types::CandidateId;

/// A straight trajectory with an isotropic transverse position error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub point: Vector3<f64>,
    /// Unit direction.
    pub dir: Vector3<f64>,
    pub sigma: f64,
}

impl Line {
    /// Returns `None` for a zero direction vector.
    pub fn new(point: Vector3<f64>, direction: Vector3<f64>, sigma: f64) -> Option<Self> {
        let dir = direction.try_normalize(f64::EPSILON)?;
        Some(Self { point, dir, sigma })
    }

    /// Projector onto the plane transverse to the line.
    pub fn transverse_projector(&self) -> Matrix3<f64> {
        Matrix3::identity() - self.dir * self.dir.transpose()
    }

    pub fn distance_to(&self, x: &Vector3<f64>) -> f64 {
        (self.transverse_projector() * (x - self.point)).norm()
    }
}

/// Distance of closest approach between two lines.
pub fn doca(a: &Line, b: &Line) -> f64 {
    let w0 = a.point - b.point;
    let bb = a.dir.dot(&b.dir);
    let d = a.dir.dot(&w0);
    let e = b.dir.dot(&w0);
    let denom = 1.0 - bb * bb;
    if denom < 1e-12 {
        return b.distance_to(&a.point);
    }
    let sc = (bb * e - d) / denom;
    let tc = (e - bb * d) / denom;
    ((a.point + a.dir * sc) - (b.point + b.dir * tc)).norm()
}

pub fn doca_chi2(a: &Line, b: &Line) -> f64 {
    let dist = doca(a, b);
    dist * dist / (a.sigma * a.sigma + b.sigma * b.sigma)
}

pub fn pv_covariance(pv: &PrimaryVertex) -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(
        pv.error.x * pv.error.x,
        pv.error.y * pv.error.y,
        pv.error.z * pv.error.z,
    ))
}

pub fn impact_parameter(line: &Line, pv: &PrimaryVertex) -> f64 {
    line.distance_to(&pv.position.to_vector())
}

pub fn impact_parameter_chi2(line: &Line, pv: &PrimaryVertex) -> f64 {
    let ip = impact_parameter(line, pv);
    let pv_t2 = 0.5 * (pv.error.x * pv.error.x + pv.error.y * pv.error.y);
    ip * ip / (line.sigma * line.sigma + pv_t2)
}

/// Displacement of a decay vertex from a primary vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flight {
    pub distance: f64,
    pub chi2: f64,
    pub delta: Vector3<f64>,
}

impl Flight {
    pub fn error(&self) -> f64 {
        if self.chi2 > 0.0 {
            self.distance / self.chi2.sqrt()
        } else {
            f64::INFINITY
        }
    }
}

pub fn flight(
    vertex: &Vector3<f64>,
    vertex_cov: &Matrix3<f64>,
    pv: &PrimaryVertex,
) -> Option<Flight> {
    flight_between(vertex, vertex_cov, &pv.position.to_vector(), &pv_covariance(pv))
}

/// Displacement of a decay vertex from an arbitrary origin vertex.
pub fn flight_between(
    vertex: &Vector3<f64>,
    vertex_cov: &Matrix3<f64>,
    origin: &Vector3<f64>,
    origin_cov: &Matrix3<f64>,
) -> Option<Flight> {
    let delta = vertex - origin;
    let inv = (vertex_cov + origin_cov).try_inverse()?;
    let chi2 = (delta.transpose() * inv * delta)[(0, 0)];
    Some(Flight {
        distance: delta.norm(),
        chi2,
        delta,
    })
}

/// Trajectory of a candidate: the track for basics, the momentum direction
/// through the fitted decay vertex for composites.
pub fn trajectory(store: &CandidateStore, event: &Event, id: CandidateId) -> Option<Line> {
    let c = store.get(id);
    let dir = c.momentum.momentum();
    if let Some(vertex) = &c.end_vertex {
        let sigma = (vertex.covariance.trace() / 3.0).max(0.0).sqrt();
        return Line::new(vertex.position.to_vector(), dir, sigma);
    }
    let track = event.track(c.track?)?;
    Line::new(track.point.to_vector(), dir, track.position_error)
}

/// Primary vertex with the smallest impact-parameter chi2 to the candidate.
pub fn best_pv<'e>(
    store: &CandidateStore,
    event: &'e Event,
    id: CandidateId,
) -> Option<&'e PrimaryVertex> {
    let line = trajectory(store, event, id)?;
    event
        .primary_vertices
        .iter()
        .map(|pv| (impact_parameter_chi2(&line, pv), pv))
        .filter(|(chi2, _)| chi2.is_finite())
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, pv)| pv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doca_of_skew_lines() {
        let a = Line::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0), 0.01).unwrap();
        let b = Line::new(Vector3::new(0.0, 0.5, 3.0), Vector3::new(0.0, 0.0, 1.0), 0.01).unwrap();
        assert!((doca(&a, &b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn doca_of_parallel_lines() {
        let a = Line::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 0.01).unwrap();
        let b = Line::new(Vector3::new(0.3, 0.4, 7.0), Vector3::new(0.0, 0.0, 2.0), 0.01).unwrap();
        assert!((doca(&a, &b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_direction_has_no_line() {
        assert!(Line::new(Vector3::zeros(), Vector3::zeros(), 0.01).is_none());
    }
}
