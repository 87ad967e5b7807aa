use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

use super::geometry::Line;
use crate::types::Point3;

/// Fits further than this from the origin are treated as diverged (mm).
const MAX_VERTEX_RADIUS: f64 = 5000.0;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("vertex fit needs at least two trajectories, got {0}")]
    TooFewTracks(usize),
    #[error("trajectories are parallel; vertex is undetermined")]
    Singular,
    #[error("vertex fit diverged")]
    Diverged,
    #[error("mass constraint cannot be satisfied")]
    MassConstraint,
    #[error("candidate has no usable trajectory")]
    NoTrajectory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedVertex {
    pub position: Point3,
    pub covariance: Matrix3<f64>,
    pub chi2: f64,
    pub ndof: u32,
}

impl FittedVertex {
    pub fn chi2_per_dof(&self) -> f64 {
        if self.ndof == 0 {
            0.0
        } else {
            self.chi2 / self.ndof as f64
        }
    }
}

/// Least-squares common point of straight trajectories.
///
/// Each line contributes two transverse measurements weighted by its
/// position error, so `ndof = 2N - 3`.
pub fn fit_vertex(lines: &[Line]) -> Result<FittedVertex, FitError> {
    if lines.len() < 2 {
        return Err(FitError::TooFewTracks(lines.len()));
    }

    let mut normal = Matrix3::zeros();
    let mut rhs = Vector3::zeros();
    for line in lines {
        let w = 1.0 / (line.sigma * line.sigma);
        let proj = line.transverse_projector() * w;
        normal += proj;
        rhs += proj * line.point;
    }

    let covariance = normal.try_inverse().ok_or(FitError::Singular)?;
    let x = covariance * rhs;
    if !x.iter().all(|v| v.is_finite()) || x.norm() > MAX_VERTEX_RADIUS {
        return Err(FitError::Diverged);
    }

    let chi2: f64 = lines
        .iter()
        .map(|l| {
            let r = l.distance_to(&x);
            r * r / (l.sigma * l.sigma)
        })
        .sum();

    Ok(FittedVertex {
        position: Point3::from_vector(&x),
        covariance,
        chi2,
        ndof: (2 * lines.len() - 3) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(p: [f64; 3], d: [f64; 3]) -> Line {
        Line::new(Vector3::from(p), Vector3::from(d), 0.02).unwrap()
    }

    #[test]
    fn intersecting_lines_fit_exactly() {
        let v = fit_vertex(&[
            line([0.0, 0.0, 0.0], [0.1, 0.0, 1.0]),
            line([0.0, 0.0, 0.0], [-0.1, 0.05, 1.0]),
            line([0.2, 0.0, 2.0], [0.0, 0.0, 1.0]),
        ]);
        // third line misses the origin by 0.2 mm
        let v = v.unwrap();
        assert_eq!(v.ndof, 3);
        assert!(v.chi2 > 0.0);

        let exact = fit_vertex(&[
            line([1.0, 2.0, 10.0], [0.1, 0.0, 1.0]),
            line([1.0, 2.0, 10.0], [-0.1, 0.05, 1.0]),
        ])
        .unwrap();
        assert!((exact.position.z - 10.0).abs() < 1e-9);
        assert!(exact.chi2 < 1e-12);
        assert_eq!(exact.ndof, 1);
    }

    #[test]
    fn parallel_lines_are_singular() {
        let r = fit_vertex(&[
            line([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            line([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ]);
        assert_eq!(r, Err(FitError::Singular));
    }

    #[test]
    fn single_line_is_rejected() {
        assert_eq!(
            fit_vertex(&[line([0.0, 0.0, 0.0], [0.0, 0.0, 1.0])]),
            Err(FitError::TooFewTracks(1))
        );
    }
}
