use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Speed of light in mm/ns.
pub const C_LIGHT: f64 = 299.792_458;

/// A position in the detector frame, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Four-momentum in MeV.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourMomentum {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl FourMomentum {
    pub const fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Builds the four-momentum of a particle with the given three-momentum
    /// under a mass hypothesis.
    pub fn from_momentum_and_mass(p: Vector3<f64>, mass: f64) -> Self {
        let e = (p.norm_squared() + mass * mass).sqrt();
        Self::new(p.x, p.y, p.z, e)
    }

    pub fn momentum(&self) -> Vector3<f64> {
        Vector3::new(self.px, self.py, self.pz)
    }

    pub fn p(&self) -> f64 {
        self.momentum().norm()
    }

    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Invariant mass; negative mass-squared from rounding is clamped to zero.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.momentum().norm_squared();
        m2.max(0.0).sqrt()
    }

    pub fn eta(&self) -> f64 {
        let p = self.p();
        if p == self.pz.abs() {
            return f64::INFINITY.copysign(self.pz);
        }
        0.5 * ((p + self.pz) / (p - self.pz)).ln()
    }

    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    pub fn beta(&self) -> Vector3<f64> {
        self.momentum() / self.e
    }

    /// Boosts this four-momentum by velocity `beta`.
    pub fn boost(&self, beta: &Vector3<f64>) -> Self {
        let b2 = beta.norm_squared();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / (1.0 - b2).sqrt();
        let p = self.momentum();
        let bp = beta.dot(&p);
        let gamma2 = (gamma - 1.0) / b2;
        let new_p = p + beta * (gamma2 * bp + gamma * self.e);
        Self::new(new_p.x, new_p.y, new_p.z, gamma * (self.e + bp))
    }
}

/// Cosine of the angle between the daughter direction in the mother rest
/// frame and the mother flight direction in the lab.
pub fn cos_helicity(daughter: &FourMomentum, mother: &FourMomentum) -> Option<f64> {
    let rest = daughter.boost(&-mother.beta());
    let d = rest.momentum().try_normalize(f64::EPSILON)?;
    let flight_dir = mother.momentum().try_normalize(f64::EPSILON)?;
    Some(d.dot(&flight_dir))
}

impl std::ops::Add for FourMomentum {
    type Output = FourMomentum;

    fn add(self, rhs: FourMomentum) -> FourMomentum {
        FourMomentum::new(
            self.px + rhs.px,
            self.py + rhs.py,
            self.pz + rhs.pz,
            self.e + rhs.e,
        )
    }
}

impl std::iter::Sum for FourMomentum {
    fn sum<I: Iterator<Item = FourMomentum>>(iter: I) -> Self {
        iter.fold(FourMomentum::default(), |acc, p| acc + p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mass_of_particle_at_rest() {
        let p = FourMomentum::from_momentum_and_mass(Vector3::zeros(), 139.57);
        assert!((p.mass() - 139.57).abs() < 1e-9);
        assert_eq!(p.pt(), 0.0);
    }

    #[test]
    fn boost_to_rest_frame() {
        let p = FourMomentum::from_momentum_and_mass(Vector3::new(0.0, 0.0, 5000.0), 1864.84);
        let rest = p.boost(&-p.beta());
        assert!(rest.p() < 1e-6);
        assert!((rest.e - 1864.84).abs() < 1e-6);
    }

    #[test]
    fn eta_is_symmetric() {
        let a = FourMomentum::new(1.0, 0.0, 10.0, 20.0);
        let b = FourMomentum::new(1.0, 0.0, -10.0, 20.0);
        assert!((a.eta() + b.eta()).abs() < 1e-12);
    }
}
