use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::particles::ParticleId;
use crate::types::{FourMomentum, McKey, Point3, TrackId};

fn default_position_error() -> f64 {
    0.02
}

fn default_pv_error() -> Point3 {
    Point3::new(0.01, 0.01, 0.05)
}

/// One reconstructed event as delivered by the event source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub run_number: u32,
    pub event_number: u64,
    #[serde(default)]
    pub gps_time: u64,
    /// Generator event type, simulated input only.
    #[serde(default)]
    pub event_type: Option<u32>,
    #[serde(default)]
    pub primary_vertices: Vec<PrimaryVertex>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Particle containers keyed by location, e.g. `Phys/StdAllNoPIDsKaons/Particles`.
    #[serde(default)]
    pub particles: BTreeMap<String, Vec<ProtoParticle>>,
    /// Trigger and stripping decision reports.
    #[serde(default)]
    pub decisions: Vec<TriggerDecision>,
    #[serde(default)]
    pub mc_particles: Vec<McParticle>,
    #[serde(default)]
    pub mc_primary_vertices: Vec<Point3>,
}

impl Event {
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn mc_particle(&self, key: McKey) -> Option<&McParticle> {
        self.mc_particles.iter().find(|p| p.key == key)
    }

    pub fn decision(&self, name: &str) -> Option<&TriggerDecision> {
        self.decisions.iter().find(|d| d.name == name)
    }

    pub fn is_simulated(&self) -> bool {
        !self.mc_particles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryVertex {
    pub position: Point3,
    /// Position uncertainty per axis (mm).
    #[serde(default = "default_pv_error")]
    pub error: Point3,
    #[serde(default)]
    pub n_tracks: u32,
    #[serde(default)]
    pub chi2: f64,
    #[serde(default)]
    pub ndof: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackType {
    Velo,
    Upstream,
    #[default]
    Long,
    Downstream,
    Ttrack,
}

impl TrackType {
    pub fn code(self) -> u8 {
        match self {
            TrackType::Velo => 1,
            TrackType::Long => 3,
            TrackType::Upstream => 4,
            TrackType::Downstream => 5,
            TrackType::Ttrack => 6,
        }
    }
}

/// A reconstructed straight-line trajectory near the interaction region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Reference point on the trajectory (mm).
    pub point: Point3,
    /// Three-momentum at the reference point (MeV).
    pub momentum: [f64; 3],
    pub charge: i32,
    #[serde(default)]
    pub chi2: f64,
    #[serde(default = "one")]
    pub ndof: u32,
    #[serde(default)]
    pub ghost_prob: f64,
    #[serde(default)]
    pub track_type: TrackType,
    /// Transverse position resolution (mm).
    #[serde(default = "default_position_error")]
    pub position_error: f64,
    /// Truth association, simulated input only.
    #[serde(default)]
    pub mc_key: Option<McKey>,
}

fn one() -> u32 {
    1
}

impl Track {
    pub fn chi2_per_dof(&self) -> f64 {
        if self.ndof == 0 {
            0.0
        } else {
            self.chi2 / self.ndof as f64
        }
    }
}

/// Particle-identification likelihoods attached to a charged particle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidInfo {
    #[serde(default)]
    pub dll_e: f64,
    #[serde(default)]
    pub dll_mu: f64,
    #[serde(default)]
    pub dll_k: f64,
    #[serde(default)]
    pub dll_p: f64,
    #[serde(default)]
    pub prob_nn_k: f64,
    #[serde(default)]
    pub prob_nn_pi: f64,
    #[serde(default)]
    pub prob_nn_p: f64,
}

/// A track with a particle hypothesis, as stored in the standard containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoParticle {
    pub id: ParticleId,
    pub track: TrackId,
    #[serde(default)]
    pub pid: PidInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerObject {
    pub tracks: Vec<TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub name: String,
    pub decision: bool,
    #[serde(default)]
    pub objects: Vec<TriggerObject>,
}

/// A generated particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McParticle {
    pub key: McKey,
    pub id: ParticleId,
    pub momentum: FourMomentum,
    pub origin: Point3,
    #[serde(default)]
    pub end_vertex: Option<Point3>,
    #[serde(default)]
    pub mother: Option<McKey>,
    #[serde(default)]
    pub daughters: Vec<McKey>,
}
