//! Synthetic events shared by the integration tests.
//!
//! Every decay is laid out so that daughter tracks meet exactly at their
//! decay vertex and the single primary vertex sits at the origin.

#![allow(dead_code)]

use decay_select::event::{
    Event, McParticle, PidInfo, PrimaryVertex, ProtoParticle, Track, TrackType, TriggerDecision,
    TriggerObject,
};
use decay_select::particles::{ParticleId, ParticleTable};
use decay_select::types::{FourMomentum, McKey, Point3, TrackId};
use nalgebra::Vector3;

pub const KAONS: &str = "Phys/StdNoPIDsKaons/Particles";
pub const PIONS: &str = "Phys/StdNoPIDsPions/Particles";
pub const ALL_KAONS: &str = "Phys/StdAllNoPIDsKaons/Particles";
pub const ALL_PIONS: &str = "Phys/StdAllNoPIDsPions/Particles";
pub const ALL_PROTONS: &str = "Phys/StdAllNoPIDsProtons/Particles";

pub const STRIPPING_DECISION: &str = "StrippingXiccXiccPlusToD0PKPiDecision";
pub const D0_TRIGGER: &str = "Hlt2CharmHadD02HH_D02KPiDecision";

pub const D0_MASS: f64 = 1864.84;

pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Event with one primary vertex at the origin.
    pub fn new(run: u32, number: u64) -> Self {
        Self {
            event: Event {
                run_number: run,
                event_number: number,
                gps_time: 1_000 + number,
                primary_vertices: vec![PrimaryVertex {
                    position: Point3::new(0.0, 0.0, 0.0),
                    error: Point3::new(0.01, 0.01, 0.05),
                    n_tracks: 40,
                    chi2: 30.0,
                    ndof: 77,
                }],
                ..Event::default()
            },
        }
    }

    pub fn without_primary_vertices(mut self) -> Self {
        self.event.primary_vertices.clear();
        self
    }

    pub fn track(mut self, id: u32, point: [f64; 3], momentum: [f64; 3], charge: i32) -> Self {
        self.event.tracks.push(Track {
            id: TrackId(id),
            point: Point3::new(point[0], point[1], point[2]),
            momentum,
            charge,
            chi2: 1.2,
            ndof: 1,
            ghost_prob: 0.01,
            track_type: TrackType::Long,
            position_error: 0.02,
            mc_key: None,
        });
        self
    }

    pub fn particle(mut self, location: &str, pid: i32, track: u32) -> Self {
        self.event
            .particles
            .entry(location.to_string())
            .or_default()
            .push(ProtoParticle {
                id: ParticleId(pid),
                track: TrackId(track),
                pid: PidInfo {
                    dll_k: 5.0,
                    prob_nn_k: 0.8,
                    ..PidInfo::default()
                },
            });
        self
    }

    pub fn decision(mut self, name: &str, fired: bool, tracks: &[u32]) -> Self {
        self.event.decisions.push(TriggerDecision {
            name: name.to_string(),
            decision: fired,
            objects: vec![TriggerObject {
                tracks: tracks.iter().map(|&t| TrackId(t)).collect(),
            }],
        });
        self
    }

    pub fn mc_particle(
        mut self,
        key: u32,
        pid: i32,
        momentum: [f64; 3],
        origin: [f64; 3],
        end: Option<[f64; 3]>,
        mother: Option<u32>,
        daughters: &[u32],
    ) -> Self {
        let table = ParticleTable::standard();
        let mass = table.by_id(ParticleId(pid)).map(|p| p.mass).unwrap_or(0.0);
        self.event.mc_particles.push(McParticle {
            key: McKey(key),
            id: ParticleId(pid),
            momentum: FourMomentum::from_momentum_and_mass(Vector3::from(momentum), mass),
            origin: Point3::new(origin[0], origin[1], origin[2]),
            end_vertex: end.map(|e| Point3::new(e[0], e[1], e[2])),
            mother: mother.map(McKey),
            daughters: daughters.iter().map(|&d| McKey(d)).collect(),
        });
        self
    }

    pub fn link(mut self, track: u32, key: u32) -> Self {
        if let Some(t) = self.event.tracks.iter_mut().find(|t| t.id == TrackId(track)) {
            t.mc_key = Some(McKey(key));
        }
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

fn mass_of(parts: &[(Vector3<f64>, f64)]) -> f64 {
    let sum: FourMomentum = parts
        .iter()
        .map(|(p, m)| FourMomentum::from_momentum_and_mass(*p, *m))
        .sum();
    sum.mass()
}

/// Pion momentum along `pion_dir` that gives the kaon-pion pair the
/// requested invariant mass.
pub fn pion_for_mass(kaon: [f64; 3], pion_dir: [f64; 3], target: f64) -> [f64; 3] {
    let table = ParticleTable::standard();
    let m_k = table.by_name("K+").unwrap().mass;
    let m_pi = table.by_name("pi+").unwrap().mass;
    let k = Vector3::from(kaon);
    let dir = Vector3::from(pion_dir);
    let (mut lo, mut hi) = (1e-3, 1e3);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mass_of(&[(k, m_k), (dir * mid, m_pi)]) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let p = dir * (0.5 * (lo + hi));
    [p.x, p.y, p.z]
}

/// Kaon (track 1) and pion (track 2) from a D0 decaying at `vertex`.
pub struct D0Decay {
    pub vertex: [f64; 3],
    pub kaon: [f64; 3],
    pub pion: [f64; 3],
    /// Charge of the kaon; the pion has the opposite one.
    pub kaon_charge: i32,
}

impl D0Decay {
    /// A well separated D0 -> K- pi+ at the nominal mass.
    pub fn nominal() -> Self {
        Self::with_flight(10.0, D0_MASS)
    }

    /// D0 -> K- pi+ at invariant mass `mass`, decaying on its flight line
    /// from the origin at longitudinal position `z` (mm).
    pub fn with_flight(z: f64, mass: f64) -> Self {
        let kaon = [1600.0, 500.0, 20000.0];
        let pion = pion_for_mass(kaon, [-300.0, -50.0, 15000.0], mass);
        let mut d = Self {
            vertex: [0.0; 3],
            kaon,
            pion,
            kaon_charge: -1,
        };
        d.vertex = d.point_along(z);
        d
    }

    pub fn momentum(&self) -> Vector3<f64> {
        Vector3::from(self.kaon) + Vector3::from(self.pion)
    }

    /// Point on the D0 flight line at longitudinal position `z`.
    pub fn point_along(&self, z: f64) -> [f64; 3] {
        let p = self.momentum();
        [p.x / p.z * z, p.y / p.z * z, z]
    }

    pub fn conjugate(mut self) -> Self {
        self.kaon_charge = -self.kaon_charge;
        self
    }

    /// Adds both tracks and their entries in the standard kaon and pion
    /// containers.
    pub fn add_to(&self, builder: EventBuilder) -> EventBuilder {
        let k_id = 321 * self.kaon_charge;
        let pi_id = -211 * self.kaon_charge;
        builder
            .track(1, self.vertex, self.kaon, self.kaon_charge)
            .track(2, self.vertex, self.pion, -self.kaon_charge)
            .particle(KAONS, k_id, 1)
            .particle(PIONS, pi_id, 2)
    }
}

pub const XICC_VERTEX: [f64; 3] = [0.08, 0.04, 4.0];
pub const PROTON_P: [f64; 3] = [450.0, 100.0, 10000.0];
pub const SOFT_KAON_P: [f64; 3] = [245.0, 140.0, 7000.0];
pub const SOFT_PION_P: [f64; 3] = [270.0, 80.0, 6000.0];

/// D0 of a Xi_cc+ decay at [`XICC_VERTEX`]: its vertex lies 6 mm further
/// downstream on the D0 flight line.
pub fn xicc_d0() -> D0Decay {
    let mut d0 = D0Decay::nominal();
    let p = d0.momentum();
    let t = 6.0 / p.z;
    d0.vertex = [
        XICC_VERTEX[0] + p.x * t,
        XICC_VERTEX[1] + p.y * t,
        XICC_VERTEX[2] + p.z * t,
    ];
    d0
}

/// A fully reconstructed Xi_cc+ -> (D0 -> K- pi+) p+ K- pi+ with truth
/// links, passing the stripping line and the D0 trigger.
pub fn xicc_signal_event(number: u64) -> Event {
    let d0 = xicc_d0();
    let b = d0.add_to(EventBuilder::new(1234, number));
    let p_xicc = d0.momentum() + Vector3::from(PROTON_P) + Vector3::from(SOFT_KAON_P) + Vector3::from(SOFT_PION_P);
    b.track(3, XICC_VERTEX, PROTON_P, 1)
        .track(4, XICC_VERTEX, SOFT_KAON_P, -1)
        .track(5, XICC_VERTEX, SOFT_PION_P, 1)
        .particle(ALL_PROTONS, 2212, 3)
        .particle(ALL_KAONS, -321, 4)
        .particle(ALL_PIONS, 211, 5)
        .decision(STRIPPING_DECISION, true, &[1, 2, 3, 4, 5])
        .decision(D0_TRIGGER, true, &[1, 2])
        .decision("Hlt1TrackAllL0Decision", true, &[1])
        .mc_particle(10, 4412, [p_xicc.x, p_xicc.y, p_xicc.z], [0.0, 0.0, 0.0], Some(XICC_VERTEX), None, &[11, 12, 13, 14])
        .mc_particle(11, 421, [d0.momentum().x, d0.momentum().y, d0.momentum().z], XICC_VERTEX, Some(d0.vertex), Some(10), &[15, 16])
        .mc_particle(12, 2212, PROTON_P, XICC_VERTEX, None, Some(10), &[])
        .mc_particle(13, -321, SOFT_KAON_P, XICC_VERTEX, None, Some(10), &[])
        .mc_particle(14, 211, SOFT_PION_P, XICC_VERTEX, None, Some(10), &[])
        .mc_particle(15, -321, d0.kaon, d0.vertex, None, Some(11), &[])
        .mc_particle(16, 211, d0.pion, d0.vertex, None, Some(11), &[])
        .link(1, 15)
        .link(2, 16)
        .link(3, 12)
        .link(4, 13)
        .link(5, 14)
        .with_event_type(26165059)
        .build()
}

impl EventBuilder {
    pub fn with_event_type(mut self, event_type: u32) -> Self {
        self.event.event_type = Some(event_type);
        self.event.mc_primary_vertices = vec![Point3::new(0.0, 0.0, 0.0)];
        self
    }
}
