use std::collections::BTreeMap;
use std::fmt::Write;

use nalgebra::Vector3;

use crate::event::record::{Event, PidInfo, ProtoParticle};
use crate::fit::FittedVertex;
use crate::particles::{ParticleId, ParticleTable};
use crate::types::{CandidateId, FourMomentum, TrackId};

/// A reconstructed or combined particle.
///
/// Created once by a source or combiner node; afterwards only tagger nodes
/// touch it, and only its tag map.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ParticleId,
    pub momentum: FourMomentum,
    pub charge: i32,
    pub daughters: Vec<CandidateId>,
    /// Underlying track for basic particles.
    pub track: Option<TrackId>,
    pub pid: PidInfo,
    /// Fitted decay vertex for composites.
    pub end_vertex: Option<FittedVertex>,
    tags: BTreeMap<String, bool>,
}

impl Candidate {
    pub fn basic(id: ParticleId, momentum: FourMomentum, charge: i32, track: TrackId, pid: PidInfo) -> Self {
        Self {
            id,
            momentum,
            charge,
            daughters: Vec::new(),
            track: Some(track),
            pid,
            end_vertex: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn composite(
        id: ParticleId,
        momentum: FourMomentum,
        charge: i32,
        daughters: Vec<CandidateId>,
        end_vertex: FittedVertex,
    ) -> Self {
        Self {
            id,
            momentum,
            charge,
            daughters,
            track: None,
            pid: PidInfo::default(),
            end_vertex: Some(end_vertex),
            tags: BTreeMap::new(),
        }
    }

    pub fn is_basic(&self) -> bool {
        self.daughters.is_empty()
    }

    /// `None` when no tagger has decided on `name` for this candidate.
    pub fn tag(&self, name: &str) -> Option<bool> {
        self.tags.get(name).copied()
    }

    pub fn tags(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.tags.iter()
    }
}

/// Per-event arena of candidates. Dropped at end of event.
#[derive(Debug, Default)]
pub struct CandidateStore {
    candidates: Vec<Candidate>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, candidate: Candidate) -> CandidateId {
        self.candidates.push(candidate);
        CandidateId(self.candidates.len() - 1)
    }

    pub fn get(&self, id: CandidateId) -> &Candidate {
        &self.candidates[id.0]
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Drops a candidate that was inserted last and then rejected.
    pub(crate) fn discard_last(&mut self, id: CandidateId) {
        if id.0 + 1 == self.candidates.len() {
            self.candidates.pop();
        }
    }

    pub(crate) fn set_tag(&mut self, id: CandidateId, name: &str, value: bool) {
        self.candidates[id.0].tags.insert(name.to_string(), value);
    }

    /// Builds basic candidates for every particle in one event container.
    pub fn load_container(
        &mut self,
        event: &Event,
        location: &str,
        table: &ParticleTable,
    ) -> Vec<CandidateId> {
        let Some(protos) = event.particles.get(location) else {
            tracing::debug!(location, "container missing from event");
            return Vec::new();
        };
        protos
            .iter()
            .filter_map(|proto| self.load_proto(event, proto, table))
            .collect()
    }

    fn load_proto(
        &mut self,
        event: &Event,
        proto: &ProtoParticle,
        table: &ParticleTable,
    ) -> Option<CandidateId> {
        let Some(track) = event.track(proto.track) else {
            tracing::warn!(track = proto.track.0, "particle refers to unknown track");
            return None;
        };
        let Some(prop) = table.by_id(proto.id) else {
            tracing::warn!(pid = proto.id.0, "particle id not in particle table");
            return None;
        };
        let p = Vector3::new(track.momentum[0], track.momentum[1], track.momentum[2]);
        let momentum = FourMomentum::from_momentum_and_mass(p, prop.mass);
        Some(self.insert(Candidate::basic(
            proto.id,
            momentum,
            prop.charge,
            track.id,
            proto.pid,
        )))
    }

    /// Sorted, de-duplicated tracks underlying a candidate.
    pub fn tracks_of(&self, id: CandidateId) -> Vec<TrackId> {
        let mut out = Vec::new();
        self.collect_tracks(id, &mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_tracks(&self, id: CandidateId, out: &mut Vec<TrackId>) {
        let c = self.get(id);
        if let Some(t) = c.track {
            out.push(t);
        }
        for &d in &c.daughters {
            self.collect_tracks(d, out);
        }
    }

    /// The candidate and all its descendants, depth first.
    pub fn tree(&self, id: CandidateId) -> Vec<CandidateId> {
        let mut out = vec![id];
        for &d in &self.get(id).daughters {
            out.extend(self.tree(d));
        }
        out
    }

    /// Compact one-line rendering of a decay tree, for debug printing.
    pub fn describe(&self, id: CandidateId, table: &ParticleTable) -> String {
        let mut out = String::new();
        self.describe_into(id, table, &mut out);
        out
    }

    fn describe_into(&self, id: CandidateId, table: &ParticleTable, out: &mut String) {
        let c = self.get(id);
        let name = table.by_id(c.id).map(|p| p.name).unwrap_or("?");
        let _ = write!(out, "{name}[M={:.1} P={:.1}]", c.momentum.mass(), c.momentum.p());
        if !c.daughters.is_empty() {
            out.push_str(" -> (");
            for (i, &d) in c.daughters.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                self.describe_into(d, table, out);
            }
            out.push(')');
        }
    }
}
