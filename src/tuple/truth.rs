//! Association of reconstructed candidates with generated particles.
//!
//! Basic candidates follow the track-to-truth link stored with the track.
//! A composite is associated with the lowest common ancestor of its basic
//! descendants' generated particles, provided that ancestor carries the
//! composite's particle type (either charge).

use std::collections::BTreeSet;

use crate::event::{CandidateStore, Event};
use crate::particles::ParticleId;
use crate::types::{CandidateId, McKey};

const PHOTON: ParticleId = ParticleId(22);

/// Background category of a fully matched signal candidate.
pub const BKG_SIGNAL: u32 = 0;
/// All tracks come from the right decay but at least one has the wrong type.
pub const BKG_REFLECTION: u32 = 30;
/// Right decay with non-photon final-state particles left out.
pub const BKG_PARTIALLY_RECONSTRUCTED: u32 = 50;
/// At least one track has no generated counterpart.
pub const BKG_GHOST: u32 = 60;
pub const BKG_COMBINATORIAL: u32 = 100;

/// The particle itself followed by its mothers, innermost first.
pub(crate) fn ancestry(event: &Event, key: McKey) -> Vec<McKey> {
    let mut out = vec![key];
    let mut current = key;
    while let Some(mother) = event.mc_particle(current).and_then(|p| p.mother) {
        // guard against malformed input linking a particle to itself
        if out.contains(&mother) {
            break;
        }
        out.push(mother);
        current = mother;
    }
    out
}

fn common_ancestor(event: &Event, keys: &[McKey]) -> Option<McKey> {
    let (first, rest) = keys.split_first()?;
    let lineages: Vec<Vec<McKey>> = rest.iter().map(|&k| ancestry(event, k)).collect();
    ancestry(event, *first)
        .into_iter()
        .find(|a| lineages.iter().all(|l| l.contains(a)))
}

fn basic_links(store: &CandidateStore, event: &Event, id: CandidateId) -> Vec<(ParticleId, Option<McKey>)> {
    store
        .tree(id)
        .into_iter()
        .map(|d| store.get(d))
        .filter(|c| c.is_basic())
        .map(|c| {
            let link = c.track.and_then(|t| event.track(t)).and_then(|t| t.mc_key);
            (c.id, link)
        })
        .collect()
}

/// Generated particle associated with a candidate, if any.
pub fn associate(store: &CandidateStore, event: &Event, id: CandidateId) -> Option<McKey> {
    let c = store.get(id);
    if c.is_basic() {
        return event.track(c.track?)?.mc_key;
    }
    let keys: Option<Vec<McKey>> = basic_links(store, event, id)
        .into_iter()
        .map(|(_, k)| k)
        .collect();
    let ancestor = common_ancestor(event, &keys?)?;
    let truth = event.mc_particle(ancestor)?;
    (truth.id.abs() == c.id.abs()).then_some(ancestor)
}

/// Stable descendants of `key`, depth first. Each particle is visited once
/// even when daughter links loop back.
pub(crate) fn final_state(event: &Event, key: McKey) -> Vec<McKey> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![key];
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let Some(p) = event.mc_particle(current) else {
            continue;
        };
        if p.daughters.is_empty() {
            out.push(current);
        }
        stack.extend(p.daughters.iter().rev().copied());
    }
    out
}

/// Background category of a composite candidate.
pub fn background_category(store: &CandidateStore, event: &Event, id: CandidateId) -> u32 {
    let links = basic_links(store, event, id);
    if links.iter().any(|(_, k)| k.is_none()) {
        return BKG_GHOST;
    }
    let keys: Vec<McKey> = links.iter().filter_map(|(_, k)| *k).collect();
    let Some(ancestor) = common_ancestor(event, &keys) else {
        return BKG_COMBINATORIAL;
    };
    let Some(head) = event.mc_particle(ancestor) else {
        return BKG_COMBINATORIAL;
    };
    let candidate = store.get(id);
    if head.id.abs() != candidate.id.abs() {
        return BKG_COMBINATORIAL;
    }

    let generated = final_state(event, ancestor);
    let missing = generated
        .iter()
        .filter(|k| !keys.contains(k))
        .filter_map(|&k| event.mc_particle(k))
        .any(|p| p.id != PHOTON);
    if missing {
        return BKG_PARTIALLY_RECONSTRUCTED;
    }

    let all_identified = head.id == candidate.id
        && links.iter().all(|(reco, k)| {
            k.and_then(|k| event.mc_particle(k))
                .map_or(false, |truth| truth.id == *reco)
        });
    if all_identified {
        BKG_SIGNAL
    } else {
        BKG_REFLECTION
    }
}
