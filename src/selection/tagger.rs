use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::NodeError;
use crate::event::{CandidateStore, Event, TriggerDecision};
use crate::types::{CandidateId, TrackId};

/// Fraction of a trigger object's tracks that must belong to the candidate
/// for the candidate to count as having triggered it.
pub const TOS_OVERLAP: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaggerConfig {
    /// `"<decision regex>%TOS|%TIS|%Dec"` -> requirement. `0` only annotates;
    /// `1` also drops candidates whose tag is not true.
    pub specs: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TisTos {
    Dec,
    Tis,
    Tos,
}

#[derive(Debug, Clone)]
struct TagSpec {
    key: String,
    pattern: Regex,
    kind: TisTos,
    required: bool,
}

/// Annotates candidates with trigger-on-signal / trigger-independent-of-signal
/// tags. The tag name is the spec key.
#[derive(Debug, Clone)]
pub struct Tagger {
    specs: Vec<TagSpec>,
}

impl Tagger {
    pub fn compile(config: &TaggerConfig) -> Result<Self, NodeError> {
        let mut specs = Vec::with_capacity(config.specs.len());
        for (key, &required) in &config.specs {
            let bad = |reason: &str| NodeError::TagSpec {
                spec: key.clone(),
                reason: reason.to_string(),
            };
            let (pattern, kind) = key.rsplit_once('%').ok_or_else(|| bad("missing %TOS/%TIS/%Dec"))?;
            let kind = match kind {
                "TOS" => TisTos::Tos,
                "TIS" => TisTos::Tis,
                "Dec" | "DEC" => TisTos::Dec,
                _ => return Err(bad("unknown decision type")),
            };
            let required = match required {
                0 => false,
                1 => true,
                _ => return Err(bad("requirement must be 0 or 1")),
            };
            let pattern = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| bad(&e.to_string()))?;
            specs.push(TagSpec {
                key: key.clone(),
                pattern,
                kind,
                required,
            });
        }
        Ok(Self { specs })
    }

    pub fn run(
        &self,
        inputs: &[CandidateId],
        store: &mut CandidateStore,
        event: &Event,
    ) -> Vec<CandidateId> {
        let mut out = Vec::with_capacity(inputs.len());
        for &id in inputs {
            let tracks: BTreeSet<TrackId> = store.tracks_of(id).into_iter().collect();
            let mut keep = true;
            for spec in &self.specs {
                let decisions: Vec<&TriggerDecision> = event
                    .decisions
                    .iter()
                    .filter(|d| spec.pattern.is_match(&d.name))
                    .collect();
                if decisions.is_empty() {
                    // no report for this pattern: tag stays absent
                    keep &= !spec.required;
                    continue;
                }
                let value = classify(&decisions, &tracks, spec.kind);
                store.set_tag(id, &spec.key, value);
                keep &= value || !spec.required;
            }
            if keep {
                out.push(id);
            }
        }
        out
    }
}

/// TIS/TOS/Dec of a candidate with respect to a group of decision reports.
///
/// TOS: a trigger object of a fired decision has at least [`TOS_OVERLAP`]
/// of its tracks in the candidate. TIS: a trigger object of a fired
/// decision shares no track with the candidate. Objects without tracks
/// count for neither.
pub fn classify(decisions: &[&TriggerDecision], tracks: &BTreeSet<TrackId>, kind: TisTos) -> bool {
    let fired = decisions.iter().filter(|d| d.decision);
    match kind {
        TisTos::Dec => decisions.iter().any(|d| d.decision),
        TisTos::Tos => fired.flat_map(|d| &d.objects).any(|obj| {
            if obj.tracks.is_empty() {
                return false;
            }
            let inside = obj.tracks.iter().filter(|t| tracks.contains(t)).count();
            inside as f64 / obj.tracks.len() as f64 >= TOS_OVERLAP
        }),
        TisTos::Tis => fired.flat_map(|d| &d.objects).any(|obj| {
            !obj.tracks.is_empty() && obj.tracks.iter().all(|t| !tracks.contains(t))
        }),
    }
}
