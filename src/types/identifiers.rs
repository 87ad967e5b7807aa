use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a selection node in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionName(String);

impl SelectionName {
    pub fn new(name: impl Into<String>) -> Self {
        SelectionName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SelectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SelectionName {
    fn from(s: &str) -> Self {
        SelectionName(s.to_string())
    }
}

/// Index of a candidate inside the per-event candidate store.
///
/// Only meaningful for the event that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateId(pub(crate) usize);

impl CandidateId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Key of a reconstructed track within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

/// Key of a generated (truth) particle within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct McKey(pub u32);
