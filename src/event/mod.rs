pub mod record;
pub mod source;
pub mod store;

pub use record::{
    Event, McParticle, PidInfo, PrimaryVertex, ProtoParticle, Track, TrackType, TriggerDecision,
    TriggerObject,
};
pub use source::{EventSource, JsonLinesSource, SourceError};
pub use store::{Candidate, CandidateStore};
