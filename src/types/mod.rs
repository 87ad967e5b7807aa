pub mod identifiers;
pub mod kinematics;

pub use identifiers::{CandidateId, McKey, SelectionName, TrackId};
pub use kinematics::{cos_helicity, FourMomentum, Point3, C_LIGHT};
