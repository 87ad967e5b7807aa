pub mod descriptor;
pub mod table;

pub use descriptor::{Arrow, DecayNode, Descriptor, DescriptorError};
pub use table::{ParticleId, ParticleProperty, ParticleTable};
