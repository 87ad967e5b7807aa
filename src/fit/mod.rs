pub mod geometry;
pub mod tree_fit;
pub mod vertex;

pub use tree_fit::{refit, TreeFit, TreeFitOptions};
pub use vertex::{fit_vertex, FitError, FittedVertex};
