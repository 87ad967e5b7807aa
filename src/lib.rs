//! Candidate selection and decay-tree tuples for heavy-flavour decay
//! analyses.
//!
//! `decay-select` builds a graph of named selections (particle sources,
//! combiners, filters and trigger taggers) from one immutable
//! configuration, runs it once per event, and records every surviving
//! top-level candidate as a row of a decay-tree tuple. All operations are
//! deterministic: the same events and configuration always produce the same
//! rows, in the same order.
//!
//! The bundled preset, [`config::presets::xicc_to_d0_p_k_pi`], reconstructs
//! Xi_cc+ -> (D0 -> K- pi+) p+ K- pi+ and its charge conjugate.

pub mod app;
pub mod config;
pub mod event;
pub mod expr;
pub mod fit;
pub mod particles;
pub mod selection;
pub mod tuple;
pub mod types;
