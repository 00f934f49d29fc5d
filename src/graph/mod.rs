// src/graph/mod.rs

//! Targets, their dependencies and the loop that builds them.

pub mod build;
pub mod dag;
pub mod expand;
pub mod target_info;

pub use build::{BuildGraph, BuildSummary, run_build};
pub use dag::DagGraph;
pub use expand::Expander;
pub use target_info::TargetRunState;
