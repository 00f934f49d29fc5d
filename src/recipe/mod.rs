// src/recipe/mod.rs

//! Recipe text handling: cutting a recipe into lines and deciding how each
//! expanded line is executed.

pub mod invocation;
pub mod segment;

pub use invocation::{DEFAULT_SHELL, Invocation, ShellConfig, build_invocation};
pub use segment::{CommandLine, LineFlags, SegmentedRecipe, segment};
