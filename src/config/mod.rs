// src/config/mod.rs

//! Build description loading and validation.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads a file from disk.
//! - [`validate`] checks dependency references and acyclicity.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, TargetConfig};
