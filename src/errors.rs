// src/errors.rs

//! Crate-wide error aliases and helpers.

use nix::sys::signal::Signal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParmakeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("No rule to make target '{0}'")]
    TargetNotFound(String),

    #[error("Cycle detected in target graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The token channel was closed or became unreadable. Fatal to the build.
    #[error("jobserver failure: {0}")]
    Jobserver(String),

    #[error("waiting for child processes failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("signal handling failed: {0}")]
    Signal(#[source] nix::Error),

    /// A fatal signal was received; cleanup already ran and the caller should
    /// re-deliver the signal.
    #[error("interrupted by {}", .0.as_str())]
    Interrupted(Signal),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ParmakeError>;
