// src/graph/target_info.rs

//! Target metadata and per-build state.

use std::path::PathBuf;

use crate::config::model::TargetConfig;
use crate::jobs::{CommandState, TargetOutcome};
use crate::recipe::LineFlags;

/// Per-build state of a target (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Needed by a goal, waiting on dependencies.
    Pending,
    /// Handed to the scheduler.
    Running,
    DoneSuccess,
    /// Question mode: the recipe would have run.
    NeedsUpdate,
    /// Recipe failed, or a dependency did.
    DoneFailed,
}

impl From<TargetOutcome> for RunState {
    fn from(outcome: TargetOutcome) -> Self {
        match outcome {
            TargetOutcome::Succeeded => RunState::DoneSuccess,
            TargetOutcome::NeedsUpdate => RunState::NeedsUpdate,
            TargetOutcome::Failed => RunState::DoneFailed,
        }
    }
}

/// Public, read-only view of a target's state in the current build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRunState {
    /// No goal needs this target.
    NotInBuild,
    Pending,
    Running,
    DoneSuccess,
    NeedsUpdate,
    DoneFailed,
}

impl From<Option<RunState>> for TargetRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => TargetRunState::NotInBuild,
            Some(RunState::Pending) => TargetRunState::Pending,
            Some(RunState::Running) => TargetRunState::Running,
            Some(RunState::DoneSuccess) => TargetRunState::DoneSuccess,
            Some(RunState::NeedsUpdate) => TargetRunState::NeedsUpdate,
            Some(RunState::DoneFailed) => TargetRunState::DoneFailed,
        }
    }
}

/// Static target information derived from config, plus per-build state.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub name: String,
    pub recipe: String,
    /// Direct dependencies (names in `after = [...]`).
    pub deps: Vec<String>,
    pub outputs: Vec<PathBuf>,
    /// Modifiers applied to every line of the recipe.
    pub flags: LineFlags,
    pub precious: bool,
    pub intermediate: bool,

    pub run_state: Option<RunState>,
    pub command_state: CommandState,
}

impl TargetInfo {
    pub fn from_config(name: &str, cfg: &TargetConfig) -> Self {
        Self {
            name: name.to_string(),
            recipe: cfg.recipe.clone(),
            deps: cfg.after.clone(),
            outputs: cfg.outputs.iter().map(PathBuf::from).collect(),
            flags: LineFlags {
                recurse: false,
                silent: cfg.silent,
                ignore_errors: cfg.ignore_errors,
            },
            precious: cfg.precious,
            intermediate: cfg.intermediate,
            run_state: None,
            command_state: CommandState::NotStarted,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self.run_state,
            Some(RunState::DoneSuccess | RunState::NeedsUpdate | RunState::DoneFailed)
        )
    }

    /// Whether dependents may go ahead once this target is done.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(
            self.run_state,
            Some(RunState::DoneSuccess | RunState::NeedsUpdate)
        )
    }
}
