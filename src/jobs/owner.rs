// src/jobs/owner.rs

//! What the scheduler needs from whoever owns the targets.
//!
//! The scheduler never looks at the dependency graph; it asks the owner for
//! recipe text, expands lines through it one at a time and reports outcomes
//! back.

use crate::recipe::LineFlags;

/// Final result of running a target's recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOutcome {
    Succeeded,
    /// Question mode found work to do.
    NeedsUpdate,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandState {
    #[default]
    NotStarted,
    Running,
    Finished,
}

/// Raw recipe text plus flags that apply to every line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetRecipe {
    pub text: String,
    pub flags: LineFlags,
}

pub trait TargetOwner {
    fn recipe(&self, target: &str) -> Option<TargetRecipe>;

    /// Expand one unexpanded recipe line. Called just before the line runs.
    fn expand_line(&mut self, target: &str, line: &str) -> String;

    /// A command is being started (or deferred) on behalf of `target`.
    fn command_started(&mut self, target: &str);

    fn command_state(&self, target: &str) -> CommandState;

    fn finalize(&mut self, target: &str, outcome: TargetOutcome);

    /// Remove whatever a failed or interrupted recipe may have left behind.
    fn delete_partial_outputs(&mut self, target: &str);

    /// Remove intermediate files once the build is over.
    fn remove_intermediates(&mut self);
}
