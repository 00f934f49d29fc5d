#![allow(dead_code)]

//! A `TargetOwner` with canned recipes that records every callback.

use std::collections::HashMap;

use parmake::jobs::{CommandState, TargetOutcome, TargetOwner, TargetRecipe};
use parmake::recipe::LineFlags;

#[derive(Debug, Clone, Default)]
pub struct RecordingOwner {
    recipes: HashMap<String, TargetRecipe>,
    vars: HashMap<String, String>,
    states: HashMap<String, CommandState>,
    expansions: Vec<(String, String)>,
    outcomes: Vec<(String, TargetOutcome)>,
    deletions: Vec<String>,
    intermediate_passes: usize,
}

impl RecordingOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipe(mut self, target: &str, text: &str) -> Self {
        self.recipes.insert(
            target.to_string(),
            TargetRecipe {
                text: text.to_string(),
                flags: LineFlags::default(),
            },
        );
        self
    }

    pub fn with_flags(mut self, target: &str, flags: LineFlags) -> Self {
        self.recipes.entry(target.to_string()).or_default().flags = flags;
        self
    }

    /// `$(NAME)` expands to `value`; `$@` always expands to the target.
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    /// Lines in the order they were expanded, with their target.
    pub fn expansions(&self) -> &[(String, String)] {
        &self.expansions
    }

    pub fn outcomes(&self) -> &[(String, TargetOutcome)] {
        &self.outcomes
    }

    pub fn outcome_of(&self, target: &str) -> Option<TargetOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(t, _)| t == target)
            .map(|(_, o)| *o)
    }

    pub fn deletions(&self) -> &[String] {
        &self.deletions
    }

    pub fn intermediate_passes(&self) -> usize {
        self.intermediate_passes
    }
}

impl TargetOwner for RecordingOwner {
    fn recipe(&self, target: &str) -> Option<TargetRecipe> {
        self.recipes.get(target).cloned()
    }

    fn expand_line(&mut self, target: &str, line: &str) -> String {
        let mut expanded = line.replace("$@", target);
        for (name, value) in self.vars.iter() {
            expanded = expanded.replace(&format!("$({name})"), value);
        }
        self.expansions.push((target.to_string(), expanded.clone()));
        expanded
    }

    fn command_started(&mut self, target: &str) {
        self.states.insert(target.to_string(), CommandState::Running);
    }

    fn command_state(&self, target: &str) -> CommandState {
        self.states.get(target).copied().unwrap_or_default()
    }

    fn finalize(&mut self, target: &str, outcome: TargetOutcome) {
        self.states.insert(target.to_string(), CommandState::Finished);
        self.outcomes.push((target.to_string(), outcome));
    }

    fn delete_partial_outputs(&mut self, target: &str) {
        self.deletions.push(target.to_string());
    }

    fn remove_intermediates(&mut self) {
        self.intermediate_passes += 1;
    }
}
