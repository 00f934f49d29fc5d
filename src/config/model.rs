// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level build description as read from a TOML file.
///
/// ```toml
/// [config]
/// jobs = 4
/// keep_going = false
///
/// [vars]
/// CC = "cc"
///
/// [target.app]
/// after = ["lib"]
/// recipe = """
/// @echo linking $@
/// $(CC) -o app main.o
/// """
/// outputs = ["app"]
/// ```
///
/// This is the unvalidated form; use [`ConfigFile::try_from`] (or
/// [`crate::config::load_and_validate`]) to obtain a [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global scheduler behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Variables available to `$(NAME)` references in recipes.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// All targets from `[target.<name>]`.
    #[serde(default)]
    pub target: BTreeMap<String, TargetConfig>,
}

/// A validated build description.
///
/// Only constructed through validation, so every `after` reference resolves
/// and the target graph is acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub vars: BTreeMap<String, String>,
    pub target: BTreeMap<String, TargetConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        vars: BTreeMap<String, String>,
        target: BTreeMap<String, TargetConfig>,
    ) -> Self {
        Self {
            config,
            vars,
            target,
        }
    }

    /// Goal used when none is given on the command line.
    pub fn default_goal(&self) -> Option<&str> {
        self.config
            .default_goal
            .as_deref()
            .or_else(|| self.target.keys().next().map(String::as_str))
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Concurrency budget. `1` runs everything serially, `0` is unlimited.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Optional load-average ceiling for starting additional local jobs.
    #[serde(default)]
    pub load_average: Option<f64>,

    #[serde(default)]
    pub keep_going: bool,

    #[serde(default)]
    pub ignore_errors: bool,

    #[serde(default)]
    pub silent: bool,

    /// Delete a failed target's declared outputs even when it exited
    /// normally (they are always deleted when a recipe dies from a signal).
    #[serde(default)]
    pub delete_on_error: bool,

    /// Command interpreter used for lines that cannot be run directly.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Run interpreted lines from a scratch script instead of `-c`.
    #[serde(default)]
    pub batch_mode_shell: bool,

    /// Share the job budget with recursive invocations through a pipe.
    #[serde(default = "default_jobserver")]
    pub jobserver: bool,

    /// Build-wide bound on local retries after failed remote dispatches.
    #[serde(default)]
    pub max_remote_fallbacks: Option<usize>,

    #[serde(default)]
    pub default_goal: Option<String>,
}

fn default_jobs() -> usize {
    1
}

pub(crate) fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_jobserver() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            load_average: None,
            keep_going: false,
            ignore_errors: false,
            silent: false,
            delete_on_error: false,
            shell: default_shell(),
            batch_mode_shell: false,
            jobserver: default_jobserver(),
            max_remote_fallbacks: None,
            default_goal: None,
        }
    }
}

/// `[target.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    /// Prerequisites that must finish successfully first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Raw, unexpanded recipe text. One command per line; a trailing
    /// backslash continues a line.
    #[serde(default)]
    pub recipe: String,

    /// Files written by the recipe, removed when the recipe fails.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Equivalent to prefixing every line with `@`.
    #[serde(default)]
    pub silent: bool,

    /// Equivalent to prefixing every line with `-`.
    #[serde(default)]
    pub ignore_errors: bool,

    /// Never delete this target's outputs.
    #[serde(default)]
    pub precious: bool,

    /// Outputs are removed once the build is over.
    #[serde(default)]
    pub intermediate: bool,
}
