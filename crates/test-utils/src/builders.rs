#![allow(dead_code)]

use std::collections::BTreeMap;

use parmake::config::{ConfigFile, ConfigSection, RawConfigFile, TargetConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                vars: BTreeMap::new(),
                target: BTreeMap::new(),
            },
        }
    }

    pub fn with_target(mut self, name: &str, target: TargetConfig) -> Self {
        self.config.target.insert(name.to_string(), target);
        self
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.config.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.config.config.jobs = jobs;
        self
    }

    pub fn keep_going(mut self, val: bool) -> Self {
        self.config.config.keep_going = val;
        self
    }

    pub fn silent(mut self, val: bool) -> Self {
        self.config.config.silent = val;
        self
    }

    pub fn default_goal(mut self, goal: &str) -> Self {
        self.config.config.default_goal = Some(goal.to_string());
        self
    }

    pub fn load_average(mut self, load: f64) -> Self {
        self.config.config.load_average = Some(load);
        self
    }

    /// The unvalidated form, for exercising validation errors.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TargetConfig`.
pub struct TargetConfigBuilder {
    target: TargetConfig,
}

impl TargetConfigBuilder {
    pub fn new(recipe: &str) -> Self {
        Self {
            target: TargetConfig {
                recipe: recipe.to_string(),
                ..TargetConfig::default()
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.target.after.push(dep.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.target.outputs.push(path.to_string());
        self
    }

    pub fn silent(mut self, val: bool) -> Self {
        self.target.silent = val;
        self
    }

    pub fn ignore_errors(mut self, val: bool) -> Self {
        self.target.ignore_errors = val;
        self
    }

    pub fn precious(mut self, val: bool) -> Self {
        self.target.precious = val;
        self
    }

    pub fn intermediate(mut self, val: bool) -> Self {
        self.target.intermediate = val;
        self
    }

    pub fn build(self) -> TargetConfig {
        self.target
    }
}
