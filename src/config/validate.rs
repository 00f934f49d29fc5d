// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ParmakeError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ParmakeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.vars, raw.target))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_targets(cfg)?;
    validate_global_config(cfg)?;
    validate_target_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_targets(cfg: &RawConfigFile) -> Result<()> {
    if cfg.target.is_empty() {
        return Err(ParmakeError::ConfigError(
            "build description must contain at least one [target.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if let Some(load) = cfg.config.load_average {
        if !load.is_finite() || load <= 0.0 {
            return Err(ParmakeError::ConfigError(format!(
                "[config].load_average must be a positive number (got {load})"
            )));
        }
    }

    if cfg.config.shell.trim().is_empty() {
        return Err(ParmakeError::ConfigError(
            "[config].shell must not be empty".to_string(),
        ));
    }

    if let Some(goal) = cfg.config.default_goal.as_deref() {
        if !cfg.target.contains_key(goal) {
            return Err(ParmakeError::ConfigError(format!(
                "[config].default_goal names unknown target '{goal}'"
            )));
        }
    }

    Ok(())
}

fn validate_target_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, target) in cfg.target.iter() {
        for dep in target.after.iter() {
            if !cfg.target.contains_key(dep) {
                return Err(ParmakeError::ConfigError(format!(
                    "target '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(ParmakeError::ConfigError(format!(
                    "target '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.target.keys() {
        graph.add_node(name.as_str());
    }

    for (name, target) in cfg.target.iter() {
        for dep in target.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(ParmakeError::DagCycle(format!(
            "cycle detected in target graph involving '{}'",
            cycle.node_id()
        ))),
    }
}
