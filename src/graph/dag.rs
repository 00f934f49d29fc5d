// src/graph/dag.rs

use std::collections::{HashMap, HashSet};

use crate::config::model::ConfigFile;
use crate::errors::{ParmakeError, Result};

/// A single node in the target graph.
#[derive(Debug, Clone)]
struct DagNode {
    deps: Vec<String>,
}

/// Directed acyclic graph of targets.
///
/// Edges go from a target to the targets it depends on (`after`).
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<String, DagNode>,
}

impl DagGraph {
    /// Build a DAG from a validated [`ConfigFile`].
    ///
    /// Assumes that:
    /// - all `after` references are valid
    /// - there are no cycles
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let nodes = cfg
            .target
            .iter()
            .map(|(name, target)| {
                (
                    name.clone(),
                    DagNode {
                        deps: target.after.clone(),
                    },
                )
            })
            .collect();

        Self { nodes }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a target (the targets listed in its `after`).
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Every target the goals need, dependencies before dependents.
    pub fn closure_of(&self, goals: &[String]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();

        for goal in goals {
            if !self.contains(goal) {
                return Err(ParmakeError::TargetNotFound(goal.clone()));
            }
            self.visit(goal, &mut visited, &mut order);
        }

        Ok(order)
    }

    fn visit(&self, name: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        for dep in self.dependencies_of(name) {
            self.visit(dep, visited, order);
        }
        order.push(name.to_string());
    }
}
