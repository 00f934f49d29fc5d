// src/graph/build.rs

//! The dependency graph as seen by the scheduler, and the loop that walks it.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::graph::dag::DagGraph;
use crate::graph::expand::Expander;
use crate::graph::target_info::{RunState, TargetInfo, TargetRunState};
use crate::jobs::{
    CommandState, ProcessSpawner, RemoteExecutor, Scheduler, StartOutcome, TargetOutcome,
    TargetOwner, TargetRecipe,
};

/// Owns every target of a build description and its per-build state.
#[derive(Debug, Clone)]
pub struct BuildGraph {
    dag: DagGraph,
    targets: HashMap<String, TargetInfo>,
    expander: Expander,
    silent: bool,
    deleted: Vec<PathBuf>,
    removed: Vec<PathBuf>,
}

impl BuildGraph {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let targets = cfg
            .target
            .iter()
            .map(|(name, t)| (name.clone(), TargetInfo::from_config(name, t)))
            .collect();

        Self {
            dag: DagGraph::from_config(cfg),
            targets,
            expander: Expander::new(cfg.vars.clone(), Expander::default_make_program()),
            silent: cfg.config.silent,
            deleted: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Use `program` for `$(MAKE)` instead of this executable.
    pub fn with_make_program(mut self, program: impl Into<String>) -> Self {
        self.expander = self.expander.with_make_program(program);
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn dag(&self) -> &DagGraph {
        &self.dag
    }

    pub fn run_state_of(&self, name: &str) -> TargetRunState {
        self.targets.get(name).and_then(|t| t.run_state).into()
    }

    /// Files removed because a recipe failed or was interrupted.
    pub fn deleted_files(&self) -> &[PathBuf] {
        &self.deleted
    }

    /// Intermediate files removed at the end of the build.
    pub fn removed_intermediates(&self) -> &[PathBuf] {
        &self.removed
    }

    /// Mark every target the goals need as pending; returns them in
    /// dependency order.
    pub fn plan(&mut self, goals: &[String]) -> Result<Vec<String>> {
        let order = self.dag.closure_of(goals)?;
        for name in order.iter() {
            if let Some(info) = self.targets.get_mut(name) {
                info.run_state = Some(RunState::Pending);
                info.command_state = CommandState::NotStarted;
            }
        }
        debug!(?goals, targets = order.len(), "planned build");
        Ok(order)
    }

    /// Pending targets whose dependencies are all done and usable.
    pub fn ready_targets(&self, order: &[String]) -> Vec<String> {
        order
            .iter()
            .filter(|name| self.is_pending(name))
            .filter(|name| {
                self.dag
                    .dependencies_of(name)
                    .iter()
                    .all(|dep| self.targets.get(dep).is_some_and(TargetInfo::satisfies_dependents))
            })
            .cloned()
            .collect()
    }

    /// Fail pending targets that depend on a failed one. Repeats until
    /// nothing changes so failures travel the whole chain.
    pub fn fail_blocked(&mut self, order: &[String]) -> usize {
        let mut total = 0;
        loop {
            let blocked: Vec<String> = order
                .iter()
                .filter(|name| self.is_pending(name))
                .filter(|name| {
                    self.dag.dependencies_of(name).iter().any(|dep| {
                        self.targets
                            .get(dep)
                            .is_some_and(|t| t.run_state == Some(RunState::DoneFailed))
                    })
                })
                .cloned()
                .collect();
            if blocked.is_empty() {
                return total;
            }
            for name in blocked {
                debug!(target_name = %name, "dependency failed; not remaking");
                let _ = io::stdout().flush();
                eprintln!("parmake: Target '{name}' not remade because of errors.");
                self.set_run_state(&name, RunState::DoneFailed);
                total += 1;
            }
        }
    }

    pub fn any_failed(&self) -> bool {
        self.targets
            .values()
            .any(|t| t.run_state == Some(RunState::DoneFailed))
    }

    fn is_pending(&self, name: &str) -> bool {
        self.targets
            .get(name)
            .is_some_and(|t| t.run_state == Some(RunState::Pending))
    }

    fn set_run_state(&mut self, name: &str, state: RunState) {
        if let Some(info) = self.targets.get_mut(name) {
            info.run_state = Some(state);
        }
    }

    fn summary(&self, order: &[String]) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for name in order {
            let Some(info) = self.targets.get(name) else {
                continue;
            };
            let bucket = match info.run_state {
                Some(RunState::DoneSuccess) => &mut summary.succeeded,
                Some(RunState::NeedsUpdate) => &mut summary.needs_update,
                Some(RunState::DoneFailed) => &mut summary.failed,
                Some(RunState::Pending | RunState::Running) | None => &mut summary.not_run,
            };
            bucket.push(name.clone());
        }
        summary
    }
}

impl TargetOwner for BuildGraph {
    fn recipe(&self, target: &str) -> Option<TargetRecipe> {
        self.targets.get(target).map(|t| TargetRecipe {
            text: t.recipe.clone(),
            flags: t.flags,
        })
    }

    fn expand_line(&mut self, target: &str, line: &str) -> String {
        self.expander.expand(target, self.dag.dependencies_of(target), line)
    }

    fn command_started(&mut self, target: &str) {
        if let Some(info) = self.targets.get_mut(target) {
            info.command_state = CommandState::Running;
        }
    }

    fn command_state(&self, target: &str) -> CommandState {
        self.targets
            .get(target)
            .map(|t| t.command_state)
            .unwrap_or_default()
    }

    fn finalize(&mut self, target: &str, outcome: TargetOutcome) {
        debug!(target_name = %target, ?outcome, "target finished");
        if let Some(info) = self.targets.get_mut(target) {
            info.command_state = CommandState::Finished;
            info.run_state = Some(outcome.into());
        }
    }

    fn delete_partial_outputs(&mut self, target: &str) {
        let Some(info) = self.targets.get(target) else {
            return;
        };
        if info.precious {
            debug!(target_name = %target, "precious; keeping outputs");
            return;
        }

        for path in info.outputs.clone() {
            if !is_plain_file(&path) {
                continue;
            }
            let _ = io::stdout().flush();
            eprintln!("parmake: *** Deleting file '{}'", path.display());
            match fs::remove_file(&path) {
                Ok(()) => self.deleted.push(path),
                Err(err) => eprintln!("parmake: unlink: {}: {err}", path.display()),
            }
        }
    }

    fn remove_intermediates(&mut self) {
        let mut doomed: Vec<PathBuf> = self
            .targets
            .values()
            .filter(|t| t.intermediate && t.command_state != CommandState::NotStarted)
            .flat_map(|t| t.outputs.iter().cloned())
            .filter(|p| is_plain_file(p))
            .collect();
        if doomed.is_empty() {
            return;
        }
        doomed.sort();

        if !self.silent {
            let names: Vec<String> = doomed.iter().map(|p| p.display().to_string()).collect();
            println!("rm {}", names.join(" "));
        }
        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => self.removed.push(path),
                Err(err) => eprintln!("parmake: unlink: {}: {err}", path.display()),
            }
        }
    }
}

fn is_plain_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| !m.is_dir())
}

/// Where every planned target ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub succeeded: Vec<String>,
    pub needs_update: Vec<String>,
    pub failed: Vec<String>,
    /// Never started because the build stopped first.
    pub not_run: Vec<String>,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_run.is_empty()
    }

    /// 0 when everything is up to date, 1 when question mode found work,
    /// 2 on any failure.
    pub fn exit_code(&self) -> i32 {
        if !self.failed.is_empty() || !self.not_run.is_empty() {
            2
        } else if !self.needs_update.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Build `goals` and everything they depend on.
///
/// Targets are started as soon as their dependencies are done. Without
/// keep-going the first failure stops new work; with it, only targets that
/// depend on a failure are skipped.
pub fn run_build<S, R>(
    graph: &mut BuildGraph,
    scheduler: &mut Scheduler<S, R>,
    goals: &[String],
) -> Result<BuildSummary>
where
    S: ProcessSpawner,
    R: RemoteExecutor,
{
    let order = graph.plan(goals)?;
    let keep_going = scheduler.options().keep_going;

    loop {
        if keep_going {
            graph.fail_blocked(&order);
        }
        let stopping = |graph: &BuildGraph, scheduler: &Scheduler<S, R>| {
            scheduler.is_aborting() || (!keep_going && graph.any_failed())
        };

        let mut started = false;
        if !stopping(graph, scheduler) {
            for name in graph.ready_targets(&order) {
                graph.set_run_state(&name, RunState::Running);
                let outcome = scheduler.start_job(graph, &name)?;
                if outcome == StartOutcome::Refused {
                    graph.set_run_state(&name, RunState::Pending);
                    break;
                }
                started = true;
                if stopping(graph, scheduler) {
                    break;
                }
            }
        }

        if stopping(graph, scheduler) {
            scheduler.drain_all(graph)?;
            break;
        }
        if scheduler.live_jobs() > 0 || scheduler.waiting_jobs() > 0 {
            scheduler.wait_for_any(graph)?;
            continue;
        }
        if !started {
            break;
        }
    }

    scheduler.drain_all(graph)?;
    if keep_going {
        graph.fail_blocked(&order);
    }
    graph.remove_intermediates();
    // A signal that arrived after the last job still ends the run.
    scheduler.check_fatal(graph)?;

    let summary = graph.summary(&order);
    info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        needs_update = summary.needs_update.len(),
        not_run = summary.not_run.len(),
        "build finished"
    );
    Ok(summary)
}
