// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod jobs;
pub mod logging;
pub mod recipe;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, ConfigSection};
use crate::errors::{ParmakeError, Result};
use crate::graph::{BuildGraph, run_build};
use crate::jobs::{
    JOBSERVER_ENV, Jobserver, LoadGovernor, Scheduler, SchedulerOptions, TokenPool, UnixProcesses,
    signals,
};
use crate::recipe::ShellConfig;

/// High-level entry point used by `main.rs`.
///
/// Loads the build description, sets up the job pool and signal handling,
/// builds the requested goals and returns the process exit status.
pub fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.file);
    let cfg = load_and_validate(&config_path)?;
    let settings = effective_settings(&cfg.config, &args);
    let goals = resolve_goals(&cfg, &args.goals)?;
    info!(path = %config_path.display(), ?goals, jobs = settings.jobs, "starting build");

    let pool = choose_pool(&settings, args.jobs)?;
    let options = SchedulerOptions {
        keep_going: settings.keep_going,
        ignore_errors: settings.ignore_errors,
        silent: settings.silent,
        just_print: args.just_print,
        question: args.question,
        delete_on_error: settings.delete_on_error,
        shell: ShellConfig {
            shell: settings.shell.clone(),
            batch_mode: settings.batch_mode_shell,
        },
        max_remote_fallbacks: settings.max_remote_fallbacks,
    };

    signals::install()?;
    let mut scheduler = Scheduler::new(
        options,
        pool,
        LoadGovernor::system(settings.load_average),
        UnixProcesses::new(),
    );
    if let Some(slot) = scheduler.token_reader() {
        signals::register_token_reader(slot);
    }

    let mut graph = BuildGraph::from_config(&cfg).with_silent(settings.silent);
    let result = run_build(&mut graph, &mut scheduler, &goals);
    signals::unregister_token_reader();

    let summary = result?;
    debug!(?summary, "build summary");
    Ok(summary.exit_code())
}

/// `[config]` with command-line overrides applied.
fn effective_settings(config: &ConfigSection, args: &CliArgs) -> ConfigSection {
    let mut settings = config.clone();
    if let Some(jobs) = args.jobs {
        settings.jobs = jobs;
    }
    if args.load_average.is_some() {
        settings.load_average = args.load_average;
    }
    settings.keep_going |= args.keep_going;
    settings.ignore_errors |= args.ignore_errors;
    settings.silent |= args.silent;
    settings
}

fn resolve_goals(cfg: &ConfigFile, goals: &[String]) -> Result<Vec<String>> {
    if !goals.is_empty() {
        if let Some(missing) = goals.iter().find(|g| !cfg.target.contains_key(*g)) {
            return Err(ParmakeError::TargetNotFound(missing.clone()));
        }
        return Ok(goals.to_vec());
    }
    match cfg.default_goal() {
        Some(goal) => Ok(vec![goal.to_string()]),
        None => Err(ParmakeError::ConfigError("no goals to build".to_string())),
    }
}

/// Join an inherited jobserver, or create a pool for our own budget.
fn choose_pool(settings: &ConfigSection, cli_jobs: Option<usize>) -> Result<TokenPool> {
    let Ok(value) = std::env::var(JOBSERVER_ENV) else {
        return TokenPool::for_budget(settings.jobs, settings.jobserver);
    };

    if cli_jobs.is_some() {
        warn!("-j given in a recursive invocation; ignoring the inherited jobserver");
        return TokenPool::for_budget(settings.jobs, settings.jobserver);
    }

    let Some((read, write)) = Jobserver::parse_env_value(&value) else {
        warn!(%value, "malformed {JOBSERVER_ENV}; running serially");
        return Ok(TokenPool::Serial);
    };

    // SAFETY: the descriptors were handed down by the parent invocation and
    // nothing else in this process owns them.
    match unsafe { Jobserver::from_raw_fds(read, write) } {
        Ok(server) => {
            debug!(fds = %server.env_value(), "joined inherited jobserver");
            Ok(TokenPool::Shared(server))
        }
        Err(err) => {
            warn!(error = %err, "jobserver unavailable; running serially");
            Ok(TokenPool::Serial)
        }
    }
}
