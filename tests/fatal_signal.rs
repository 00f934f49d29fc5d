// tests/fatal_signal.rs
//
// The fatal-signal state is process-wide, so these tests live in their own
// binary and take a lock.

mod common;
use crate::common::builders::{ConfigFileBuilder, TargetConfigBuilder};
use crate::common::{fake_scheduler, init_tracing, Behaviour, FakeProcesses, RecordingOwner};

use std::error::Error;
use std::fs;
use std::sync::Mutex;

use nix::sys::signal::Signal;
use parmake::errors::ParmakeError;
use parmake::graph::{run_build, BuildGraph, TargetRunState};
use parmake::jobs::{
    signals, FixedLoad, LoadGovernor, Scheduler, SchedulerOptions, StartOutcome, TargetOutcome,
    TokenPool,
};

type TestResult = Result<(), Box<dyn Error>>;

static SIGNAL_STATE: Mutex<()> = Mutex::new(());

#[test]
fn fatal_signal_kills_cleans_up_and_reports() -> TestResult {
    init_tracing();
    let _lock = SIGNAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
    signals::clear_fatal();

    let procs = FakeProcesses::new().with_default(Behaviour::succeed(10));
    let mut scheduler = fake_scheduler(3, SchedulerOptions::default(), procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("a", "run a\nrun a again")
        .with_recipe("b", "run b")
        .with_recipe("c", "run c");

    scheduler.start_job(&mut owner, "a")?;
    scheduler.start_job(&mut owner, "b")?;

    signals::record_fatal(Signal::SIGTERM);
    let result = scheduler.wait_for_any(&mut owner);
    signals::clear_fatal();

    assert!(matches!(result, Err(ParmakeError::Interrupted(Signal::SIGTERM))));

    let procs = scheduler.spawner();
    assert_eq!(procs.killed().len(), 2);
    assert!(procs.killed().iter().all(|(_, sig)| *sig == Signal::SIGTERM));
    assert_eq!(procs.running(), 0);
    assert!(
        !procs.started_commands().contains(&"run a again".to_string()),
        "no new lines start while dying"
    );

    let mut deleted = owner.deletions().to_vec();
    deleted.sort();
    assert_eq!(deleted, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(owner.outcome_of("a"), Some(TargetOutcome::Failed));
    assert_eq!(owner.outcome_of("b"), Some(TargetOutcome::Failed));
    assert_eq!(owner.intermediate_passes(), 1);
    assert_eq!(scheduler.live_jobs(), 0);

    assert_eq!(scheduler.start_job(&mut owner, "c")?, StartOutcome::Refused);
    Ok(())
}

#[test]
fn fatal_signal_drops_waiting_jobs() -> TestResult {
    init_tracing();
    let _lock = SIGNAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
    signals::clear_fatal();

    let pool = TokenPool::for_budget(2, false)?;
    let load = LoadGovernor::new(Some(1.0), Box::new(FixedLoad(9.0)));
    let procs = FakeProcesses::new().with_default(Behaviour::succeed(5));
    let mut scheduler = Scheduler::new(SchedulerOptions::default(), pool, load, procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("running", "run first")
        .with_recipe("deferred", "run second");

    assert_eq!(scheduler.start_job(&mut owner, "running")?, StartOutcome::Running);
    assert_eq!(scheduler.start_job(&mut owner, "deferred")?, StartOutcome::Deferred);

    signals::record_fatal(Signal::SIGINT);
    let result = scheduler.wait_for_any(&mut owner);
    signals::clear_fatal();

    assert!(matches!(result, Err(ParmakeError::Interrupted(Signal::SIGINT))));
    assert_eq!(scheduler.waiting_jobs(), 0);
    assert_eq!(scheduler.live_jobs(), 0);
    assert_eq!(scheduler.spawner().started_commands(), vec!["run first"]);
    assert_eq!(owner.outcome_of("deferred"), Some(TargetOutcome::Failed));
    assert_eq!(owner.outcome_of("running"), Some(TargetOutcome::Failed));

    let stats = scheduler.token_stats();
    assert_eq!(stats.issued, stats.returned);
    Ok(())
}

#[test]
fn signal_with_no_live_jobs_never_starts_waiting_ones() -> TestResult {
    init_tracing();
    let _lock = SIGNAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
    signals::clear_fatal();

    let pool = TokenPool::for_budget(2, false)?;
    let load = LoadGovernor::new(Some(1.0), Box::new(FixedLoad(9.0)));
    let procs = FakeProcesses::new().with_default(Behaviour::succeed(5));
    let mut scheduler = Scheduler::new(SchedulerOptions::default(), pool, load, procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("running", "run first")
        .with_recipe("deferred", "run second");

    assert_eq!(scheduler.start_job(&mut owner, "running")?, StartOutcome::Running);
    assert_eq!(scheduler.start_job(&mut owner, "deferred")?, StartOutcome::Deferred);
    assert!(scheduler.reap(&mut owner, true)?);
    assert_eq!(scheduler.live_jobs(), 0);
    assert_eq!(scheduler.waiting_jobs(), 1);

    signals::record_fatal(Signal::SIGINT);
    let result = scheduler.wait_for_any(&mut owner);
    signals::clear_fatal();

    assert!(matches!(result, Err(ParmakeError::Interrupted(Signal::SIGINT))));
    assert_eq!(scheduler.spawner().started_commands(), vec!["run first"]);
    assert!(scheduler.spawner().killed().is_empty());
    assert_eq!(scheduler.waiting_jobs(), 0);
    assert_eq!(owner.outcome_of("running"), Some(TargetOutcome::Succeeded));
    assert_eq!(owner.outcome_of("deferred"), Some(TargetOutcome::Failed));
    assert_eq!(owner.intermediate_passes(), 1);

    let stats = scheduler.token_stats();
    assert_eq!(stats.issued, stats.returned);
    Ok(())
}

#[test]
fn signal_after_the_last_job_still_interrupts() -> TestResult {
    init_tracing();
    let _lock = SIGNAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
    signals::clear_fatal();

    let mut scheduler = fake_scheduler(1, SchedulerOptions::default(), FakeProcesses::new());
    let mut owner = RecordingOwner::new().with_recipe("t", "run t");

    scheduler.start_job(&mut owner, "t")?;
    assert_eq!(owner.outcome_of("t"), Some(TargetOutcome::Succeeded));
    assert_eq!(scheduler.live_jobs(), 0);

    signals::record_fatal(Signal::SIGTERM);
    let result = scheduler.drain_all(&mut owner);
    signals::clear_fatal();

    assert!(matches!(result, Err(ParmakeError::Interrupted(Signal::SIGTERM))));
    assert_eq!(owner.intermediate_passes(), 1);
    assert_eq!(scheduler.start_job(&mut owner, "t")?, StartOutcome::Refused);
    Ok(())
}

#[test]
fn build_interrupted_as_its_last_job_exits_cleans_up() -> TestResult {
    init_tracing();
    let _lock = SIGNAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
    signals::clear_fatal();

    let dir = tempfile::TempDir::new()?;
    let generated = dir.path().join("gen.c");
    fs::write(&generated, b"int x;")?;

    let cfg = ConfigFileBuilder::new()
        .with_target(
            "gen",
            TargetConfigBuilder::new("run gen")
                .output(&generated.display().to_string())
                .intermediate(true)
                .build(),
        )
        .with_target("app", TargetConfigBuilder::new("run app").after("gen").build())
        .build();

    let procs = FakeProcesses::new().with_rule("run app", Behaviour::succeed(1).raising(Signal::SIGHUP));
    let mut scheduler = fake_scheduler(2, SchedulerOptions::default(), procs);
    let mut graph = BuildGraph::from_config(&cfg).with_silent(true);

    let result = run_build(&mut graph, &mut scheduler, &["app".to_string()]);
    signals::clear_fatal();

    assert!(matches!(result, Err(ParmakeError::Interrupted(Signal::SIGHUP))));
    assert_eq!(scheduler.spawner().started_commands(), vec!["run gen", "run app"]);
    assert_eq!(graph.run_state_of("app"), TargetRunState::DoneSuccess);
    assert!(!generated.exists(), "intermediates are removed before exiting");
    Ok(())
}
