// tests/scheduler_fake.rs

mod common;
use crate::common::{fake_scheduler, init_tracing, run_targets, Behaviour, FakeProcesses, RecordingOwner};

use std::collections::VecDeque;
use std::error::Error;
use std::io;

use nix::sys::signal::Signal;
use parmake::errors::Result as ParmakeResult;
use parmake::jobs::{
    ExitKind, FixedLoad, LaunchRequest, LoadGovernor, RemoteExecutor, RemoteStart, Scheduler,
    SchedulerOptions, StartOutcome, TargetOutcome, TokenPool, JOBSERVER_ENV, LEVEL_ENV,
};

type TestResult = Result<(), Box<dyn Error>>;

fn single_lines(targets: &[&str]) -> RecordingOwner {
    targets.iter().fold(RecordingOwner::new(), |owner, t| {
        owner.with_recipe(t, &format!("run {t}"))
    })
}

#[test]
fn scenario_a_failure_stops_new_work_and_drains() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new()
        .with_rule("run T1", Behaviour::succeed(2))
        .with_rule("run T2", Behaviour::fail(1, 1));
    let options = SchedulerOptions {
        delete_on_error: true,
        ..SchedulerOptions::default()
    };
    let mut scheduler = fake_scheduler(2, options, procs);
    let mut owner = single_lines(&["T1", "T2", "T3"]);

    assert_eq!(scheduler.start_job(&mut owner, "T1")?, StartOutcome::Running);
    assert_eq!(scheduler.start_job(&mut owner, "T2")?, StartOutcome::Running);
    assert_eq!(scheduler.start_job(&mut owner, "T3")?, StartOutcome::Refused);

    let procs = scheduler.spawner();
    assert_eq!(procs.started_commands(), vec!["run T1", "run T2"]);
    assert_eq!(procs.starts()[0].at, procs.starts()[1].at, "T1 and T2 start together");
    assert_eq!(procs.max_concurrent(), 2);

    assert!(scheduler.is_aborting());
    assert_eq!(owner.outcome_of("T1"), Some(TargetOutcome::Succeeded));
    assert_eq!(owner.outcome_of("T2"), Some(TargetOutcome::Failed));
    assert_eq!(owner.outcome_of("T3"), None);
    assert_eq!(owner.deletions(), ["T2".to_string()]);

    assert_eq!(scheduler.live_jobs(), 0);
    let stats = scheduler.token_stats();
    assert_eq!(stats.issued, stats.returned);
    Ok(())
}

#[test]
fn scenario_b_ignored_failure_runs_remaining_lines() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new().with_rule("ignored-fail", Behaviour::fail(1, 1));
    let mut scheduler = fake_scheduler(1, SchedulerOptions::default(), procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("t", "@echo silent-ok\n-run ignored-fail\necho final-ok");

    scheduler.start_job(&mut owner, "t")?;

    assert_eq!(
        scheduler.spawner().completed_commands(),
        vec!["echo silent-ok", "run ignored-fail", "echo final-ok"]
    );
    assert_eq!(owner.outcome_of("t"), Some(TargetOutcome::Succeeded));
    assert!(!scheduler.is_aborting());
    assert_eq!(scheduler.live_jobs(), 0);
    Ok(())
}

#[test]
fn serial_mode_completes_in_start_order() -> TestResult {
    init_tracing();

    let run_once = || -> ParmakeResult<(Vec<String>, Vec<String>, Vec<u64>)> {
        let procs = FakeProcesses::new()
            .with_rule("run a", Behaviour::succeed(5))
            .with_rule("run b", Behaviour::succeed(1))
            .with_rule("run c", Behaviour::succeed(3));
        let mut scheduler = fake_scheduler(1, SchedulerOptions::default(), procs);
        let mut owner = single_lines(&["a", "b", "c"]);
        run_targets(&mut scheduler, &mut owner, &["a", "b", "c"])?;

        let procs = scheduler.spawner();
        Ok((
            procs.started_commands(),
            procs.completed_commands(),
            procs.completions().iter().map(|c| c.at).collect(),
        ))
    };

    let (started, completed, times) = run_once()?;
    assert_eq!(started, vec!["run a", "run b", "run c"]);
    assert_eq!(completed, started);
    assert_eq!(times, vec![5, 6, 9]);

    assert_eq!(run_once()?, (started, completed, times), "replay is identical");
    Ok(())
}

#[test]
fn abort_drains_every_running_job() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new()
        .with_rule("run a", Behaviour::succeed(5))
        .with_rule("run b", Behaviour::fail(2, 1))
        .with_rule("run c", Behaviour::succeed(3));
    let mut scheduler = fake_scheduler(3, SchedulerOptions::default(), procs);
    let mut owner = single_lines(&["a", "b", "c", "d"]);

    for t in ["a", "b", "c"] {
        assert_eq!(scheduler.start_job(&mut owner, t)?, StartOutcome::Running);
    }
    assert!(scheduler.wait_for_any(&mut owner)?);

    assert!(scheduler.is_aborting());
    assert_eq!(scheduler.live_jobs(), 0);
    assert_eq!(scheduler.running_local(), 0);
    assert_eq!(scheduler.spawner().running(), 0);
    assert_eq!(owner.outcome_of("a"), Some(TargetOutcome::Succeeded));
    assert_eq!(owner.outcome_of("b"), Some(TargetOutcome::Failed));
    assert_eq!(owner.outcome_of("c"), Some(TargetOutcome::Succeeded));

    assert_eq!(scheduler.start_job(&mut owner, "d")?, StartOutcome::Refused);
    assert!(!scheduler
        .spawner()
        .started_commands()
        .contains(&"run d".to_string()));

    let stats = scheduler.token_stats();
    assert_eq!(stats.issued, 2);
    assert_eq!(stats.issued, stats.returned);
    Ok(())
}

#[test]
fn recipe_lines_run_strictly_in_order() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new()
        .with_rule("step one", Behaviour::succeed(3))
        .with_rule("step two", Behaviour::succeed(2))
        .with_rule("work", Behaviour::succeed(1));
    let mut scheduler = fake_scheduler(2, SchedulerOptions::default(), procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("multi", "step one\nstep two\nstep three")
        .with_recipe("other", "work");

    run_targets(&mut scheduler, &mut owner, &["multi", "other"])?;

    let procs = scheduler.spawner();
    let started_at = |cmd: &str| {
        procs
            .starts()
            .iter()
            .find(|s| s.command() == cmd)
            .map(|s| s.at)
    };
    let finished_at = |cmd: &str| {
        procs
            .completions()
            .iter()
            .find(|c| c.command == cmd)
            .map(|c| c.at)
    };

    for (earlier, later) in [("step one", "step two"), ("step two", "step three")] {
        let done = finished_at(earlier).ok_or("earlier line never finished")?;
        let start = started_at(later).ok_or("later line never started")?;
        assert!(start >= done, "{later} started at {start} before {earlier} finished at {done}");
    }
    assert_eq!(owner.outcome_of("multi"), Some(TargetOutcome::Succeeded));
    assert_eq!(owner.outcome_of("other"), Some(TargetOutcome::Succeeded));
    Ok(())
}

#[test]
fn failed_line_stops_its_recipe() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new().with_rule("step two", Behaviour::fail(1, 1));
    let options = SchedulerOptions {
        keep_going: true,
        ..SchedulerOptions::default()
    };
    let mut scheduler = fake_scheduler(2, options, procs);
    let mut owner = RecordingOwner::new()
        .with_recipe("multi", "step one\nstep two\nstep three")
        .with_recipe("other", "work");

    run_targets(&mut scheduler, &mut owner, &["multi", "other"])?;

    let started = scheduler.spawner().started_commands();
    assert!(started.contains(&"step two".to_string()));
    assert!(!started.contains(&"step three".to_string()));
    assert_eq!(owner.outcome_of("multi"), Some(TargetOutcome::Failed));
    assert_eq!(owner.outcome_of("other"), Some(TargetOutcome::Succeeded));
    assert!(!scheduler.is_aborting(), "keep-going never aborts");
    Ok(())
}

#[test]
fn question_mode_runs_nothing() -> TestResult {
    init_tracing();

    let options = SchedulerOptions {
        question: true,
        ..SchedulerOptions::default()
    };
    let mut scheduler = fake_scheduler(1, options, FakeProcesses::new());
    let mut owner = RecordingOwner::new()
        .with_recipe("stale", "build it")
        .with_recipe("empty", "");

    assert_eq!(scheduler.start_job(&mut owner, "stale")?, StartOutcome::Finished);
    assert_eq!(scheduler.start_job(&mut owner, "empty")?, StartOutcome::Finished);

    assert!(scheduler.spawner().starts().is_empty());
    assert_eq!(owner.outcome_of("stale"), Some(TargetOutcome::NeedsUpdate));
    assert_eq!(owner.outcome_of("empty"), Some(TargetOutcome::Succeeded));
    Ok(())
}

#[test]
fn question_mode_takes_no_slots_without_recursive_lines() -> TestResult {
    init_tracing();

    let options = SchedulerOptions {
        question: true,
        ..SchedulerOptions::default()
    };
    let mut scheduler = fake_scheduler(2, options, FakeProcesses::new());
    let mut owner = RecordingOwner::new()
        .with_recipe("a", "build a")
        .with_recipe("b", "build b")
        .with_recipe("sub", "+submake all\nbuild sub");

    assert_eq!(scheduler.start_job(&mut owner, "a")?, StartOutcome::Finished);
    assert_eq!(scheduler.start_job(&mut owner, "b")?, StartOutcome::Finished);
    assert_eq!(scheduler.token_stats().issued, 0);

    assert_eq!(scheduler.start_job(&mut owner, "sub")?, StartOutcome::Running);
    while scheduler.wait_for_any(&mut owner)? {}

    assert_eq!(scheduler.spawner().started_commands(), vec!["submake all"]);
    assert_eq!(owner.outcome_of("sub"), Some(TargetOutcome::NeedsUpdate));
    assert_eq!(scheduler.token_stats().issued, 0);
    Ok(())
}

#[test]
fn just_print_only_runs_recursive_lines() -> TestResult {
    init_tracing();

    let options = SchedulerOptions {
        just_print: true,
        ..SchedulerOptions::default()
    };
    let mut scheduler = fake_scheduler(1, options, FakeProcesses::new());
    let mut owner = RecordingOwner::new()
        .with_recipe("t", "echo compiling\n+submake all\n$(MAKE) -C lib")
        .with_var("MAKE", "parmake");

    scheduler.start_job(&mut owner, "t")?;

    assert_eq!(
        scheduler.spawner().started_commands(),
        vec!["submake all", "parmake -C lib"]
    );
    assert_eq!(owner.outcome_of("t"), Some(TargetOutcome::Succeeded));
    Ok(())
}

#[test]
fn launch_failure_fails_target_and_deletes_outputs() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new().with_unlaunchable("missing-tool");
    let mut scheduler = fake_scheduler(1, SchedulerOptions::default(), procs);
    let mut owner = RecordingOwner::new().with_recipe("t", "missing-tool --flag\necho never");

    assert_eq!(scheduler.start_job(&mut owner, "t")?, StartOutcome::Finished);

    assert!(scheduler.spawner().starts().is_empty());
    assert_eq!(owner.outcome_of("t"), Some(TargetOutcome::Failed));
    assert_eq!(owner.deletions(), ["t".to_string()]);
    Ok(())
}

#[test]
fn no_op_lines_never_start_processes() -> TestResult {
    init_tracing();

    let mut scheduler = fake_scheduler(1, SchedulerOptions::default(), FakeProcesses::new());
    let mut owner = RecordingOwner::new().with_recipe("t", ":\n   \n@:\necho x");

    scheduler.start_job(&mut owner, "t")?;

    assert_eq!(scheduler.spawner().started_commands(), vec!["echo x"]);
    assert_eq!(owner.outcome_of("t"), Some(TargetOutcome::Succeeded));
    Ok(())
}

#[test]
fn high_load_defers_extra_jobs() -> TestResult {
    init_tracing();

    let pool = TokenPool::for_budget(3, false)?;
    let load = LoadGovernor::new(Some(1.0), Box::new(FixedLoad(5.0)));
    let mut scheduler = Scheduler::new(SchedulerOptions::default(), pool, load, FakeProcesses::new());
    let mut owner = single_lines(&["a", "b"]);

    assert_eq!(scheduler.start_job(&mut owner, "a")?, StartOutcome::Running);
    assert_eq!(scheduler.start_job(&mut owner, "b")?, StartOutcome::Deferred);
    assert_eq!(scheduler.waiting_jobs(), 1);

    while scheduler.live_jobs() > 0 || scheduler.waiting_jobs() > 0 {
        scheduler.wait_for_any(&mut owner)?;
    }

    let starts = scheduler.spawner().starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].command(), "run b");
    assert!(starts[1].at >= 1, "b waits until a is gone");
    assert_eq!(scheduler.spawner().max_concurrent(), 1);
    assert_eq!(owner.outcome_of("b"), Some(TargetOutcome::Succeeded));

    let stats = scheduler.token_stats();
    assert_eq!(stats.issued, 1);
    assert_eq!(stats.returned, 1);
    Ok(())
}

#[test]
fn children_get_level_and_no_jobserver_without_pipe() -> TestResult {
    init_tracing();

    let procs = FakeProcesses::new()
        .with_rule("run a", Behaviour::succeed(2))
        .with_rule("run b", Behaviour::succeed(1));
    let mut scheduler = fake_scheduler(2, SchedulerOptions::default(), procs);
    let mut owner = single_lines(&["a", "b"]);

    run_targets(&mut scheduler, &mut owner, &["a", "b"])?;

    let starts = scheduler.spawner().starts();
    let expected_level = (parmake::jobs::launcher::current_level() + 1).to_string();
    for start in starts {
        assert_eq!(start.env_var(LEVEL_ENV), Some(expected_level.as_str()));
        assert_eq!(start.env_var(JOBSERVER_ENV), None);
        assert!(start.request.env_remove.contains(&JOBSERVER_ENV.to_string()));
        assert!(start.request.inherit_fds.is_empty());
    }
    assert!(starts[0].request.good_stdin, "first job gets stdin");
    assert!(!starts[1].request.good_stdin, "stdin is never shared");
    Ok(())
}

/// Remote side that never manages to start anything.
#[derive(Default)]
struct BrokenRemote {
    attempts: usize,
}

impl RemoteExecutor for BrokenRemote {
    fn accepts(&mut self, _first_attempt: bool) -> bool {
        true
    }

    fn start(&mut self, _request: &LaunchRequest) -> io::Result<RemoteStart> {
        self.attempts += 1;
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no agents"))
    }

    fn poll(&mut self, _block: bool) -> ParmakeResult<Option<(u64, ExitKind)>> {
        Ok(None)
    }

    fn kill(&mut self, _id: u64, _signal: Signal) -> ParmakeResult<()> {
        Ok(())
    }
}

#[test]
fn remote_failures_fall_back_locally_until_bound() -> TestResult {
    init_tracing();

    let options = SchedulerOptions {
        max_remote_fallbacks: Some(1),
        ..SchedulerOptions::default()
    };
    let pool = TokenPool::for_budget(1, false)?;
    let mut scheduler = Scheduler::with_remote(
        options,
        pool,
        LoadGovernor::unlimited(),
        FakeProcesses::new(),
        BrokenRemote::default(),
    );
    let mut owner = single_lines(&["a", "b"]);

    scheduler.start_job(&mut owner, "a")?;
    assert_eq!(scheduler.start_job(&mut owner, "b")?, StartOutcome::Finished);

    assert_eq!(scheduler.remote().attempts, 2);
    assert_eq!(scheduler.spawner().started_commands(), vec!["run a"]);
    assert_eq!(owner.outcome_of("a"), Some(TargetOutcome::Succeeded));
    assert_eq!(owner.outcome_of("b"), Some(TargetOutcome::Failed));
    Ok(())
}

/// Remote side where every job finishes as soon as it is polled.
#[derive(Default)]
struct InstantRemote {
    next_id: u64,
    finished: VecDeque<u64>,
    started: Vec<String>,
}

impl RemoteExecutor for InstantRemote {
    fn accepts(&mut self, _first_attempt: bool) -> bool {
        true
    }

    fn start(&mut self, request: &LaunchRequest) -> io::Result<RemoteStart> {
        self.next_id += 1;
        self.finished.push_back(self.next_id);
        self.started.push(request.argv.join(" "));
        Ok(RemoteStart {
            id: self.next_id,
            used_stdin: false,
        })
    }

    fn poll(&mut self, _block: bool) -> ParmakeResult<Option<(u64, ExitKind)>> {
        Ok(self.finished.pop_front().map(|id| (id, ExitKind::Code(0))))
    }

    fn kill(&mut self, _id: u64, _signal: Signal) -> ParmakeResult<()> {
        Ok(())
    }
}

#[test]
fn remote_jobs_are_reaped_through_the_executor() -> TestResult {
    init_tracing();

    let pool = TokenPool::for_budget(1, false)?;
    let mut scheduler = Scheduler::with_remote(
        SchedulerOptions::default(),
        pool,
        LoadGovernor::unlimited(),
        FakeProcesses::new(),
        InstantRemote::default(),
    );
    let mut owner = RecordingOwner::new().with_recipe("r", "run one\nrun two");

    scheduler.start_job(&mut owner, "r")?;

    assert_eq!(scheduler.remote().started, vec!["run one", "run two"]);
    assert!(scheduler.spawner().starts().is_empty());
    assert_eq!(owner.outcome_of("r"), Some(TargetOutcome::Succeeded));
    assert_eq!(scheduler.live_jobs(), 0);
    Ok(())
}
