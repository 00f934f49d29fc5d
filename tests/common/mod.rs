#![allow(dead_code)]

pub use parmake_test_utils::builders;
pub use parmake_test_utils::fake_processes::{CompletionRecord, StartRecord};
pub use parmake_test_utils::{init_tracing, Behaviour, FakeProcesses, RecordingOwner};

use parmake::jobs::{LoadGovernor, Scheduler, SchedulerOptions, TokenPool};

/// Scheduler over fake processes with an in-process slot pool of `jobs`.
pub fn fake_scheduler(
    jobs: usize,
    options: SchedulerOptions,
    procs: FakeProcesses,
) -> Scheduler<FakeProcesses> {
    let pool = TokenPool::for_budget(jobs, false).expect("local pool never fails");
    Scheduler::new(options, pool, LoadGovernor::unlimited(), procs)
}

/// Start every target in order, then wait for all of them.
pub fn run_targets(
    scheduler: &mut Scheduler<FakeProcesses>,
    owner: &mut RecordingOwner,
    targets: &[&str],
) -> parmake::errors::Result<()> {
    for target in targets {
        scheduler.start_job(owner, target)?;
    }
    while scheduler.live_jobs() > 0 || scheduler.waiting_jobs() > 0 {
        scheduler.wait_for_any(owner)?;
    }
    Ok(())
}
