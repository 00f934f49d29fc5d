// src/jobs/mod.rs

//! Parallel job execution.
//!
//! [`Scheduler`] decides when a target's recipe may start, launches one
//! process per command line, bounds how many run at once (locally through a
//! slot pool, across recursive invocations through the jobserver pipe) and
//! reports each target's outcome back to its [`TargetOwner`].
//!
//! The only asynchronous input is the OS: child-exit and fatal signals are
//! recorded by the handlers in [`signals`] and acted on by the reaper.

pub mod job;
pub mod jobserver;
pub mod launcher;
pub mod load;
pub mod owner;
pub mod process;
pub mod reaper;
pub mod remote;
pub mod scheduler;
pub mod signals;
pub mod table;
pub mod token_pool;

pub use jobserver::{JOBSERVER_ENV, Jobserver};
pub use launcher::LEVEL_ENV;
pub use load::{FixedLoad, LoadGovernor, LoadSource, SystemLoad};
pub use owner::{CommandState, TargetOutcome, TargetOwner, TargetRecipe};
pub use process::{Completion, ExitKind, JobKey, LaunchRequest, ProcessSpawner, UnixProcesses};
pub use reaper::failure_message;
pub use remote::{NoRemote, RemoteExecutor, RemoteStart};
pub use scheduler::{Scheduler, SchedulerOptions, StartOutcome};
pub use token_pool::{LocalSlots, SlotGrant, TokenPool, TokenStats};
