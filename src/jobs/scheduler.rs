// src/jobs/scheduler.rs

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;

use tracing::{debug, warn};

use crate::errors::{ParmakeError, Result};
use crate::jobs::job::Job;
use crate::jobs::jobserver::Jobserver;
use crate::jobs::launcher::{Launcher, current_level};
use crate::jobs::load::LoadGovernor;
use crate::jobs::owner::{CommandState, TargetOutcome, TargetOwner};
use crate::jobs::process::{JobKey, ProcessSpawner};
use crate::jobs::remote::{NoRemote, RemoteExecutor};
use crate::jobs::signals::{self, SignalGuard};
use crate::jobs::table::JobTable;
use crate::jobs::token_pool::{SlotGrant, Slots, Take, TokenPool, TokenStats};
use crate::recipe::{Invocation, LineFlags, SegmentedRecipe, ShellConfig, build_invocation, segment};

/// Build-wide switches that change how jobs run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    pub keep_going: bool,
    pub ignore_errors: bool,
    pub silent: bool,
    /// Echo lines instead of running them (recursive lines still run).
    pub just_print: bool,
    /// Run nothing; report whether anything would run.
    pub question: bool,
    pub delete_on_error: bool,
    pub shell: ShellConfig,
    /// Local retries after failed remote starts, across the whole build.
    pub max_remote_fallbacks: Option<usize>,
}

/// What `start_job` did with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A process is running; the reaper will finish the target.
    Running,
    /// Waiting for the load average to drop.
    Deferred,
    /// Finalized without leaving a process behind.
    Finished,
    /// The build is stopping; nothing was started.
    Refused,
}

pub(crate) enum Dispatch {
    Running(JobKey),
    Finished(TargetOutcome),
}

/// Owns every running job and all state shared with the signal handlers.
///
/// Single-threaded: parallelism comes only from child processes.
pub struct Scheduler<S: ProcessSpawner, R: RemoteExecutor = NoRemote> {
    pub(crate) options: SchedulerOptions,
    pub(crate) slots: Slots,
    pub(crate) load: LoadGovernor,
    pub(crate) spawner: S,
    pub(crate) remote: R,
    pub(crate) launcher: Launcher,
    pub(crate) table: JobTable,
    pub(crate) waiting: VecDeque<Job>,
    recipes: HashMap<String, Arc<SegmentedRecipe>>,
    pub(crate) aborting: bool,
    pub(crate) draining: bool,
    pub(crate) shutting_down: bool,
    remote_fallbacks: usize,
}

impl<S: ProcessSpawner> Scheduler<S, NoRemote> {
    pub fn new(options: SchedulerOptions, pool: TokenPool, load: LoadGovernor, spawner: S) -> Self {
        Self::with_remote(options, pool, load, spawner, NoRemote)
    }
}

impl<S: ProcessSpawner, R: RemoteExecutor> Scheduler<S, R> {
    pub fn with_remote(
        options: SchedulerOptions,
        pool: TokenPool,
        load: LoadGovernor,
        spawner: S,
        remote: R,
    ) -> Self {
        let slots = Slots::new(pool);
        let launcher = Launcher::new(current_level(), slots.jobserver().map(Jobserver::fds));
        Self {
            options,
            slots,
            load,
            spawner,
            remote,
            launcher,
            table: JobTable::new(),
            waiting: VecDeque::new(),
            recipes: HashMap::new(),
            aborting: false,
            draining: false,
            shutting_down: false,
            remote_fallbacks: 0,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn spawner_mut(&mut self) -> &mut S {
        &mut self.spawner
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn jobserver(&self) -> Option<&Jobserver> {
        self.slots.jobserver()
    }

    /// Slot the signal handlers close to interrupt a blocking token read.
    pub fn token_reader(&self) -> Option<Arc<AtomicI32>> {
        self.slots.jobserver().map(Jobserver::reader_slot)
    }

    pub fn token_stats(&self) -> TokenStats {
        self.slots.stats()
    }

    pub fn live_jobs(&self) -> usize {
        self.table.len()
    }

    pub fn running_local(&self) -> usize {
        self.table.running_local()
    }

    pub fn waiting_jobs(&self) -> usize {
        self.waiting.len()
    }

    /// Jobs currently holding a slot, running or waiting.
    pub fn holders(&self) -> usize {
        self.table.len() + self.waiting.len()
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    pub fn is_serial(&self) -> bool {
        self.slots.is_serial()
    }

    /// Start running `target`'s recipe.
    pub fn start_job(
        &mut self,
        owner: &mut dyn TargetOwner,
        target: &str,
    ) -> Result<StartOutcome> {
        if self.aborting || self.shutting_down {
            debug!(target_name = %target, "refusing new job while stopping");
            return Ok(StartOutcome::Refused);
        }
        self.check_fatal(owner)?;

        // Jobs already waiting for the load to drop go first.
        self.start_waiting_jobs(owner)?;
        self.reap(owner, false)?;
        if self.aborting {
            return Ok(StartOutcome::Refused);
        }

        let (recipe, flags) = self.recipe_for(owner, target);
        let mut job = Job::new(target, Arc::clone(&recipe), flags);
        if !job.advance(owner) {
            debug!(target_name = %target, "no commands to run");
            owner.finalize(target, TargetOutcome::Succeeded);
            return Ok(StartOutcome::Finished);
        }
        if self.options.question && !recipe.any_recurse {
            // Nothing here would run; no need for a slot.
            owner.finalize(target, TargetOutcome::NeedsUpdate);
            return Ok(StartOutcome::Finished);
        }

        if self.slots.needs_tokens() {
            let grant = self.acquire_slot(owner)?;
            debug!(target_name = %target, ?grant, holders = self.holders(), "got job slot");
        }
        if self.aborting || self.shutting_down {
            self.release_slot()?;
            return Ok(StartOutcome::Refused);
        }

        job.remote = self.remote.accepts(true);
        if !job.remote && !self.load.admits(self.table.running_local()) {
            debug!(target_name = %target, "load too high; putting job on the waiting list");
            owner.command_started(target);
            self.waiting.push_back(job);
            return Ok(StartOutcome::Deferred);
        }

        let outcome = self.launch(owner, job)?;

        if self.slots.is_serial() {
            while owner.command_state(target) == CommandState::Running && !self.table.is_empty() {
                if !self.reap(owner, true)? {
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Block until some job finishes (starting waiting jobs first).
    /// Returns `false` if there was nothing to wait for.
    pub fn wait_for_any(&mut self, owner: &mut dyn TargetOwner) -> Result<bool> {
        self.check_fatal(owner)?;
        self.start_waiting_jobs(owner)?;
        if self.table.is_empty() {
            return Ok(false);
        }
        self.reap(owner, true)
    }

    /// Fail and drop waiting jobs, then wait for every running job.
    pub fn drain_all(&mut self, owner: &mut dyn TargetOwner) -> Result<()> {
        self.check_fatal(owner)?;
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let result = self.drain_inner(owner);
        self.draining = false;
        result
    }

    fn drain_inner(&mut self, owner: &mut dyn TargetOwner) -> Result<()> {
        self.drop_waiting(owner)?;

        if self.aborting && !self.table.is_empty() {
            let _ = io::stdout().flush();
            eprintln!("parmake: *** Waiting for unfinished jobs....");
        }

        while !self.table.is_empty() {
            if !self.reap(owner, true)? {
                warn!(live = self.table.len(), "no child processes left to wait for");
                break;
            }
        }
        Ok(())
    }

    fn recipe_for(
        &mut self,
        owner: &mut dyn TargetOwner,
        target: &str,
    ) -> (Arc<SegmentedRecipe>, LineFlags) {
        let recipe = owner.recipe(target).unwrap_or_default();
        let segmented = self
            .recipes
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(segment(&recipe.text)));
        (Arc::clone(segmented), recipe.flags)
    }

    fn acquire_slot(&mut self, owner: &mut dyn TargetOwner) -> Result<SlotGrant> {
        loop {
            if self.holders() == 0 {
                return Ok(SlotGrant::Free);
            }

            // The duplicate must exist before reaping so a child that exits
            // between the reap and the read closes it.
            self.slots.prepare_take()?;
            self.reap(owner, false)?;
            if self.holders() == 0 {
                return Ok(SlotGrant::Free);
            }

            match self.slots.take()? {
                Take::Granted => return Ok(SlotGrant::Token),
                Take::Interrupted => continue,
                Take::Exhausted => {
                    if self.table.is_empty() {
                        self.start_waiting_jobs(owner)?;
                    } else {
                        self.reap(owner, true)?;
                    }
                }
            }
        }
    }

    /// Return a slot for a job that just stopped holding one.
    pub(crate) fn release_slot(&mut self) -> Result<()> {
        // The last holder was using the free slot.
        if self.holders() > 0 {
            self.slots.release()?;
        }
        Ok(())
    }

    fn start_waiting_jobs(&mut self, owner: &mut dyn TargetOwner) -> Result<()> {
        while !self.waiting.is_empty() {
            self.reap(owner, false)?;
            // Nothing new starts once a fatal signal is pending.
            self.check_fatal(owner)?;

            let Some(mut job) = self.waiting.pop_front() else {
                break;
            };
            job.remote = self.remote.accepts(true);
            if !job.remote && !self.load.admits(self.table.running_local()) {
                self.waiting.push_front(job);
                break;
            }
            debug!(target_name = %job.target, "starting waiting job");
            self.launch(owner, job)?;
        }
        Ok(())
    }

    fn drop_waiting(&mut self, owner: &mut dyn TargetOwner) -> Result<()> {
        while let Some(job) = self.waiting.pop_front() {
            debug!(target_name = %job.target, "dropping waiting job");
            owner.finalize(&job.target, TargetOutcome::Failed);
            self.release_slot()?;
        }
        Ok(())
    }

    fn launch(&mut self, owner: &mut dyn TargetOwner, mut job: Job) -> Result<StartOutcome> {
        match self.dispatch(owner, &mut job)? {
            Dispatch::Running(key) => {
                self.table.insert(key, job);
                Ok(StartOutcome::Running)
            }
            Dispatch::Finished(outcome) => {
                owner.finalize(&job.target, outcome);
                self.release_slot()?;
                Ok(StartOutcome::Finished)
            }
        }
    }

    /// Run the job's loaded line, skipping lines that need no process.
    pub(crate) fn dispatch(
        &mut self,
        owner: &mut dyn TargetOwner,
        job: &mut Job,
    ) -> Result<Dispatch> {
        loop {
            let Some(line) = job.take_current() else {
                return Ok(Dispatch::Finished(TargetOutcome::Succeeded));
            };
            if line.text.trim().is_empty() {
                job.advance(owner);
                continue;
            }

            let flags = line.flags;
            if self.options.question && !flags.recurse {
                return Ok(Dispatch::Finished(TargetOutcome::NeedsUpdate));
            }

            if self.options.just_print || !(flags.silent || self.options.silent) {
                println!("{}", line.text);
            }
            owner.command_started(&job.target);

            let Some(invocation) = build_invocation(&line.text, &self.options.shell) else {
                job.advance(owner);
                continue;
            };
            if self.options.just_print && !flags.recurse {
                job.advance(owner);
                continue;
            }

            job.flags = flags;
            job.deleted = false;
            return Ok(match self.spawn(owner, job, invocation)? {
                Some(key) => Dispatch::Running(key),
                None => Dispatch::Finished(TargetOutcome::Failed),
            });
        }
    }

    fn spawn(
        &mut self,
        owner: &mut dyn TargetOwner,
        job: &mut Job,
        invocation: Invocation,
    ) -> Result<Option<JobKey>> {
        let argv = match invocation {
            Invocation::Direct(argv) | Invocation::Interpreted { argv, script: None } => argv,
            Invocation::Interpreted {
                mut argv,
                script: Some(body),
            } => match write_scratch(&body) {
                Ok(path) => {
                    debug!(target_name = %job.target, path = %path.display(), "created scratch script");
                    argv.push(path.display().to_string());
                    job.scratch = Some(path);
                    argv
                }
                Err(err) => {
                    eprintln!("parmake: cannot create scratch script: {err}");
                    return self.launch_failed(owner, job);
                }
            },
        };

        let request = self.launcher.prepare(&job.target, argv, job.flags.recurse);
        job.good_stdin = request.good_stdin;

        if job.remote {
            match self.remote.start(&request) {
                Ok(started) => {
                    if job.good_stdin && !started.used_stdin {
                        self.launcher.release_stdin();
                        job.good_stdin = false;
                    }
                    debug!(target_name = %job.target, remote = started.id, "started remote job");
                    return Ok(Some(JobKey::Remote(started.id)));
                }
                Err(err) => {
                    let allowed = self
                        .options
                        .max_remote_fallbacks
                        .is_none_or(|max| self.remote_fallbacks < max);
                    if !allowed {
                        eprintln!("parmake: {}: remote start failed: {err}", program(&request.argv));
                        return self.launch_failed(owner, job);
                    }
                    self.remote_fallbacks += 1;
                    warn!(target_name = %job.target, error = %err, "remote start failed; running locally");
                }
            }
        }

        job.remote = false;
        let started = {
            let _guard = SignalGuard::block();
            self.spawner.start(&request)
        };
        match started {
            Ok(pid) => Ok(Some(JobKey::Local(pid))),
            Err(err) => {
                eprintln!("parmake: {}: {err}", program(&request.argv));
                self.launch_failed(owner, job)
            }
        }
    }

    fn launch_failed(
        &mut self,
        owner: &mut dyn TargetOwner,
        job: &mut Job,
    ) -> Result<Option<JobKey>> {
        debug!(target_name = %job.target, "launch failed");
        if job.good_stdin {
            self.launcher.release_stdin();
            job.good_stdin = false;
        }
        job.remove_scratch();
        self.delete_outputs(owner, job);
        Ok(None)
    }

    pub(crate) fn delete_outputs(&mut self, owner: &mut dyn TargetOwner, job: &mut Job) {
        if !job.deleted {
            owner.delete_partial_outputs(&job.target);
            job.deleted = true;
        }
    }

    /// Run the shutdown cascade if a fatal signal arrived.
    ///
    /// Kills every live job, deletes their partial outputs, fails the
    /// waiting list, waits for the killed jobs and removes intermediates,
    /// then returns `Interrupted`. Only the first caller runs it.
    pub fn check_fatal(&mut self, owner: &mut dyn TargetOwner) -> Result<()> {
        let Some(sig) = signals::claim_fatal() else {
            return Ok(());
        };
        self.shutting_down = true;
        warn!(signal = sig.as_str(), live = self.table.len(), "fatal signal; terminating jobs");

        for key in self.table.keys() {
            let killed = match key {
                JobKey::Local(pid) => self.spawner.kill(pid, sig),
                JobKey::Remote(id) => self.remote.kill(id, sig),
            };
            if let Err(err) = killed {
                debug!(%key, error = %err, "kill failed");
            }
        }
        for job in self.table.jobs_mut() {
            if !job.deleted {
                owner.delete_partial_outputs(&job.target);
                job.deleted = true;
            }
        }

        self.drop_waiting(owner)?;
        while !self.table.is_empty() {
            if !self.reap(owner, true)? {
                break;
            }
        }
        owner.remove_intermediates();

        Err(ParmakeError::Interrupted(sig))
    }
}

fn write_scratch(body: &str) -> io::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("parmake")
        .suffix(".sh")
        .tempfile()?;
    writeln!(file, "{body}")?;
    let (_file, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

fn program(argv: &[String]) -> &str {
    argv.first().map(String::as_str).unwrap_or("")
}
