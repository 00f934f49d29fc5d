// src/jobs/reaper.rs

//! Collecting finished processes and moving their recipes along.

use std::io::{self, Write};

use nix::sys::signal::Signal;
use tracing::{debug, trace};

use crate::errors::Result;
use crate::jobs::owner::{TargetOutcome, TargetOwner};
use crate::jobs::process::{Completion, ExitKind, JobKey, ProcessSpawner};
use crate::jobs::remote::RemoteExecutor;
use crate::jobs::scheduler::{Dispatch, Scheduler};
use crate::jobs::signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaped {
    /// The target is done (either way).
    TargetDone,
    /// The next line of the same recipe was launched.
    NextLine,
    /// Not one of ours.
    Unknown,
}

impl<S: ProcessSpawner, R: RemoteExecutor> Scheduler<S, R> {
    /// Collect finished jobs.
    ///
    /// With `block`, waits until at least one target completes, then keeps
    /// collecting whatever else has already finished. Returns whether
    /// anything was reaped.
    ///
    /// An unignored failure without keep-going makes the whole build abort:
    /// once the loop ends, every remaining job is drained.
    pub fn reap(&mut self, owner: &mut dyn TargetOwner, block: bool) -> Result<bool> {
        let mut block = block;
        let mut reaped_any = false;

        while !self.table.is_empty() {
            self.check_fatal(owner)?;

            let dead = signals::take_dead_children();
            if dead > 0 {
                trace!(dead, "got SIGCHLD");
            }

            let Some(completion) = self.wait_any(block)? else {
                if block && signals::pending_fatal().is_some() {
                    continue;
                }
                break;
            };
            reaped_any = true;

            if self.handle_completion(owner, completion)? == Reaped::TargetDone {
                // Only block for one target.
                block = false;
            }
        }

        if self.aborting && !self.draining {
            self.drain_all(owner)?;
        }
        Ok(reaped_any)
    }

    fn wait_any(&mut self, block: bool) -> Result<Option<Completion>> {
        let any_remote = self.table.has_remote();
        let any_local = self.table.running_local() > 0;

        if any_remote {
            if let Some((id, exit)) = self.remote.poll(false)? {
                return Ok(Some(Completion {
                    key: JobKey::Remote(id),
                    exit,
                }));
            }
        }

        if any_local {
            if let Some((pid, exit)) = self.spawner.wait(block && !any_remote)? {
                return Ok(Some(Completion {
                    key: JobKey::Local(pid),
                    exit,
                }));
            }
        }

        if any_remote && block {
            if let Some((id, exit)) = self.remote.poll(true)? {
                return Ok(Some(Completion {
                    key: JobKey::Remote(id),
                    exit,
                }));
            }
        }

        Ok(None)
    }

    fn handle_completion(
        &mut self,
        owner: &mut dyn TargetOwner,
        completion: Completion,
    ) -> Result<Reaped> {
        let Completion { key, exit } = completion;
        let Some(mut job) = self.table.remove(&key) else {
            // Inherited from whoever started us.
            debug!(%key, ?exit, "reaped unknown child");
            return Ok(Reaped::Unknown);
        };

        let failed = exit.failed();
        debug!(
            target_name = %job.target,
            %key,
            remote = !key.is_local(),
            ?exit,
            "reaping {} child",
            if failed { "losing" } else { "winning" }
        );

        job.remove_scratch();
        if job.good_stdin {
            self.launcher.release_stdin();
            job.good_stdin = false;
        }

        let ignored = job.flags.ignore_errors || self.options.ignore_errors;
        let outcome = if failed && !ignored {
            report(&failure_message(&job.target, exit, false));
            if exit.is_signal() || self.options.delete_on_error {
                self.delete_outputs(owner, &mut job);
            }
            TargetOutcome::Failed
        } else {
            if failed && !self.options.silent {
                report(&failure_message(&job.target, exit, true));
            }

            if !job.advance(owner) {
                TargetOutcome::Succeeded
            } else if self.shutting_down {
                // Never start new lines while dying; the target is incomplete.
                self.delete_outputs(owner, &mut job);
                TargetOutcome::Failed
            } else {
                job.remote = self.remote.accepts(false);
                match self.dispatch(owner, &mut job)? {
                    Dispatch::Running(next) => {
                        self.table.insert(next, job);
                        return Ok(Reaped::NextLine);
                    }
                    Dispatch::Finished(outcome) => outcome,
                }
            }
        };

        owner.finalize(&job.target, outcome);
        self.release_slot()?;

        if failed && !ignored && !self.options.keep_going && !self.shutting_down {
            debug!(target_name = %job.target, "aborting build after failure");
            self.aborting = true;
        }

        Ok(Reaped::TargetDone)
    }
}

fn report(message: &str) {
    let _ = io::stdout().flush();
    eprintln!("parmake: {message}");
}

/// Text reported for a failed command line.
pub fn failure_message(target: &str, exit: ExitKind, ignored: bool) -> String {
    match exit {
        ExitKind::Code(code) if ignored => format!("[{target}] Error {code} (ignored)"),
        ExitKind::Code(code) => format!("*** [{target}] Error {code}"),
        ExitKind::Signal {
            signal,
            core_dumped,
        } => format!(
            "*** [{target}] {}{}{}",
            signal_description(signal),
            if core_dumped { " (core dumped)" } else { "" },
            if ignored { " (ignored)" } else { "" },
        ),
    }
}

/// Human-readable signal name, as `strsignal(3)` would print it.
pub fn signal_description(signo: i32) -> String {
    let Ok(sig) = Signal::try_from(signo) else {
        return format!("Signal {signo}");
    };
    let text = match sig {
        Signal::SIGHUP => "Hangup",
        Signal::SIGINT => "Interrupt",
        Signal::SIGQUIT => "Quit",
        Signal::SIGILL => "Illegal instruction",
        Signal::SIGTRAP => "Trace/breakpoint trap",
        Signal::SIGABRT => "Aborted",
        Signal::SIGBUS => "Bus error",
        Signal::SIGFPE => "Floating point exception",
        Signal::SIGKILL => "Killed",
        Signal::SIGSEGV => "Segmentation fault",
        Signal::SIGPIPE => "Broken pipe",
        Signal::SIGALRM => "Alarm clock",
        Signal::SIGTERM => "Terminated",
        other => other.as_str(),
    };
    text.to_string()
}
