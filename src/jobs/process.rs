// src/jobs/process.rs

//! Starting and waiting for local child processes.
//!
//! The scheduler talks to a [`ProcessSpawner`] instead of the OS directly so
//! tests can drive it with a deterministic fake.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, Pid};
use tracing::debug;

use crate::errors::{ParmakeError, Result};
use crate::jobs::jobserver::set_cloexec;
use crate::jobs::signals;

/// Identity of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    Local(Pid),
    Remote(u64),
}

impl JobKey {
    pub fn is_local(&self) -> bool {
        matches!(self, JobKey::Local(_))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Local(pid) => write!(f, "{pid}"),
            JobKey::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal { signal: i32, core_dumped: bool },
}

impl ExitKind {
    pub fn failed(&self) -> bool {
        !matches!(self, ExitKind::Code(0))
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, ExitKind::Signal { .. })
    }
}

/// A finished job as reported by the reaper's wait step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub key: JobKey,
    pub exit: ExitKind,
}

/// Everything needed to launch one command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub target: String,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
    /// Inherit our standard input; otherwise read from a pipe with no writer.
    pub good_stdin: bool,
    /// Descriptors that must survive `exec` in the child.
    pub inherit_fds: Vec<RawFd>,
}

pub trait ProcessSpawner {
    /// Launch `request`. An error means no process exists.
    fn start(&mut self, request: &LaunchRequest) -> io::Result<Pid>;

    /// Collect one finished child, waiting if `block` is set.
    ///
    /// Returns `None` when nothing has finished (non-blocking), when there are
    /// no children left, or when a fatal signal interrupted a blocking wait.
    fn wait(&mut self, block: bool) -> Result<Option<(Pid, ExitKind)>>;

    fn kill(&mut self, pid: Pid, signal: Signal) -> Result<()>;
}

/// Real child processes: `std::process::Command` to launch, `waitpid(-1)`
/// to reap.
#[derive(Debug, Default)]
pub struct UnixProcesses {
    bad_stdin: Option<OwnedFd>,
}

impl UnixProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    fn bad_stdin(&mut self) -> io::Result<OwnedFd> {
        if self.bad_stdin.is_none() {
            let (read, write) = unistd::pipe().map_err(io::Error::from)?;
            drop(write);
            set_cloexec(read.as_raw_fd(), true).map_err(io::Error::other)?;
            self.bad_stdin = Some(read);
        }
        match &self.bad_stdin {
            Some(fd) => fd.try_clone(),
            None => Err(io::Error::other("bad stdin unavailable")),
        }
    }
}

impl ProcessSpawner for UnixProcesses {
    fn start(&mut self, request: &LaunchRequest) -> io::Result<Pid> {
        let Some((program, args)) = request.argv.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        for key in &request.env_remove {
            cmd.env_remove(key);
        }
        cmd.envs(request.env.iter().cloned());

        if request.good_stdin {
            cmd.stdin(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::from(self.bad_stdin()?));
        }

        if !request.inherit_fds.is_empty() {
            let fds = request.inherit_fds.clone();
            // SAFETY: the closure only calls fcntl, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || {
                    for &fd in &fds {
                        nix::fcntl::fcntl(
                            fd,
                            nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::empty()),
                        )
                        .map_err(io::Error::from)?;
                    }
                    Ok(())
                });
            }
        }

        let child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!(target_name = %request.target, %pid, argv = ?request.argv, "spawned child");
        Ok(pid)
    }

    fn wait(&mut self, block: bool) -> Result<Option<(Pid, ExitKind)>> {
        let flags = if block {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };

        loop {
            match waitpid(Option::<Pid>::None, flags) {
                Ok(WaitStatus::Exited(pid, code)) => return Ok(Some((pid, ExitKind::Code(code)))),
                Ok(WaitStatus::Signaled(pid, sig, core_dumped)) => {
                    return Ok(Some((
                        pid,
                        ExitKind::Signal {
                            signal: sig as i32,
                            core_dumped,
                        },
                    )));
                }
                Ok(WaitStatus::StillAlive) => return Ok(None),
                Ok(_) => continue,
                Err(Errno::ECHILD) => return Ok(None),
                Err(Errno::EINTR) => {
                    if signals::pending_fatal().is_some() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(ParmakeError::Wait(e)),
            }
        }
    }

    fn kill(&mut self, pid: Pid, sig: Signal) -> Result<()> {
        signal::kill(pid, sig).map_err(ParmakeError::Signal)
    }
}
