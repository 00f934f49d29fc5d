// src/jobs/remote.rs

//! Hook for running jobs on another machine.
//!
//! The binary ships [`NoRemote`], which never accepts a job. An executor
//! that does accept jobs bypasses the load governor; if it fails to start a
//! line, that line is retried locally.

use std::io;

use nix::sys::signal::Signal;

use crate::errors::Result;
use crate::jobs::process::{ExitKind, LaunchRequest};

/// A job the remote side accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStart {
    pub id: u64,
    /// Whether the remote job took our standard input.
    pub used_stdin: bool,
}

pub trait RemoteExecutor {
    /// Whether the next job should go remote. `first_attempt` is false when
    /// asking again for a later line of a running recipe.
    fn accepts(&mut self, first_attempt: bool) -> bool;

    fn start(&mut self, request: &LaunchRequest) -> io::Result<RemoteStart>;

    /// Collect one finished remote job, waiting if `block` is set.
    fn poll(&mut self, block: bool) -> Result<Option<(u64, ExitKind)>>;

    fn kill(&mut self, id: u64, signal: Signal) -> Result<()>;
}

/// Everything runs locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl RemoteExecutor for NoRemote {
    fn accepts(&mut self, _first_attempt: bool) -> bool {
        false
    }

    fn start(&mut self, _request: &LaunchRequest) -> io::Result<RemoteStart> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "remote execution is not available",
        ))
    }

    fn poll(&mut self, _block: bool) -> Result<Option<(u64, ExitKind)>> {
        Ok(None)
    }

    fn kill(&mut self, _id: u64, _signal: Signal) -> Result<()> {
        Ok(())
    }
}
