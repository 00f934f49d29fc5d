#![allow(dead_code)]

//! A deterministic stand-in for real child processes.
//!
//! Time is a logical clock. Every started command finishes `ticks` after it
//! starts; a blocking wait jumps the clock to the earliest finish. Ties go to
//! whichever command started first, so runs are reproducible.

use std::io;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use parmake::errors::Result;
use parmake::jobs::{signals, ExitKind, LaunchRequest, ProcessSpawner};

/// How a fake command behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behaviour {
    pub exit: ExitKind,
    pub ticks: u64,
    /// Fatal signal that "arrives" as this command is reaped.
    pub raises: Option<Signal>,
}

impl Behaviour {
    pub fn succeed(ticks: u64) -> Self {
        Self {
            exit: ExitKind::Code(0),
            ticks,
            raises: None,
        }
    }

    pub fn fail(code: i32, ticks: u64) -> Self {
        Self {
            exit: ExitKind::Code(code),
            ticks,
            raises: None,
        }
    }

    pub fn signal(signal: Signal, ticks: u64) -> Self {
        Self {
            exit: ExitKind::Signal {
                signal: signal as i32,
                core_dumped: false,
            },
            ticks,
            raises: None,
        }
    }

    /// Record `signal` as a pending fatal signal when this command is reaped.
    pub fn raising(mut self, signal: Signal) -> Self {
        self.raises = Some(signal);
        self
    }
}

/// A started command, as the scheduler asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecord {
    pub pid: Pid,
    pub at: u64,
    pub request: LaunchRequest,
}

impl StartRecord {
    pub fn command(&self) -> String {
        self.request.argv.join(" ")
    }

    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.request
            .env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub pid: Pid,
    pub at: u64,
    pub command: String,
    pub exit: ExitKind,
}

#[derive(Debug, Clone)]
struct Running {
    pid: Pid,
    seq: usize,
    finish_at: u64,
    exit: ExitKind,
    raises: Option<Signal>,
    command: String,
}

#[derive(Debug, Clone)]
pub struct FakeProcesses {
    clock: u64,
    next_pid: i32,
    default: Behaviour,
    rules: Vec<(String, Behaviour)>,
    unlaunchable: Vec<String>,
    running: Vec<Running>,
    starts: Vec<StartRecord>,
    completions: Vec<CompletionRecord>,
    killed: Vec<(Pid, Signal)>,
    max_concurrent: usize,
}

impl Default for FakeProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProcesses {
    /// Every command succeeds after one tick.
    pub fn new() -> Self {
        Self {
            clock: 0,
            next_pid: 1000,
            default: Behaviour::succeed(1),
            rules: Vec::new(),
            unlaunchable: Vec::new(),
            running: Vec::new(),
            starts: Vec::new(),
            completions: Vec::new(),
            killed: Vec::new(),
            max_concurrent: 0,
        }
    }

    pub fn with_default(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    /// Commands whose text contains `pattern` behave as given. The first
    /// matching rule wins.
    pub fn with_rule(mut self, pattern: &str, behaviour: Behaviour) -> Self {
        self.rules.push((pattern.to_string(), behaviour));
        self
    }

    /// Commands whose text contains `pattern` cannot be started.
    pub fn with_unlaunchable(mut self, pattern: &str) -> Self {
        self.unlaunchable.push(pattern.to_string());
        self
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn starts(&self) -> &[StartRecord] {
        &self.starts
    }

    pub fn started_commands(&self) -> Vec<String> {
        self.starts.iter().map(StartRecord::command).collect()
    }

    pub fn completions(&self) -> &[CompletionRecord] {
        &self.completions
    }

    pub fn completed_commands(&self) -> Vec<String> {
        self.completions.iter().map(|c| c.command.clone()).collect()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn killed(&self) -> &[(Pid, Signal)] {
        &self.killed
    }

    fn behaviour_for(&self, command: &str) -> Behaviour {
        self.rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, b)| *b)
            .unwrap_or(self.default)
    }

    fn next_finished(&self) -> Option<usize> {
        self.running
            .iter()
            .enumerate()
            .filter(|(_, r)| r.finish_at <= self.clock)
            .min_by_key(|(_, r)| (r.finish_at, r.seq))
            .map(|(i, _)| i)
    }
}

impl ProcessSpawner for FakeProcesses {
    fn start(&mut self, request: &LaunchRequest) -> io::Result<Pid> {
        let command = request.argv.join(" ");
        if self.unlaunchable.iter().any(|p| command.contains(p.as_str())) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        let behaviour = self.behaviour_for(&command);
        let pid = Pid::from_raw(self.next_pid);
        self.next_pid += 1;

        self.running.push(Running {
            pid,
            seq: self.starts.len(),
            finish_at: self.clock + behaviour.ticks,
            exit: behaviour.exit,
            raises: behaviour.raises,
            command,
        });
        self.starts.push(StartRecord {
            pid,
            at: self.clock,
            request: request.clone(),
        });
        self.max_concurrent = self.max_concurrent.max(self.running.len());
        Ok(pid)
    }

    fn wait(&mut self, block: bool) -> Result<Option<(Pid, ExitKind)>> {
        if self.next_finished().is_none() && block {
            if let Some(earliest) = self.running.iter().map(|r| r.finish_at).min() {
                self.clock = self.clock.max(earliest);
            }
        }

        let Some(index) = self.next_finished() else {
            return Ok(None);
        };
        let done = self.running.remove(index);
        self.completions.push(CompletionRecord {
            pid: done.pid,
            at: self.clock,
            command: done.command,
            exit: done.exit,
        });
        if let Some(sig) = done.raises {
            signals::record_fatal(sig);
        }
        Ok(Some((done.pid, done.exit)))
    }

    fn kill(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        self.killed.push((pid, signal));
        if let Some(running) = self.running.iter_mut().find(|r| r.pid == pid) {
            running.finish_at = self.clock;
            running.exit = ExitKind::Signal {
                signal: signal as i32,
                core_dumped: false,
            };
        }
        Ok(())
    }
}
