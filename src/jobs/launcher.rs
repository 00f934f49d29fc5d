// src/jobs/launcher.rs

//! Per-launch environment and standard input decisions.

use std::os::fd::RawFd;

use crate::jobs::jobserver::JOBSERVER_ENV;
use crate::jobs::process::LaunchRequest;

/// Environment variable holding the recursion depth.
pub const LEVEL_ENV: &str = "PARMAKE_LEVEL";

/// Recursion depth of this invocation, from [`LEVEL_ENV`].
pub fn current_level() -> u32 {
    std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct Launcher {
    level: u32,
    jobserver: Option<(RawFd, RawFd)>,
    good_stdin_used: bool,
}

impl Launcher {
    pub fn new(level: u32, jobserver: Option<(RawFd, RawFd)>) -> Self {
        Self {
            level,
            jobserver,
            good_stdin_used: false,
        }
    }

    /// Build the request for one line. The first caller while nobody holds
    /// it gets our real standard input.
    pub fn prepare(&mut self, target: &str, argv: Vec<String>, recurse: bool) -> LaunchRequest {
        let good_stdin = !self.good_stdin_used;
        self.good_stdin_used = true;

        let mut env = vec![(LEVEL_ENV.to_string(), (self.level + 1).to_string())];
        let mut env_remove = Vec::new();
        let mut inherit_fds = Vec::new();

        match self.jobserver {
            Some((r, w)) if recurse => {
                env.push((JOBSERVER_ENV.to_string(), format!("{r},{w}")));
                inherit_fds.extend([r, w]);
            }
            _ => env_remove.push(JOBSERVER_ENV.to_string()),
        }

        LaunchRequest {
            target: target.to_string(),
            argv,
            env,
            env_remove,
            good_stdin,
            inherit_fds,
        }
    }

    /// The job holding our standard input is done with it.
    pub fn release_stdin(&mut self) {
        self.good_stdin_used = false;
    }
}
