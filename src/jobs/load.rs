// src/jobs/load.rs

//! Load-average admission for additional local jobs.

use std::io;

use nix::libc;
use tracing::warn;

/// Source of the one-minute load average.
pub trait LoadSource {
    fn one_minute(&mut self) -> io::Result<f64>;
}

/// Reads the system load average with `getloadavg(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLoad;

impl LoadSource for SystemLoad {
    fn one_minute(&mut self) -> io::Result<f64> {
        let mut loads = [0f64; 1];
        // SAFETY: `loads` has room for the one sample requested.
        let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 1) };
        if n < 1 {
            return Err(io::Error::other("getloadavg returned no samples"));
        }
        Ok(loads[0])
    }
}

/// A fixed load, handy when the real one is irrelevant.
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub f64);

impl LoadSource for FixedLoad {
    fn one_minute(&mut self) -> io::Result<f64> {
        Ok(self.0)
    }
}

pub struct LoadGovernor {
    max_load: Option<f64>,
    source: Box<dyn LoadSource>,
    last_error: Option<String>,
}

impl std::fmt::Debug for LoadGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadGovernor")
            .field("max_load", &self.max_load)
            .finish_non_exhaustive()
    }
}

impl LoadGovernor {
    pub fn new(max_load: Option<f64>, source: Box<dyn LoadSource>) -> Self {
        Self {
            max_load,
            source,
            last_error: None,
        }
    }

    pub fn system(max_load: Option<f64>) -> Self {
        Self::new(max_load, Box::new(SystemLoad))
    }

    pub fn unlimited() -> Self {
        Self::new(None, Box::new(FixedLoad(0.0)))
    }

    /// Whether another local job may start while `running_local` run.
    pub fn admits(&mut self, running_local: usize) -> bool {
        let Some(max) = self.max_load else {
            return true;
        };
        if running_local == 0 {
            return true;
        }

        let load = match self.source.one_minute() {
            Ok(load) => load,
            Err(err) => {
                let msg = err.to_string();
                if self.last_error.as_deref() != Some(msg.as_str()) {
                    warn!(error = %msg, "cannot enforce load limits");
                    self.last_error = Some(msg);
                }
                0.0
            }
        };

        load < max
    }
}
