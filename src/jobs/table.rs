// src/jobs/table.rs

use std::collections::HashMap;

use tracing::debug;

use crate::jobs::job::Job;
use crate::jobs::process::JobKey;
use crate::jobs::signals::SignalGuard;

/// Jobs with a live process, keyed by process handle.
///
/// Mutations run with child-exit and fatal signals blocked so the table and
/// the local-job counter never disagree.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobKey, Job>,
    running_local: usize,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: JobKey, job: Job) {
        let _guard = SignalGuard::block();
        debug!(target_name = %job.target, %key, remote = !key.is_local(), "putting child on the chain");
        if key.is_local() {
            self.running_local += 1;
        }
        self.jobs.insert(key, job);
    }

    pub fn remove(&mut self, key: &JobKey) -> Option<Job> {
        let _guard = SignalGuard::block();
        let job = self.jobs.remove(key)?;
        if key.is_local() {
            self.running_local = self.running_local.saturating_sub(1);
        }
        debug!(target_name = %job.target, %key, "removing child from chain");
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn running_local(&self) -> usize {
        self.running_local
    }

    pub fn has_remote(&self) -> bool {
        self.jobs.keys().any(|k| !k.is_local())
    }

    pub fn keys(&self) -> Vec<JobKey> {
        self.jobs.keys().copied().collect()
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }
}
