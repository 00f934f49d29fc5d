// src/jobs/token_pool.rs

//! Job slot accounting.
//!
//! Every invocation owns one implicit slot that is never represented by a
//! token. Further concurrent jobs need a token from the pool, and slots are
//! returned by count: a job that stops holding a slot returns a token only if
//! other holders remain.

use tracing::debug;

use crate::errors::Result;
use crate::jobs::jobserver::{Jobserver, TokenRead};

/// How a job obtained its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrant {
    /// The invocation's implicit slot; no other job held one.
    Free,
    /// A unit taken from the pool.
    Token,
}

/// Outcome of one attempt to take a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Take {
    Granted,
    /// The in-process pool is empty; wait for a job to finish.
    Exhausted,
    /// The blocking read was cut short by a completion.
    Interrupted,
}

/// Counts of tokens handed out and given back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStats {
    pub issued: u64,
    pub returned: u64,
}

/// In-process pool used when the jobserver is disabled.
#[derive(Debug, Clone)]
pub struct LocalSlots {
    free: usize,
    capacity: usize,
}

impl LocalSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: capacity,
            capacity,
        }
    }

    pub fn free(&self) -> usize {
        self.free
    }
}

#[derive(Debug)]
pub enum TokenPool {
    /// Budget of one: every job runs to completion before the next starts.
    Serial,
    /// No limit.
    Unlimited,
    Local(LocalSlots),
    Shared(Jobserver),
}

/// Pool shape plus traffic counters.
#[derive(Debug)]
pub struct Slots {
    pool: TokenPool,
    stats: TokenStats,
}

impl TokenPool {
    /// Pool for a budget of `jobs` (`0` is unlimited).
    pub fn for_budget(jobs: usize, use_jobserver: bool) -> Result<Self> {
        Ok(match jobs {
            0 => TokenPool::Unlimited,
            1 => TokenPool::Serial,
            n if use_jobserver => TokenPool::Shared(Jobserver::create(n - 1)?),
            n => TokenPool::Local(LocalSlots::new(n - 1)),
        })
    }
}

impl Slots {
    pub fn new(pool: TokenPool) -> Self {
        Self {
            pool,
            stats: TokenStats::default(),
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.pool, TokenPool::Serial)
    }

    /// Whether starting a job beyond the first needs a token at all.
    pub fn needs_tokens(&self) -> bool {
        matches!(self.pool, TokenPool::Local(_) | TokenPool::Shared(_))
    }

    pub fn jobserver(&self) -> Option<&Jobserver> {
        match &self.pool {
            TokenPool::Shared(js) => Some(js),
            _ => None,
        }
    }

    pub fn stats(&self) -> TokenStats {
        self.stats
    }

    /// Re-create the duplicate read handle before a possibly blocking take.
    pub fn prepare_take(&self) -> Result<()> {
        match &self.pool {
            TokenPool::Shared(js) => js.refresh_reader(),
            _ => Ok(()),
        }
    }

    /// Try to take one token. May block for a shared pool.
    pub fn take(&mut self) -> Result<Take> {
        let take = match &mut self.pool {
            TokenPool::Serial | TokenPool::Unlimited => Take::Granted,
            TokenPool::Local(slots) => {
                if slots.free == 0 {
                    Take::Exhausted
                } else {
                    slots.free -= 1;
                    Take::Granted
                }
            }
            TokenPool::Shared(js) => match js.take()? {
                TokenRead::Acquired => Take::Granted,
                TokenRead::Interrupted => Take::Interrupted,
            },
        };

        if take == Take::Granted && self.needs_tokens() {
            self.stats.issued += 1;
            debug!(issued = self.stats.issued, "obtained job token");
        }
        Ok(take)
    }

    /// Give one token back.
    pub fn release(&mut self) -> Result<()> {
        match &mut self.pool {
            TokenPool::Serial | TokenPool::Unlimited => return Ok(()),
            TokenPool::Local(slots) => {
                debug_assert!(
                    slots.free < slots.capacity,
                    "released more tokens than were taken"
                );
                slots.free += 1;
            }
            TokenPool::Shared(js) => js.release()?,
        }
        self.stats.returned += 1;
        debug!(returned = self.stats.returned, "released job token");
        Ok(())
    }
}
