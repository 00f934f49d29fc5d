// src/jobs/job.rs

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::jobs::owner::TargetOwner;
use crate::recipe::segment::{split_logical_lines, strip_modifiers};
use crate::recipe::{LineFlags, SegmentedRecipe};

/// An expanded command line ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLine {
    pub text: String,
    pub flags: LineFlags,
}

/// One target's recipe in flight.
///
/// The same `Job` carries every line of the recipe: when a line finishes
/// the reaper advances the cursor and launches the next one.
#[derive(Debug)]
pub struct Job {
    pub target: String,
    recipe: Arc<SegmentedRecipe>,
    target_flags: LineFlags,
    next_line: usize,
    /// Physical lines of the current expansion not yet run.
    pending: VecDeque<String>,
    line_flags: LineFlags,
    current: Option<PreparedLine>,

    /// Flags of the line currently running.
    pub flags: LineFlags,
    pub good_stdin: bool,
    pub remote: bool,
    /// Scratch script of the running line, removed when it is reaped.
    pub scratch: Option<PathBuf>,
    /// Outputs were already deleted.
    pub deleted: bool,
}

impl Job {
    pub fn new(target: &str, recipe: Arc<SegmentedRecipe>, target_flags: LineFlags) -> Self {
        Self {
            target: target.to_string(),
            recipe,
            target_flags,
            next_line: 0,
            pending: VecDeque::new(),
            line_flags: LineFlags::default(),
            current: None,
            flags: LineFlags::default(),
            good_stdin: false,
            remote: false,
            scratch: None,
            deleted: false,
        }
    }

    /// Load the next command line. Returns `false` once the recipe is done.
    ///
    /// Recipe lines are expanded only when reached, so a line sees the
    /// effects of the ones before it. An expansion spanning several physical
    /// lines runs them one after another under the same flags.
    pub fn advance(&mut self, owner: &mut dyn TargetOwner) -> bool {
        loop {
            if let Some(text) = self.pending.pop_front() {
                let (extra, body) = strip_modifiers(&text);
                self.current = Some(PreparedLine {
                    text: body.to_string(),
                    flags: self.line_flags.union(extra),
                });
                return true;
            }

            let Some(line) = self.recipe.lines.get(self.next_line) else {
                self.current = None;
                return false;
            };
            self.next_line += 1;

            let expanded = owner.expand_line(&self.target, &line.text);
            self.line_flags = line.flags.union(self.target_flags);
            self.pending = split_logical_lines(&expanded)
                .into_iter()
                .map(str::to_string)
                .collect();
        }
    }

    /// Take the loaded line for dispatch.
    pub fn take_current(&mut self) -> Option<PreparedLine> {
        self.current.take()
    }

    pub fn remove_scratch(&mut self) {
        if let Some(path) = self.scratch.take() {
            debug!(target_name = %self.target, path = %path.display(), "cleaning up scratch script");
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove scratch script");
            }
        }
    }
}
