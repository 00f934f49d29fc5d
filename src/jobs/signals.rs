// src/jobs/signals.rs

//! Signal plumbing shared between the handlers and the scheduler.
//!
//! Handlers only touch atomics: they bump the dead-child counter, record the
//! first fatal signal and close the jobserver's duplicate read descriptor so
//! a blocking token read wakes up. Everything else happens synchronously in
//! the reaper.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicUsize, Ordering};

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use tracing::debug;

use crate::errors::{ParmakeError, Result};

/// Signals that start the shutdown cascade.
pub const FATAL_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGHUP, Signal::SIGTERM];

static DEAD_CHILDREN: AtomicUsize = AtomicUsize::new(0);
static FATAL_SIGNAL: AtomicI32 = AtomicI32::new(0);
static FATAL_CLAIMED: AtomicBool = AtomicBool::new(false);
static TOKEN_READER: AtomicPtr<AtomicI32> = AtomicPtr::new(ptr::null_mut());

extern "C" fn on_child_exit(_: libc::c_int) {
    DEAD_CHILDREN.fetch_add(1, Ordering::SeqCst);
    close_token_reader();
}

extern "C" fn on_fatal_signal(signo: libc::c_int) {
    let _ = FATAL_SIGNAL.compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    close_token_reader();
}

fn close_token_reader() {
    let slot = TOKEN_READER.load(Ordering::SeqCst);
    if slot.is_null() {
        return;
    }
    // SAFETY: the pointer comes from `Arc::into_raw` in `register_token_reader`
    // and stays valid until `unregister_token_reader` reclaims it.
    let fd = unsafe { &*slot }.swap(-1, Ordering::SeqCst);
    if fd >= 0 {
        // SAFETY: the descriptor is owned by the slot and was just taken out of it.
        unsafe {
            libc::close(fd);
        }
    }
}

/// Install the child-exit and fatal-signal handlers.
///
/// Handlers are installed without `SA_RESTART` so blocking reads and waits
/// return `EINTR`. A fatal signal that was ignored when we started stays
/// ignored.
pub fn install() -> Result<()> {
    let child = SigAction::new(
        SigHandler::Handler(on_child_exit),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs async-signal-safe operations.
    unsafe { signal::sigaction(Signal::SIGCHLD, &child) }.map_err(ParmakeError::Signal)?;

    let fatal = SigAction::new(
        SigHandler::Handler(on_fatal_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in FATAL_SIGNALS {
        // SAFETY: as above.
        let previous = unsafe { signal::sigaction(sig, &fatal) }.map_err(ParmakeError::Signal)?;
        if previous.handler() == SigHandler::SigIgn {
            // SAFETY: restoring the disposition we inherited.
            unsafe { signal::sigaction(sig, &previous) }.map_err(ParmakeError::Signal)?;
            debug!(signal = sig.as_str(), "leaving inherited SIG_IGN in place");
        }
    }

    Ok(())
}

/// Let the handlers close the jobserver's duplicate read descriptor.
pub fn register_token_reader(slot: Arc<AtomicI32>) {
    let raw = Arc::into_raw(slot) as *mut AtomicI32;
    let old = TOKEN_READER.swap(raw, Ordering::SeqCst);
    if !old.is_null() {
        // SAFETY: `old` was produced by `Arc::into_raw` in an earlier call.
        drop(unsafe { Arc::from_raw(old) });
    }
}

pub fn unregister_token_reader() {
    let _guard = SignalGuard::block();
    let old = TOKEN_READER.swap(ptr::null_mut(), Ordering::SeqCst);
    if !old.is_null() {
        // SAFETY: `old` was produced by `Arc::into_raw` in `register_token_reader`.
        drop(unsafe { Arc::from_raw(old) });
    }
}

/// Number of child exits noticed since the last call.
pub fn take_dead_children() -> usize {
    DEAD_CHILDREN.swap(0, Ordering::SeqCst)
}

/// A fatal signal that arrived and has not started the shutdown cascade yet.
pub fn pending_fatal() -> Option<Signal> {
    if FATAL_CLAIMED.load(Ordering::SeqCst) {
        return None;
    }
    fatal_signal()
}

/// Take ownership of a pending fatal signal. Only the first caller gets it.
pub fn claim_fatal() -> Option<Signal> {
    let sig = fatal_signal()?;
    if FATAL_CLAIMED.swap(true, Ordering::SeqCst) {
        return None;
    }
    Some(sig)
}

fn fatal_signal() -> Option<Signal> {
    match FATAL_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signo => Signal::try_from(signo).ok(),
    }
}

/// Record a fatal signal as if its handler had run.
pub fn record_fatal(sig: Signal) {
    on_fatal_signal(sig as libc::c_int);
}

/// Forget any recorded fatal signal.
pub fn clear_fatal() {
    FATAL_SIGNAL.store(0, Ordering::SeqCst);
    FATAL_CLAIMED.store(false, Ordering::SeqCst);
}

/// Critical section with child-exit and fatal signals blocked.
///
/// The previous mask is restored on drop.
pub struct SignalGuard {
    previous: SigSet,
}

impl SignalGuard {
    pub fn block() -> Self {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        for sig in FATAL_SIGNALS {
            set.add(sig);
        }
        let mut previous = SigSet::empty();
        // Only fails for an invalid `how`.
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous));
        Self { previous }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// Re-deliver `sig` to ourselves with the default disposition so the
/// process ends with the conventional status for that signal.
pub fn redeliver(sig: Signal) -> ! {
    // SAFETY: resetting to the default disposition.
    let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    let mut set = SigSet::empty();
    set.add(sig);
    let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
    let _ = signal::raise(sig);
    std::process::exit(128 + sig as i32)
}
