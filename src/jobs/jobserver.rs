// src/jobs/jobserver.rs

//! Cross-process token pool over a pipe.
//!
//! The pipe starts with `budget - 1` bytes of `+`. Acquiring a slot reads
//! one byte, releasing writes one back. Recursive invocations find the two
//! descriptors in `PARMAKE_JOBSERVER=<read>,<write>` and join the same pool.
//!
//! Blocking reads go through a duplicate of the read end. The child-exit
//! handler closes that duplicate, so a read that would otherwise sleep past
//! a completion fails with `EBADF` (or `EINTR`) and the caller reaps first.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::libc;
use nix::unistd;
use tracing::debug;

use crate::errors::{ParmakeError, Result};

/// Environment variable carrying the pool's descriptors.
pub const JOBSERVER_ENV: &str = "PARMAKE_JOBSERVER";

/// Byte value of one token.
pub const TOKEN: u8 = b'+';

/// Result of one attempt to read a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRead {
    Acquired,
    /// A completion (or fatal signal) interrupted the read.
    Interrupted,
}

#[derive(Debug)]
pub struct Jobserver {
    read: OwnedFd,
    write: OwnedFd,
    reader: Arc<AtomicI32>,
}

impl Jobserver {
    /// Create a fresh pool pre-loaded with `units` tokens.
    pub fn create(units: usize) -> Result<Self> {
        let (read, write) = unistd::pipe()
            .map_err(|e| ParmakeError::Jobserver(format!("creating jobs pipe: {e}")))?;
        set_cloexec(read.as_raw_fd(), true)?;
        set_cloexec(write.as_raw_fd(), true)?;

        let server = Self {
            read,
            write,
            reader: Arc::new(AtomicI32::new(-1)),
        };

        let fill = vec![TOKEN; units];
        let mut written = 0;
        while written < fill.len() {
            match unistd::write(&server.write, &fill[written..]) {
                Ok(n) => written += n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ParmakeError::Jobserver(format!(
                        "init jobserver pipe: {e}"
                    )));
                }
            }
        }

        debug!(units, fds = %server.env_value(), "created jobserver");
        Ok(server)
    }

    /// Join a pool whose descriptors were inherited from a parent.
    ///
    /// # Safety
    ///
    /// `read` and `write` must be open descriptors not owned by anything else
    /// in this process.
    pub unsafe fn from_raw_fds(read: RawFd, write: RawFd) -> Result<Self> {
        for fd in [read, write] {
            if fcntl(fd, FcntlArg::F_GETFD).is_err() {
                return Err(ParmakeError::Jobserver(format!(
                    "inherited descriptor {fd} is not open"
                )));
            }
        }
        set_cloexec(read, true)?;
        set_cloexec(write, true)?;

        // SAFETY: the caller guarantees exclusive ownership of both descriptors.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) };
        Ok(Self {
            read,
            write,
            reader: Arc::new(AtomicI32::new(-1)),
        })
    }

    /// Parse `<read>,<write>` as found in [`JOBSERVER_ENV`].
    pub fn parse_env_value(value: &str) -> Option<(RawFd, RawFd)> {
        let (r, w) = value.trim().split_once(',')?;
        let r = r.trim().parse::<RawFd>().ok()?;
        let w = w.trim().parse::<RawFd>().ok()?;
        (r >= 0 && w >= 0).then_some((r, w))
    }

    pub fn fds(&self) -> (RawFd, RawFd) {
        (self.read.as_raw_fd(), self.write.as_raw_fd())
    }

    pub fn env_value(&self) -> String {
        let (r, w) = self.fds();
        format!("{r},{w}")
    }

    /// The slot holding the duplicate read descriptor, for the signal
    /// handlers.
    pub fn reader_slot(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.reader)
    }

    /// Make sure the duplicate read descriptor exists.
    pub fn refresh_reader(&self) -> Result<()> {
        if self.reader.load(Ordering::SeqCst) >= 0 {
            return Ok(());
        }
        let dup = fcntl(self.read.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(0))
            .map_err(|e| ParmakeError::Jobserver(format!("duping jobs pipe: {e}")))?;
        if self
            .reader
            .compare_exchange(-1, dup, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // SAFETY: `dup` was created above and never published.
            unsafe {
                libc::close(dup);
            }
        }
        Ok(())
    }

    /// Block until a token is read or a completion interrupts the read.
    pub fn take(&self) -> Result<TokenRead> {
        let fd = self.reader.load(Ordering::SeqCst);
        if fd < 0 {
            return Ok(TokenRead::Interrupted);
        }

        let mut byte = [0u8; 1];
        match unistd::read(fd, &mut byte) {
            Ok(1) => Ok(TokenRead::Acquired),
            Ok(_) => Err(ParmakeError::Jobserver(
                "jobs pipe closed unexpectedly".to_string(),
            )),
            Err(Errno::EINTR) | Err(Errno::EBADF) => Ok(TokenRead::Interrupted),
            Err(e) => Err(ParmakeError::Jobserver(format!("read jobs pipe: {e}"))),
        }
    }

    /// Write one token back.
    pub fn release(&self) -> Result<()> {
        loop {
            match unistd::write(&self.write, &[TOKEN]) {
                Ok(1) => return Ok(()),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ParmakeError::Jobserver(format!("write jobserver: {e}"))),
            }
        }
    }

    /// Tokens currently sitting in the pipe.
    pub fn available_units(&self) -> Result<usize> {
        let mut n: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int through the pointer.
        let rc = unsafe { libc::ioctl(self.read.as_raw_fd(), libc::FIONREAD, &mut n as *mut libc::c_int) };
        Errno::result(rc).map_err(|e| ParmakeError::Jobserver(format!("FIONREAD: {e}")))?;
        Ok(n.max(0) as usize)
    }
}

impl Drop for Jobserver {
    fn drop(&mut self) {
        let fd = self.reader.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            // SAFETY: the duplicate is owned by this jobserver.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Set or clear `FD_CLOEXEC`.
pub fn set_cloexec(fd: RawFd, on: bool) -> Result<()> {
    let flags = if on { FdFlag::FD_CLOEXEC } else { FdFlag::empty() };
    fcntl(fd, FcntlArg::F_SETFD(flags))
        .map(|_| ())
        .map_err(|e| ParmakeError::Jobserver(format!("fcntl({fd}): {e}")))
}
