//! Readiness descriptors
//!
//! The buffer service signals a channel's event fd whenever the buffer moves
//! into a state that client can act on. Clients wait on it with [`poll_fd`].

use crate::Result;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd as NixEventFd};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

/// Outcome of waiting on a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Wait until `fd` is readable.
///
/// `None` waits forever; `Some(Duration::ZERO)` checks without blocking.
pub fn poll_fd(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> Result<Readiness> {
    let timeout = match timeout {
        None => PollTimeout::NONE,
        Some(d) => PollTimeout::try_from(d).unwrap_or(PollTimeout::MAX),
    };

    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(Readiness::TimedOut),
            Ok(_) => return Ok(Readiness::Ready),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Non-blocking eventfd used as a level-style readiness flag
pub struct EventFd {
    inner: NixEventFd,
}

impl EventFd {
    pub fn new() -> Result<Self> {
        let inner = NixEventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        Ok(Self { inner })
    }

    /// Make the descriptor readable
    pub fn signal(&self) -> Result<()> {
        self.inner.write(1)?;
        Ok(())
    }

    /// Reset the descriptor to unreadable
    pub fn clear(&self) -> Result<()> {
        match self.inner.read() {
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn poll(&self, timeout: Option<Duration>) -> Result<Readiness> {
        poll_fd(self.inner.as_fd(), timeout)
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}
