//! Synchronization fences exchanged at ownership handoff
//!
//! A fence stands for asynchronous work (usually on a GPU or display
//! controller) that completes at some later point. It is readable once the
//! work is done. An empty fence means there is nothing to wait for.

use crate::event::{poll_fd, EventFd, Readiness};
use crate::Result;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

/// Move-only fence handle.
///
/// A fence may stand for several pieces of outstanding work; it is
/// signalled once all of them are.
#[derive(Debug, Default)]
pub struct Fence {
    fds: Vec<OwnedFd>,
}

impl Fence {
    /// A fence that is already signalled
    pub fn empty() -> Self {
        Self { fds: Vec::new() }
    }

    /// Create an unsignalled fence together with the handle that signals it
    pub fn pending() -> Result<(Fence, FenceSignal)> {
        let event = EventFd::new()?;
        let fd = event.as_fd().try_clone_to_owned()?;
        Ok((Fence::from(fd), FenceSignal { event }))
    }

    /// Combine fences into one that waits for all of them
    pub fn merge<I: IntoIterator<Item = Fence>>(fences: I) -> Fence {
        Fence {
            fds: fences.into_iter().flat_map(|f| f.fds).collect(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.fds.is_empty()
    }

    /// Number of underlying handles
    pub fn handle_count(&self) -> usize {
        self.fds.len()
    }

    /// First underlying handle
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.fds.first().map(|fd| fd.as_raw_fd())
    }

    /// Borrow the fence for a single call without giving it up
    pub fn borrow(&self) -> BorrowedFence<'_> {
        BorrowedFence { fds: &self.fds }
    }

    /// Take the fence out, leaving an empty one behind
    pub fn take(&mut self) -> Fence {
        Fence {
            fds: std::mem::take(&mut self.fds),
        }
    }

    /// Duplicate the underlying handles
    pub fn duplicate(&self) -> Result<Fence> {
        self.borrow().duplicate()
    }

    /// Wait for all the fenced work to complete
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Readiness> {
        // A deadline past what Instant can hold waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        for fd in &self.fds {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if poll_fd(fd.as_fd(), remaining)? == Readiness::TimedOut {
                return Ok(Readiness::TimedOut);
            }
        }
        Ok(Readiness::Ready)
    }
}

impl From<OwnedFd> for Fence {
    fn from(fd: OwnedFd) -> Self {
        Self { fds: vec![fd] }
    }
}

/// A fence lent out for the duration of one call
#[derive(Debug, Clone, Copy)]
pub struct BorrowedFence<'a> {
    fds: &'a [OwnedFd],
}

impl BorrowedFence<'_> {
    pub fn is_valid(&self) -> bool {
        !self.fds.is_empty()
    }

    /// Duplicate into an owned fence so it can cross the channel
    pub fn duplicate(&self) -> Result<Fence> {
        let fds = self
            .fds
            .iter()
            .map(|fd| fd.try_clone())
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Fence { fds })
    }
}

/// Completes the work a [`Fence::pending`] fence stands for
pub struct FenceSignal {
    event: EventFd,
}

impl FenceSignal {
    pub fn signal(&self) -> Result<()> {
        self.event.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fence_is_signalled() {
        let fence = Fence::empty();
        assert!(!fence.is_valid());
        assert_eq!(fence.wait(Some(Duration::ZERO)).unwrap(), Readiness::Ready);
    }

    #[test]
    fn test_pending_fence_signals_all_duplicates() {
        let (fence, signal) = Fence::pending().unwrap();
        let copy = fence.duplicate().unwrap();
        assert_ne!(fence.as_raw_fd(), copy.as_raw_fd());
        assert_eq!(copy.wait(Some(Duration::ZERO)).unwrap(), Readiness::TimedOut);

        signal.signal().unwrap();
        assert_eq!(fence.wait(Some(Duration::ZERO)).unwrap(), Readiness::Ready);
        assert_eq!(copy.wait(None).unwrap(), Readiness::Ready);
    }

    #[test]
    fn test_merged_fence_waits_for_every_part() {
        let (first, first_signal) = Fence::pending().unwrap();
        let (second, second_signal) = Fence::pending().unwrap();
        let merged = Fence::merge([first, Fence::empty(), second]);
        assert_eq!(merged.handle_count(), 2);

        second_signal.signal().unwrap();
        assert_eq!(merged.wait(Some(Duration::ZERO)).unwrap(), Readiness::TimedOut);
        assert_eq!(merged.duplicate().unwrap().wait(Some(Duration::from_millis(5))).unwrap(), Readiness::TimedOut);

        first_signal.signal().unwrap();
        assert_eq!(merged.wait(Some(Duration::ZERO)).unwrap(), Readiness::Ready);
    }

    #[test]
    fn test_take_leaves_empty() {
        let (mut fence, _signal) = Fence::pending().unwrap();
        let taken = fence.take();
        assert!(taken.is_valid());
        assert!(!fence.is_valid());
    }
}
