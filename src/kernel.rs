//! The waiting primitive the microkernel is assumed to supply.
//!
//! [`WaitMux`](crate::wait_mux::WaitMux) never blocks on a transport directly; it asks the
//! transport to translate POSIX events into a `(WaitHandle, SignalMask)` pair via
//! [`crate::io_object::IoTransport::wait_begin`], then blocks here, then asks the transport to
//! translate the observed signals back. This crate has no real microkernel underneath it, so
//! [`PollKernel`] backs `WaitHandle` with a raw fd and blocks in `poll(2)` — a reasonable stand-in
//! for "the kernel's single/multi-wait primitive" per spec §4.6/§9.

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};

use crate::errno::KernelStatus;
use crate::poll_events::PollEvents;

/// A kernel wait handle. `-1` means "nothing to wait on" (the invalid-handle case in spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitHandle(pub RawFd);

impl WaitHandle {
    /// The sentinel returned by `wait_begin` when the transport has nothing waitable.
    pub const INVALID: WaitHandle = WaitHandle(-1);

    /// `true` for [`WaitHandle::INVALID`].
    pub fn is_invalid(self) -> bool {
        self.0 < 0
    }
}

/// One entry in a multi-wait batch: a handle plus the signal mask to watch for on it.
#[derive(Debug, Clone, Copy)]
pub struct WaitItem {
    /// The handle to watch.
    pub handle: WaitHandle,
    /// Events to watch for on `handle`.
    pub events: PollEvents,
}

/// An optional timeout for a kernel wait. `None` means wait forever.
pub type WaitTimeout = Option<Duration>;

/// Abstraction over the kernel's wait primitives, so `WaitMux` can be tested without real
/// transports backing real fds.
pub trait Kernel: Send + Sync {
    /// Blocks until `handle` becomes ready for one of `events`, or `timeout` elapses.
    /// Returns the events that were actually observed (a subset of `events`, plus `POLLERR`/
    /// `POLLHUP` which are always reported).
    fn single_wait(
        &self,
        handle: WaitHandle,
        events: PollEvents,
        timeout: WaitTimeout,
    ) -> Result<PollEvents, KernelStatus>;

    /// Blocks until any of `items` becomes ready, or `timeout` elapses. Returns one `PollEvents`
    /// per input item, in order; an item whose handle was invalid is skipped by the caller before
    /// this is invoked (callers pre-filter, matching spec §4.6's "compact valid entries" step).
    fn multi_wait(
        &self,
        items: &[WaitItem],
        timeout: WaitTimeout,
    ) -> Result<Vec<PollEvents>, KernelStatus>;
}

/// The default [`Kernel`]: blocks in `poll(2)` over raw fds.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollKernel;

fn poll_flags_for(events: PollEvents) -> PollFlags {
    let mut flags = PollFlags::empty();
    if events.contains(PollEvents::POLLIN) {
        flags |= PollFlags::POLLIN;
    }
    if events.contains(PollEvents::POLLOUT) {
        flags |= PollFlags::POLLOUT;
    }
    if events.contains(PollEvents::POLLPRI) {
        flags |= PollFlags::POLLPRI;
    }
    flags
}

fn events_from_revents(revents: PollFlags) -> PollEvents {
    let mut events = PollEvents::empty();
    if revents.contains(PollFlags::POLLIN) {
        events |= PollEvents::POLLIN;
    }
    if revents.contains(PollFlags::POLLOUT) {
        events |= PollEvents::POLLOUT;
    }
    if revents.contains(PollFlags::POLLPRI) {
        events |= PollEvents::POLLPRI;
    }
    if revents.contains(PollFlags::POLLERR) {
        events |= PollEvents::POLLERR;
    }
    if revents.contains(PollFlags::POLLHUP) {
        events |= PollEvents::POLLHUP;
    }
    if revents.contains(PollFlags::POLLNVAL) {
        events |= PollEvents::POLLNVAL;
    }
    events
}

fn timeout_to_poll(timeout: WaitTimeout) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(d) => {
            let millis = d.as_millis().min(u128::from(u16::MAX)) as u16;
            PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
        }
    }
}

impl Kernel for PollKernel {
    fn single_wait(
        &self,
        handle: WaitHandle,
        events: PollEvents,
        timeout: WaitTimeout,
    ) -> Result<PollEvents, KernelStatus> {
        if handle.is_invalid() {
            return Err(KernelStatus::InvalidArgs);
        }
        let mut fds = [PollFd::new(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(handle.0) },
            poll_flags_for(events),
        )];
        let n = nix::poll::poll(&mut fds, timeout_to_poll(timeout)).map_err(|_| KernelStatus::Io)?;
        if n == 0 {
            return Err(KernelStatus::TimedOut);
        }
        Ok(events_from_revents(fds[0].revents().unwrap_or_else(PollFlags::empty)))
    }

    fn multi_wait(
        &self,
        items: &[WaitItem],
        timeout: WaitTimeout,
    ) -> Result<Vec<PollEvents>, KernelStatus> {
        let mut fds: Vec<PollFd<'_>> = items
            .iter()
            .map(|item| {
                PollFd::new(
                    unsafe { std::os::fd::BorrowedFd::borrow_raw(item.handle.0) },
                    poll_flags_for(item.events),
                )
            })
            .collect();
        nix::poll::poll(&mut fds, timeout_to_poll(timeout)).map_err(|_| KernelStatus::Io)?;
        Ok(fds
            .iter()
            .map(|fd| events_from_revents(fd.revents().unwrap_or_else(PollFlags::empty)))
            .collect())
    }
}
