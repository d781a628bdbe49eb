//! Per-fd and per-`IoObject` flag bits.

use std::fmt;
use std::fmt::Formatter;

use bitflags::bitflags;

bitflags! {
    /// Flags carried on an [`crate::io_object::IoObject`], shared by every fd that points at it.
    ///
    /// `NONBLOCK` gates the blocking-retry behavior in `posix_ops`; `CLOEXEC` is tracked but not
    /// enforced across `exec` (spec Non-goal — there is no `exec` in this layer).
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct IoFlags: u32 {
        /// `O_NONBLOCK` / `fcntl(F_SETFL, O_NONBLOCK)`.
        const NONBLOCK = 1 << 0;
        /// `O_CLOEXEC` / `FD_CLOEXEC`. Recorded only; never enforced.
        const CLOEXEC = 1 << 1;
        /// Transport-private bit reserved for `pipe`'s read-vs-write end.
        const TRANSPORT_BIT0 = 1 << 8;
        /// Transport-private bit reserved for `remote`'s append-mode tracking.
        const TRANSPORT_BIT1 = 1 << 9;
    }
}

impl fmt::Display for IoFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.bits(), f)
    }
}

bitflags! {
    /// Per-slot fd flags, as returned/accepted by `fcntl(F_GETFD)`/`fcntl(F_SETFD)`.
    ///
    /// Distinct from [`IoFlags`]: this is per-fd-table-slot state (so `dup`'d fds can disagree
    /// on `CLOEXEC`), not per-`IoObject` state.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
    pub struct FdFlags: u32 {
        /// `FD_CLOEXEC`.
        const CLOEXEC = 1 << 0;
    }
}

impl fmt::Display for FdFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.bits(), f)
    }
}
