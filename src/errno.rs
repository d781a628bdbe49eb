//! Kernel status codes and their translation to POSIX `errno`.

use std::fmt;
use std::num::NonZeroI32;

/// Status codes returned by [`crate::io_object::IoTransport`] operations.
///
/// This is the closed set named in the core design: every transport op returns one of these
/// (or `Ok`) instead of a raw errno. Only [`ErrorMap::translate`] converts a `KernelStatus` into
/// the POSIX-visible [`Errno`], and it only runs at the POSIX call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelStatus {
    /// Requested entity does not exist.
    NotFound,
    /// Kernel or transport is out of memory.
    NoMemory,
    /// Argument(s) malformed.
    InvalidArgs,
    /// Caller-provided buffer too small for the result.
    BufferTooSmall,
    /// A wait or RPC timed out.
    TimedOut,
    /// Entity already exists.
    AlreadyExists,
    /// The remote end of a channel-backed transport closed.
    RemoteClosed,
    /// Path malformed or too long.
    BadPath,
    /// Generic I/O failure.
    Io,
    /// Expected a directory, found something else.
    NotDir,
    /// Operation not supported by this transport.
    NotSupported,
    /// Value out of the accepted range, or a result buffer too small to hold it.
    OutOfRange,
    /// No more of some finite kernel resource (other than memory).
    NoResources,
    /// No free fd-table slot at or above the requested starting point.
    NoFreeSlots,
    /// Operation recognized but not implemented by this transport/kernel at all.
    NotImplemented,
    /// Handle invalid, wrong type, or out of range.
    BadHandle,
    /// Access denied.
    AccessDenied,
    /// Operation would block; retry once readable/writable.
    ShouldWait,
    /// Resulting file would be too large.
    FileBig,
    /// No space left on the backing store.
    NoSpace,
}

/// A POSIX error number.
///
/// Thin wrapper so call sites can't accidentally construct `Errno(0)`, mirroring the teacher's
/// `Errno` newtype (grounded on `ll/errno.rs`'s `Errno` usage pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(NonZeroI32);

impl Errno {
    /// Wraps a raw errno value. Panics in debug builds if `code` is zero; every call site here
    /// passes a `libc::E*` constant, which are all non-zero by construction.
    pub fn from_i32(code: i32) -> Self {
        Errno(NonZeroI32::new(code).expect("errno code must be non-zero"))
    }

    /// The raw errno value, suitable for `*libc::__errno_location() = ...`.
    pub fn code(self) -> i32 {
        self.0.get()
    }

    /// Sets the current thread's `errno` to this value.
    pub fn set_errno(self) {
        unsafe {
            *libc::__errno_location() = self.code();
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.code())
    }
}

/// Translates kernel statuses to POSIX errno. Catch-all is `EIO`.
///
/// This is the entire table in one function; it never allocates, logs, or does anything besides
/// the match, so it's cheap enough to call on every POSIX entry/exit.
pub struct ErrorMap;

impl ErrorMap {
    /// Translates a [`KernelStatus`] to the `Errno` that should be reported to the caller.
    pub fn translate(status: KernelStatus) -> Errno {
        let raw = match status {
            KernelStatus::NotFound => libc::ENOENT,
            KernelStatus::NoMemory => libc::ENOMEM,
            KernelStatus::InvalidArgs => libc::EINVAL,
            KernelStatus::BufferTooSmall => libc::EINVAL,
            KernelStatus::TimedOut => libc::ETIMEDOUT,
            KernelStatus::AlreadyExists => libc::EEXIST,
            KernelStatus::RemoteClosed => libc::ENOTCONN,
            KernelStatus::BadPath => libc::ENAMETOOLONG,
            KernelStatus::Io => libc::EIO,
            KernelStatus::NotDir => libc::ENOTDIR,
            KernelStatus::NotSupported => libc::ENOTSUP,
            KernelStatus::OutOfRange => libc::ERANGE,
            KernelStatus::NoResources => libc::ENOMEM,
            KernelStatus::BadHandle => libc::EBADF,
            KernelStatus::AccessDenied => libc::EACCES,
            KernelStatus::ShouldWait => libc::EAGAIN,
            KernelStatus::FileBig => libc::EFBIG,
            KernelStatus::NoSpace => libc::ENOSPC,
            KernelStatus::NoFreeSlots => libc::EMFILE,
            KernelStatus::NotImplemented => libc::ENOSYS,
        };
        Errno::from_i32(raw)
    }
}

/// Sets `errno` and returns `-1`, the standard POSIX failure return for calls whose success
/// value is an `isize`/`c_int`/`ssize_t`.
pub(crate) fn fail(status: KernelStatus) -> isize {
    ErrorMap::translate(status).set_errno();
    -1
}

/// Like [`fail`], but sets `errno` directly from an already-translated `Errno`.
pub(crate) fn fail_errno(errno: Errno) -> isize {
    errno.set_errno();
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_covers_should_wait() {
        assert_eq!(ErrorMap::translate(KernelStatus::ShouldWait).code(), libc::EAGAIN);
    }

    #[test]
    fn translate_covers_bad_handle() {
        assert_eq!(ErrorMap::translate(KernelStatus::BadHandle).code(), libc::EBADF);
    }

    #[test]
    fn translate_covers_no_free_slots_as_emfile() {
        assert_eq!(ErrorMap::translate(KernelStatus::NoFreeSlots).code(), libc::EMFILE);
    }

    #[test]
    fn translate_covers_out_of_range_as_erange() {
        assert_eq!(ErrorMap::translate(KernelStatus::OutOfRange).code(), libc::ERANGE);
    }

    #[test]
    fn translate_covers_not_implemented_as_enosys() {
        assert_eq!(ErrorMap::translate(KernelStatus::NotImplemented).code(), libc::ENOSYS);
    }

    #[test]
    fn translate_is_total_over_all_variants() {
        let all = [
            KernelStatus::NotFound,
            KernelStatus::NoMemory,
            KernelStatus::InvalidArgs,
            KernelStatus::BufferTooSmall,
            KernelStatus::TimedOut,
            KernelStatus::AlreadyExists,
            KernelStatus::RemoteClosed,
            KernelStatus::BadPath,
            KernelStatus::Io,
            KernelStatus::NotDir,
            KernelStatus::NotSupported,
            KernelStatus::OutOfRange,
            KernelStatus::NoResources,
            KernelStatus::BadHandle,
            KernelStatus::AccessDenied,
            KernelStatus::ShouldWait,
            KernelStatus::FileBig,
            KernelStatus::NoSpace,
            KernelStatus::NoFreeSlots,
            KernelStatus::NotImplemented,
        ];
        for status in all {
            // Must not panic; every variant has a mapping.
            let _ = ErrorMap::translate(status);
        }
    }
}
