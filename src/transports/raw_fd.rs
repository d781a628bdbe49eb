//! A raw OS fd wrapper with close-once semantics, shared by every transport that's actually
//! backed by a real file descriptor.
//!
//! Grounded on the teacher's `FileDescriptorRawHandle` (`src/io_ops/mod.rs`): an `AtomicBool`
//! guards against double-close, and `Drop` closes the fd if nobody did explicitly.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errno::KernelStatus;
use crate::kernel::WaitHandle;

/// Wraps a raw fd so it's closed exactly once, whether via an explicit `close()` or `Drop`.
#[derive(Debug)]
pub struct RawFdHandle {
    fd: RawFd,
    closed: AtomicBool,
}

impl RawFdHandle {
    /// Takes ownership of `fd`.
    pub fn new(fd: RawFd) -> Self {
        RawFdHandle {
            fd,
            closed: AtomicBool::new(false),
        }
    }

    /// Closes the fd if it hasn't been already.
    pub fn close(&self) -> Result<(), KernelStatus> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let rc = unsafe { libc::close(self.fd) };
        if rc < 0 {
            return Err(KernelStatus::Io);
        }
        Ok(())
    }

    /// The wait handle the kernel's poll primitive should watch: this fd, or `INVALID` if
    /// already closed.
    pub fn wait_handle(&self) -> WaitHandle {
        if self.closed.load(Ordering::Acquire) {
            WaitHandle::INVALID
        } else {
            WaitHandle(self.fd)
        }
    }
}

impl AsRawFd for RawFdHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RawFdHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Reads up to `buf.len()` bytes from `fd`. The fd is expected to already be `O_NONBLOCK`;
/// `EAGAIN`/`EWOULDBLOCK` becomes `ShouldWait` per the vtable contract (spec §4.1).
pub fn nonblocking_read(fd: RawFd, buf: &mut [u8]) -> Result<usize, KernelStatus> {
    let rc = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if rc >= 0 {
        return Ok(rc as usize);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => Err(KernelStatus::ShouldWait),
        _ => Err(KernelStatus::Io),
    }
}

/// Writes `buf` to `fd`. See [`nonblocking_read`] for the `ShouldWait` mapping.
pub fn nonblocking_write(fd: RawFd, buf: &[u8]) -> Result<usize, KernelStatus> {
    let rc = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if rc >= 0 {
        return Ok(rc as usize);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => Err(KernelStatus::ShouldWait),
        _ => Err(KernelStatus::Io),
    }
}

/// Sets `O_NONBLOCK` on `fd` unconditionally; every transport here multiplexes readiness through
/// `poll(2)` rather than relying on blocking syscalls, so every underlying fd is kernel-nonblock
/// regardless of the `IoObject`-level `NONBLOCK` flag (which governs whether `PosixOps` retries).
pub fn set_os_nonblocking(fd: RawFd) -> Result<(), KernelStatus> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(KernelStatus::Io);
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(KernelStatus::Io);
    }
    Ok(())
}
