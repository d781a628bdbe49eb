//! One end of a real OS pipe.
//!
//! Grounded on the teacher's raw-fd-backed channel plumbing (`src/io_ops/mod.rs`): a pipe end is
//! just a nonblocking raw fd, read/write go straight through to `read(2)`/`write(2)`, and
//! readiness is whatever `poll(2)` reports on that fd.

use std::os::unix::io::{AsRawFd, OwnedFd};

use crate::errno::KernelStatus;
use crate::io_object::{IoObject, IoTransport, MiscOp, MiscResult};
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;
use crate::flags::IoFlags;
use crate::transports::raw_fd::{nonblocking_read, nonblocking_write, set_os_nonblocking, RawFdHandle};

/// One end of a pipe (read end or write end; which is which is a property of which end the
/// caller obtained, not tracked here).
#[derive(Debug)]
pub struct PipeTransport {
    handle: RawFdHandle,
}

impl PipeTransport {
    /// Wraps an already-open fd as a pipe end, setting it nonblocking.
    pub fn from_owned(fd: OwnedFd) -> Result<Self, KernelStatus> {
        use std::os::unix::io::IntoRawFd;
        let raw = fd.into_raw_fd();
        set_os_nonblocking(raw)?;
        Ok(PipeTransport {
            handle: RawFdHandle::new(raw),
        })
    }
}

impl IoTransport for PipeTransport {
    fn close(&self) -> Result<(), KernelStatus> {
        self.handle.close()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, KernelStatus> {
        nonblocking_read(self.handle.as_raw_fd(), buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, KernelStatus> {
        nonblocking_write(self.handle.as_raw_fd(), buf)
    }

    fn misc(&self, op: MiscOp, _arg: u64, _in_buf: &[u8], _out_buf: &mut [u8]) -> Result<MiscResult, KernelStatus> {
        let _ = op;
        Err(KernelStatus::NotSupported)
    }

    fn wait_begin(&self, events: PollEvents) -> (WaitHandle, PollEvents) {
        (self.handle.wait_handle(), events)
    }
}

/// Creates a connected pipe pair, returning `(read_end, write_end)` as `IoObject`s already
/// tagged [`crate::io_object::Transport::Pipe`].
pub fn create_pipe() -> Result<(IoObject, IoObject), KernelStatus> {
    let (read_fd, write_fd) = nix::unistd::pipe().map_err(|_| KernelStatus::Io)?;
    let read_end = PipeTransport::from_owned(read_fd)?;
    let write_end = PipeTransport::from_owned(write_fd)?;
    Ok((
        IoObject::new(std::sync::Arc::new(read_end), crate::io_object::Transport::Pipe, IoFlags::empty()),
        IoObject::new(std::sync::Arc::new(write_end), crate::io_object::Transport::Pipe, IoFlags::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let (read_end, write_end) = create_pipe().unwrap();
        write_end.transport().write(b"hello").unwrap();
        let mut buf = [0u8; 16];
        // Give the kernel a moment; on Linux a pipe write of this size is immediately visible.
        let n = read_end.transport().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn empty_pipe_read_is_should_wait() {
        let (read_end, _write_end) = create_pipe().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            read_end.transport().read(&mut buf).unwrap_err(),
            KernelStatus::ShouldWait
        );
    }

    #[test]
    fn wait_begin_returns_the_underlying_fd_as_the_handle() {
        let (read_end, _write_end) = create_pipe().unwrap();
        let (handle, events) = read_end.transport().wait_begin(PollEvents::POLLIN);
        assert!(!handle.is_invalid());
        assert_eq!(events, PollEvents::POLLIN);
    }
}
