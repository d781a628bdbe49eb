//! A socket-backed transport: thin wrapper over the same raw-fd plumbing `pipe` uses.
//!
//! Distinct from [`crate::transports::pipe`] only in how the fd was created (`socketpair(2)`
//! instead of `pipe(2)`); once open, both ends behave identically under the vtable.

use std::os::unix::io::{AsRawFd, OwnedFd};

use crate::errno::KernelStatus;
use crate::flags::IoFlags;
use crate::io_object::{IoObject, IoTransport, MiscOp, MiscResult, Transport};
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;
use crate::transports::raw_fd::{nonblocking_read, nonblocking_write, set_os_nonblocking, RawFdHandle};

/// One end of a Unix domain socket pair.
#[derive(Debug)]
pub struct SocketTransport {
    handle: RawFdHandle,
}

impl SocketTransport {
    fn from_owned(fd: OwnedFd) -> Result<Self, KernelStatus> {
        use std::os::unix::io::IntoRawFd;
        let raw = fd.into_raw_fd();
        set_os_nonblocking(raw)?;
        Ok(SocketTransport {
            handle: RawFdHandle::new(raw),
        })
    }
}

impl IoTransport for SocketTransport {
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

/// Creates a connected `AF_UNIX`/`SOCK_STREAM` pair, both ends tagged
/// [`crate::io_object::Transport::Socket`].
pub fn create_socketpair() -> Result<(IoObject, IoObject), KernelStatus> {
    let (a, b) = nix::sys::socket::socketpair(
        nix::sys::socket::AddressFamily::Unix,
        nix::sys::socket::SockType::Stream,
        None,
        nix::sys::socket::SockFlag::empty(),
    )
    .map_err(|_| KernelStatus::Io)?;
    let a = SocketTransport::from_owned(a)?;
    let b = SocketTransport::from_owned(b)?;
    Ok((
        IoObject::new(std::sync::Arc::new(a), Transport::Socket, IoFlags::empty()),
        IoObject::new(std::sync::Arc::new(b), Transport::Socket, IoFlags::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_on_one_end_is_visible_on_the_other() {
        let (a, b) = create_socketpair().unwrap();
        a.transport().write(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = b.transport().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn empty_socket_read_is_should_wait() {
        let (_a, b) = create_socketpair().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(b.transport().read(&mut buf).unwrap_err(), KernelStatus::ShouldWait);
    }
}
