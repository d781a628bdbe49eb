//! A handle with no data path, only wait semantics — backed by a Linux `eventfd`.
//!
//! Stands in for the original's event/signal-style kernel objects (spec §3: "a handle with no
//! data path, only wait semantics"). `read`/`write` are `NotSupported`; the only thing you can do
//! with one is wait on it and `signal`/`clear` it.

use std::os::unix::io::AsRawFd;

use crate::errno::KernelStatus;
use crate::io_object::{IoTransport, MiscOp, MiscResult};
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;
use crate::transports::raw_fd::RawFdHandle;

/// An `eventfd`-backed waitable object. Readiness tracks the eventfd's own counter semantics:
/// `POLLIN` once `signal()` has been called more times than `clear()`.
#[derive(Debug)]
pub struct WaitableTransport {
    handle: RawFdHandle,
}

impl WaitableTransport {
    /// Creates a fresh, unsignaled waitable object.
    pub fn new() -> Result<Self, KernelStatus> {
        let fd = nix::sys::eventfd::EventFd::from_value_and_flags(
            0,
            nix::sys::eventfd::EfdFlags::EFD_NONBLOCK,
        )
        .map_err(|_| KernelStatus::Io)?;
        use std::os::unix::io::IntoRawFd;
        let raw = fd.into_raw_fd();
        Ok(WaitableTransport {
            handle: RawFdHandle::new(raw),
        })
    }

    /// Bumps the eventfd counter by one, making it readable (`POLLIN`).
    pub fn signal(&self) -> Result<(), KernelStatus> {
        let buf = 1u64.to_ne_bytes();
        let rc = unsafe {
            libc::write(
                self.handle.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if rc < 0 {
            return Err(KernelStatus::Io);
        }
        Ok(())
    }

    /// Drains the eventfd counter back to zero, clearing the readable state.
    pub fn clear(&self) -> Result<(), KernelStatus> {
        let mut buf = [0u8; 8];
        let rc = unsafe {
            libc::read(
                self.handle.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if rc < 0 {
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EAGAIN) => return Ok(()),
                _ => return Err(KernelStatus::Io),
            }
        }
        Ok(())
    }
}

impl IoTransport for WaitableTransport {
    fn close(&self) -> Result<(), KernelStatus> {
        self.handle.close()
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize, KernelStatus> {
        Err(KernelStatus::NotSupported)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, KernelStatus> {
        Err(KernelStatus::NotSupported)
    }

    fn misc(&self, op: MiscOp, _arg: u64, _in_buf: &[u8], _out_buf: &mut [u8]) -> Result<MiscResult, KernelStatus> {
        let _ = op;
        Err(KernelStatus::NotSupported)
    }

    fn wait_begin(&self, events: PollEvents) -> (WaitHandle, PollEvents) {
        (self.handle.wait_handle(), events & PollEvents::POLLIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unsignaled() {
        let w = WaitableTransport::new().unwrap();
        let (handle, events) = w.wait_begin(PollEvents::POLLIN);
        assert!(!handle.is_invalid());
        assert_eq!(events, PollEvents::POLLIN);
    }

    #[test]
    fn signal_then_clear_round_trips() {
        let w = WaitableTransport::new().unwrap();
        w.signal().unwrap();
        w.clear().unwrap();
        // A second clear on an already-empty counter is a harmless no-op (EAGAIN swallowed).
        w.clear().unwrap();
    }

    #[test]
    fn wait_begin_masks_to_requested_events() {
        let w = WaitableTransport::new().unwrap();
        let (_, events) = w.wait_begin(PollEvents::POLLOUT);
        assert!(events.is_empty());
    }
}
