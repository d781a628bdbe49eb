//! `/dev/null`-equivalent transport: reads return EOF, writes succeed and discard.

use crate::errno::KernelStatus;
use crate::io_object::{IoTransport, MiscOp, MiscResult};
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;

/// Reads as EOF, writes as a no-op sink, nothing ever waitable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl IoTransport for NullTransport {
    fn close(&self) -> Result<(), KernelStatus> {
        Ok(())
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize, KernelStatus> {
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, KernelStatus> {
        Ok(buf.len())
    }

    fn misc(&self, op: MiscOp, _arg: u64, _in_buf: &[u8], _out_buf: &mut [u8]) -> Result<MiscResult, KernelStatus> {
        let _ = op;
        Err(KernelStatus::NotSupported)
    }

    fn wait_begin(&self, _events: PollEvents) -> (WaitHandle, PollEvents) {
        (WaitHandle::INVALID, PollEvents::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_always_eof() {
        let mut buf = [0u8; 8];
        assert_eq!(NullTransport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_discards_and_reports_full_length() {
        assert_eq!(NullTransport.write(b"hello").unwrap(), 5);
    }

    #[test]
    fn nothing_is_waitable() {
        let (handle, _) = NullTransport.wait_begin(PollEvents::POLLIN);
        assert!(handle.is_invalid());
    }
}
