//! Translates a single fd or a batch of fds into kernel waits and back (spec §4.6), backing
//! blocking read/write retry, `poll`, and `select`.

use std::time::Duration;

use crate::errno::KernelStatus;
use crate::io_object::IoObject;
use crate::kernel::{Kernel, WaitItem, WaitTimeout};
use crate::poll_events::PollEvents;

/// One fd's worth of input to [`WaitMux::poll_many`]: the `IoObject` to wait on and the events
/// the caller is interested in.
#[derive(Clone)]
pub struct PollRequest<'a> {
    /// The object being polled.
    pub io: &'a IoObject,
    /// Events requested for this object.
    pub events: PollEvents,
}

/// Multiplexes waits across one or more [`IoObject`]s via a [`Kernel`].
pub struct WaitMux<'a> {
    kernel: &'a dyn Kernel,
}

impl<'a> WaitMux<'a> {
    /// Builds a mux over the given kernel.
    pub fn new(kernel: &'a dyn Kernel) -> Self {
        WaitMux { kernel }
    }

    /// Blocks until `io` is ready for one of `events`, or `timeout` elapses. Used to retry a
    /// blocking `read`/`write` that returned `ShouldWait`.
    pub fn wait_fd(&self, io: &IoObject, events: PollEvents, timeout: WaitTimeout) -> Result<PollEvents, KernelStatus> {
        let (handle, kernel_events) = io.transport().wait_begin(events);
        if handle.is_invalid() {
            log::trace!("wait_fd: transport has nothing waitable, returning immediately");
            return Ok(PollEvents::empty());
        }
        log::trace!("wait_fd: blocking on handle {:?} for {:?}", handle, kernel_events);
        let pending = self.kernel.single_wait(handle, kernel_events, timeout)?;
        Ok(io.transport().wait_end(pending))
    }

    /// Polls many fds at once (backs `poll(2)`/`select(2)`). Requests whose transport has
    /// nothing waitable are reported ready-for-nothing without being handed to the kernel, per
    /// spec §4.6's "compact valid entries" step; everything else is multiplexed into one
    /// `multi_wait` call.
    pub fn poll_many(&self, requests: &[PollRequest<'_>], timeout: WaitTimeout) -> Result<Vec<PollEvents>, KernelStatus> {
        let mut items = Vec::with_capacity(requests.len());
        let mut slot_for_request = vec![None; requests.len()];

        for (i, req) in requests.iter().enumerate() {
            let (handle, kernel_events) = req.io.transport().wait_begin(req.events);
            if !handle.is_invalid() {
                slot_for_request[i] = Some(items.len());
                items.push(WaitItem { handle, events: kernel_events });
            }
        }

        let mut observed = vec![PollEvents::empty(); requests.len()];
        if items.is_empty() {
            return Ok(observed);
        }

        let results = match self.kernel.multi_wait(&items, timeout) {
            Ok(r) => r,
            Err(KernelStatus::TimedOut) => return Ok(observed),
            Err(e) => return Err(e),
        };

        for (i, req) in requests.iter().enumerate() {
            if let Some(slot) = slot_for_request[i] {
                observed[i] = req.io.transport().wait_end(results[slot]);
            }
        }
        Ok(observed)
    }

    /// Converts a `poll(2)`-style millisecond timeout (`-1` = forever, `0` = don't block) into a
    /// [`WaitTimeout`].
    pub fn timeout_from_millis(millis: i32) -> WaitTimeout {
        if millis < 0 {
            None
        } else {
            Some(Duration::from_millis(millis as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::IoFlags;
    use crate::io_object::{IoTransport, MiscOp, MiscResult, Transport};
    use crate::kernel::WaitHandle;
    use std::sync::Arc;

    #[derive(Debug)]
    struct NeverWaitable;

    impl IoTransport for NeverWaitable {
        fn close(&self) -> Result<(), KernelStatus> {
            Ok(())
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
        fn wait_begin(&self, _events: PollEvents) -> (WaitHandle, PollEvents) {
            (WaitHandle::INVALID, PollEvents::empty())
        }
    }

    struct NeverCalledKernel;
    impl Kernel for NeverCalledKernel {
        fn single_wait(&self, _: crate::kernel::WaitHandle, _: PollEvents, _: WaitTimeout) -> Result<PollEvents, KernelStatus> {
            panic!("should not be called for an unwaitable handle");
        }
        fn multi_wait(&self, _: &[WaitItem], _: WaitTimeout) -> Result<Vec<PollEvents>, KernelStatus> {
            panic!("should not be called when every item is unwaitable");
        }
    }

    #[test]
    fn wait_fd_short_circuits_for_unwaitable_transports() {
        let io = IoObject::new(Arc::new(NeverWaitable), Transport::Null, IoFlags::empty());
        let mux = WaitMux::new(&NeverCalledKernel);
        let result = mux.wait_fd(&io, PollEvents::POLLIN, None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn poll_many_short_circuits_when_nothing_is_waitable() {
        let io = IoObject::new(Arc::new(NeverWaitable), Transport::Null, IoFlags::empty());
        let mux = WaitMux::new(&NeverCalledKernel);
        let requests = [PollRequest { io: &io, events: PollEvents::POLLIN }];
        let result = mux.poll_many(&requests, Some(Duration::from_millis(0))).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].is_empty());
    }

    #[test]
    fn timeout_from_millis_negative_is_forever() {
        assert_eq!(WaitMux::timeout_from_millis(-1), None);
    }

    #[test]
    fn timeout_from_millis_zero_is_immediate() {
        assert_eq!(WaitMux::timeout_from_millis(0), Some(Duration::from_millis(0)));
    }
}
