//! The polymorphic I/O handle and its transport vtable.
//!
//! Every POSIX call bottoms out in a method on [`IoTransport`], the trait all six transports
//! (remote, pipe, logger, null, waitable, socket — a closed union, spec §9 Design Note "Vtable
//! over transports") implement. [`IoObject`] wraps a transport behind the refcount/dupcount
//! split in spec §3/§5: `refcount` is atomic and counts every live reference (fd-table slots
//! plus transient holders), `dupcount` counts only fd-table slots and is protected by the fd
//! table's lock, not atomic — so transport operations never need the table lock held.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::errno::KernelStatus;
use crate::flags::IoFlags;
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;

/// Which concrete transport backs an [`IoObject`]. A closed tagged union by design: adding a
/// transport means adding a variant here, not widening the vtable's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// An object backed by a remote (RPC-style) channel, e.g. a filesystem directory/file.
    Remote,
    /// One end of an OS pipe.
    Pipe,
    /// A write-only log sink (stdout/stderr-as-logger at startup).
    Logger,
    /// `/dev/null`-equivalent: reads return EOF, writes succeed and discard.
    Null,
    /// A handle with no data path, only wait semantics (event/signal-style objects).
    Waitable,
    /// A socket-backed transport.
    Socket,
}

/// A result produced by [`IoTransport::misc`]: either a byte length or nothing (for ops that
/// only signal success/failure, like `unlink`/`rename`/`sync`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MiscResult {
    /// Length written into the caller's output buffer, if any.
    pub len: usize,
}

/// Opcode for [`IoTransport::misc`]. Spec §4.1 groups stat/setattr/readdir/unlink/rename/link/
/// truncate/sync behind one op to keep the vtable small; this enum is that op's selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiscOp {
    /// Fetch a `vnattr` into the output buffer.
    Stat,
    /// Apply attribute changes described by the input buffer.
    SetAttr,
    /// Fetch a batch of packed `vdirent` records. `arg` is the readdir command (`RESET`/`NONE`).
    ReadDir,
    /// Remove the leaf named in the input buffer from this directory.
    Unlink,
    /// Rename/link using the two packed paths in the input buffer. `arg != 0` means link
    /// instead of rename.
    Rename,
    /// Truncate to the length carried in `arg`.
    Truncate,
    /// Flush to stable storage.
    Sync,
}

/// The transport vtable (spec §4.1). Every method that can't proceed without blocking returns
/// `Err(KernelStatus::ShouldWait)`, never actually blocks; blocking is `PosixOps`'s job.
pub trait IoTransport: Send + Sync + fmt::Debug {
    /// Releases the transport's kernel handle(s). Must be called exactly once; the caller (fd
    /// table or startup/atexit) guarantees that, so implementations don't need to be idempotent.
    fn close(&self) -> Result<(), KernelStatus>;

    /// Reads up to `buf.len()` bytes. `Err(ShouldWait)` means "not ready, don't block".
    fn read(&self, buf: &mut [u8]) -> Result<usize, KernelStatus>;

    /// Writes `buf`. `Err(ShouldWait)` means "not ready, don't block".
    fn write(&self, buf: &[u8]) -> Result<usize, KernelStatus>;

    /// Positional read. Transports without positional I/O return `NotSupported`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, KernelStatus> {
        let _ = (buf, offset);
        Err(KernelStatus::NotSupported)
    }

    /// Positional write. Transports without positional I/O return `NotSupported`.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, KernelStatus> {
        let _ = (buf, offset);
        Err(KernelStatus::NotSupported)
    }

    /// Repositions the transport's cursor; returns the new offset.
    fn seek(&self, offset: i64, whence: i32) -> Result<u64, KernelStatus> {
        let _ = (offset, whence);
        Err(KernelStatus::NotSupported)
    }

    /// The grab-bag op for stat/setattr/readdir/unlink/rename/link/truncate/sync.
    fn misc(&self, op: MiscOp, arg: u64, in_buf: &[u8], out_buf: &mut [u8]) -> Result<MiscResult, KernelStatus> {
        let _ = (op, arg, in_buf, out_buf);
        Err(KernelStatus::NotSupported)
    }

    /// Device-specific control, backing `ioctl`/`posix_ioctl`.
    fn ioctl(&self, op: u32, in_buf: &[u8], out_buf: &mut [u8]) -> Result<usize, KernelStatus> {
        let _ = (op, in_buf, out_buf);
        Err(KernelStatus::NotSupported)
    }

    /// Opens `path` relative to this transport, only meaningful for directory-like transports.
    fn open(
        &self,
        path: &str,
        flags: crate::open_flags::OpenFlags,
        mode: u32,
    ) -> Result<Arc<dyn IoTransport>, KernelStatus> {
        let _ = (path, flags, mode);
        Err(KernelStatus::NotSupported)
    }

    /// Translates `events` into a kernel wait handle and the signal mask to wait for.
    /// Returns [`WaitHandle::INVALID`] if this transport has nothing waitable.
    fn wait_begin(&self, events: PollEvents) -> (WaitHandle, PollEvents);

    /// Translates pending signals observed on the handle `wait_begin` returned back into
    /// `PollEvents`.
    fn wait_end(&self, pending: PollEvents) -> PollEvents {
        pending
    }
}

#[derive(Debug)]
struct IoObjectInner {
    transport: Arc<dyn IoTransport>,
    tag: Transport,
    flags: AtomicU32,
    closed: AtomicBool,
}

/// A shared, refcounted handle to a transport.
///
/// `refcount` (spec §3) is the liveness count: every clone of `IoObject` is a live reference, and
/// `Arc::strong_count` on the inner allocation already is exactly that count, so it's used
/// directly rather than duplicated into a second hand-maintained atomic. `dupcount` lives in
/// [`crate::fd_table::FdTable`], not here, because it counts fd-table slots specifically and is
/// only ever touched under the table's lock — the split is what lets transport ops run without
/// the table lock held (spec §9 Design Note "dual counting").
#[derive(Debug, Clone)]
pub struct IoObject(Arc<IoObjectInner>);

impl IoObject {
    /// Wraps a transport in a fresh `IoObject` with `refcount == 1`, flags as given.
    pub fn new(transport: Arc<dyn IoTransport>, tag: Transport, flags: IoFlags) -> Self {
        IoObject(Arc::new(IoObjectInner {
            transport,
            tag,
            flags: AtomicU32::new(flags.bits()),
            closed: AtomicBool::new(false),
        }))
    }

    /// The transport tag.
    pub fn tag(&self) -> Transport {
        self.0.tag
    }

    /// Current flag bits.
    pub fn flags(&self) -> IoFlags {
        IoFlags::from_bits_truncate(self.0.flags.load(Ordering::Acquire))
    }

    /// Replaces the flag bits wholesale (used by `fcntl(F_SETFL)`).
    pub fn set_flags(&self, flags: IoFlags) {
        self.0.flags.store(flags.bits(), Ordering::Release);
    }

    /// `true` if `NONBLOCK` is set.
    pub fn is_nonblocking(&self) -> bool {
        self.flags().contains(IoFlags::NONBLOCK)
    }

    /// Number of live references to the underlying transport. Exposed for invariant checks
    /// (spec §8 invariant 1): `refcount >= dupcount` must hold at every fd-table slot.
    pub fn refcount(&self) -> u32 {
        // +1 for this handle's own Arc strong count against the inner struct, -1 for the Arc
        // held by `self.0` itself: `Arc::strong_count` already reflects exactly the number of
        // live `IoObject` clones, which is our refcount by construction.
        Arc::strong_count(&self.0) as u32
    }

    /// Calls the transport's `close`, marking this object closed. Safe to call only once per
    /// object (spec §4.1 "idempotent... NOT required").
    pub fn close(&self) -> Result<(), KernelStatus> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.transport.close()
    }

    /// Access to the transport vtable.
    pub fn transport(&self) -> &dyn IoTransport {
        self.0.transport.as_ref()
    }

    /// Returns `true` if the underlying `Arc` for `self` and `other` are the same allocation.
    pub fn ptr_eq(&self, other: &IoObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Drop for IoObjectInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::warn!(
                "IoObject ({:?}) dropped without an explicit close; closing now",
                self.tag
            );
            if let Err(status) = self.transport.close() {
                log::warn!("close on drop failed: {:?}", status);
            }
        }
    }
}
