//! Process-wide singleton state: the fd table, cwd, root, and umask (spec §5).
//!
//! Bundled behind one value instead of true globals, per SPEC_FULL.md §A.3: a `Context` is
//! ordinary data you can construct for a test or hand to a thread, with [`Context::global`]
//! offering a process-default instance for call sites that want libc-style implicit global
//! behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::cwd::CwdTracker;
use crate::fd_table::FdTable;
use crate::io_object::IoObject;
use crate::kernel::{Kernel, PollKernel};
use parking_lot::Mutex;

/// Default file creation mask, matching the common shell default.
const DEFAULT_UMASK: u32 = 0o022;

/// Bundles the state spec §5 says is process-wide: the fd table, cwd tracker, root directory
/// handle, and umask.
pub struct Context {
    /// The process's fd table.
    pub fds: FdTable,
    /// The process's current working directory.
    pub cwd: CwdTracker,
    root: Mutex<Option<IoObject>>,
    umask: AtomicU32,
    kernel: PollKernel,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            fds: FdTable::new(),
            cwd: CwdTracker::new(),
            root: Mutex::new(None),
            umask: AtomicU32::new(DEFAULT_UMASK),
            kernel: PollKernel,
        }
    }
}

impl Context {
    /// An empty context: no root, no cwd `IoObject`, default umask, empty fd table.
    pub fn new() -> Self {
        Context::default()
    }

    /// The process-wide default context, lazily constructed on first use.
    pub fn global() -> &'static Context {
        static GLOBAL: OnceLock<Context> = OnceLock::new();
        GLOBAL.get_or_init(Context::new)
    }

    /// The kernel wait primitive this context's `WaitMux`/blocking retries should use.
    pub fn kernel(&self) -> &dyn Kernel {
        &self.kernel
    }

    /// The process's root directory handle, if one has been set by startup.
    pub fn root(&self) -> Option<IoObject> {
        self.root.lock().clone()
    }

    /// Sets the root directory handle (startup only; there's no `chroot` surface here).
    pub fn set_root(&self, io: IoObject) {
        *self.root.lock() = Some(io);
    }

    /// Current umask.
    pub fn umask(&self) -> u32 {
        self.umask.load(Ordering::Acquire)
    }

    /// Sets the umask, returning the previous value (matches `umask(2)`'s return convention).
    pub fn set_umask(&self, mask: u32) -> u32 {
        self.umask.swap(mask & 0o777, Ordering::AcqRel)
    }

    /// Applies the current umask to a requested creation mode, as `open`/`mkdir` do.
    pub fn apply_umask(&self, mode: u32) -> u32 {
        mode & !self.umask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umask_defaults_and_swaps() {
        let ctx = Context::new();
        assert_eq!(ctx.umask(), DEFAULT_UMASK);
        let previous = ctx.set_umask(0o077);
        assert_eq!(previous, DEFAULT_UMASK);
        assert_eq!(ctx.umask(), 0o077);
    }

    #[test]
    fn apply_umask_masks_requested_bits() {
        let ctx = Context::new();
        ctx.set_umask(0o022);
        assert_eq!(ctx.apply_umask(0o666), 0o644);
    }

    #[test]
    fn global_is_a_singleton() {
        let a = Context::global() as *const Context;
        let b = Context::global() as *const Context;
        assert_eq!(a, b);
    }
}
