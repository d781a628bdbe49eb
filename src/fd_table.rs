//! The process-wide fd table: small integers to [`IoObject`]s, with dup-count lifecycle.

use parking_lot::Mutex;

use crate::errno::KernelStatus;
use crate::flags::FdFlags;
use crate::io_object::IoObject;

/// Maximum number of fd-table slots.
pub const MAX_FD: usize = 1024;

/// `AT_FDCWD`-equivalent sentinel used by [`crate::path_router::PathRouter`].
pub const AT_FDCWD: i32 = -100;

#[derive(Debug, Clone)]
struct Slot {
    io: IoObject,
    dupcount: u32,
    /// Per-descriptor flags (`FD_CLOEXEC`); unlike `IoObject`'s own flags, these are NOT shared
    /// between `dup`-derived slots pointing at the same object.
    fd_flags: FdFlags,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
}

/// The fd table. A single mutex guards every slot; spec §4.2/§5 requires that transport
/// operations (in particular `close`) never run while this lock is held.
#[derive(Debug)]
pub struct FdTable {
    inner: Mutex<Inner>,
}

impl Default for FdTable {
    fn default() -> Self {
        let mut slots = Vec::with_capacity(MAX_FD);
        slots.resize_with(MAX_FD, || None);
        FdTable {
            inner: Mutex::new(Inner { slots }),
        }
    }
}

impl FdTable {
    /// A fresh, empty table.
    pub fn new() -> Self {
        FdTable::default()
    }

    /// Binds `io` into the lowest free slot at or above `starting_fd`, or at `desired_fd`
    /// exactly if `desired_fd >= 0`. On success, `io`'s dupcount is incremented; the caller must
    /// already have acquired a reference on `io`'s behalf (spec §4.2).
    pub fn bind(&self, io: IoObject, desired_fd: i32, starting_fd: i32) -> Result<i32, KernelStatus> {
        if desired_fd >= MAX_FD as i32 {
            return Err(KernelStatus::InvalidArgs);
        }

        let evicted;
        let fd;
        {
            let mut inner = self.inner.lock();

            fd = if desired_fd >= 0 {
                desired_fd as usize
            } else {
                let start = starting_fd.max(0) as usize;
                match (start..MAX_FD).find(|&i| inner.slots[i].is_none()) {
                    Some(i) => i,
                    None => return Err(KernelStatus::NoFreeSlots),
                }
            };

            evicted = inner.slots[fd].take();
            inner.slots[fd] = Some(Slot { io, dupcount: 1, fd_flags: FdFlags::empty() });
        }

        // The outgoing occupant's close happens outside the lock (spec §4.2).
        if let Some(mut evicted) = evicted {
            evicted.dupcount -= 1;
            if evicted.dupcount == 0 {
                if let Err(status) = evicted.io.close() {
                    log::warn!("close of evicted fd {} failed: {:?}", fd, status);
                }
            }
        }

        log::debug!("fd_table: bound fd {}", fd);
        Ok(fd as i32)
    }

    /// Removes `fd` from the table and hands the sole remaining reference to the caller. Fails
    /// unless the fd is the only reference (`dupcount == 1`) and nothing else holds a transient
    /// reference (`refcount == 1`) — a concurrent `lookup` or another dup makes this fail with
    /// `Unavailable`.
    pub fn unbind(&self, fd: i32) -> Result<IoObject, KernelStatus> {
        let idx = Self::valid_index(fd)?;
        let mut inner = self.inner.lock();
        let slot = inner.slots[idx].as_ref().ok_or(KernelStatus::BadHandle)?;
        if slot.dupcount > 1 || slot.io.refcount() > 1 {
            return Err(KernelStatus::NoResources);
        }
        let slot = inner.slots[idx].take().unwrap();
        Ok(slot.io)
    }

    /// Looks up `fd`, returning a cloned (refcount-incremented) `IoObject`.
    pub fn lookup(&self, fd: i32) -> Option<IoObject> {
        let idx = Self::valid_index(fd).ok()?;
        let inner = self.inner.lock();
        inner.slots[idx].as_ref().map(|slot| slot.io.clone())
    }

    /// Decrements `fd`'s dupcount; closes and releases the transport once it reaches zero.
    /// Clears the slot unconditionally.
    pub fn close(&self, fd: i32) -> Result<(), KernelStatus> {
        let idx = Self::valid_index(fd)?;
        let removed = {
            let mut inner = self.inner.lock();
            match inner.slots[idx].take() {
                Some(slot) => slot,
                None => return Err(KernelStatus::BadHandle),
            }
        };
        log::debug!("fd_table: closed fd {}", fd);
        if removed.dupcount > 0 {
            removed.io.close()
        } else {
            Ok(())
        }
    }

    /// `dup`: looks up `old`, then binds it at `new_fd_hint`/`starting_fd`.
    pub fn dup(&self, old: i32, desired_fd: i32, starting_fd: i32) -> Result<i32, KernelStatus> {
        let io = self.lookup(old).ok_or(KernelStatus::BadHandle)?;
        self.bind(io, desired_fd, starting_fd)
    }

    /// Reads `fd`'s per-descriptor flags (`FD_CLOEXEC`).
    pub fn fd_flags(&self, fd: i32) -> Result<FdFlags, KernelStatus> {
        let idx = Self::valid_index(fd)?;
        let inner = self.inner.lock();
        let slot = inner.slots[idx].as_ref().ok_or(KernelStatus::BadHandle)?;
        Ok(slot.fd_flags)
    }

    /// Overwrites `fd`'s per-descriptor flags.
    pub fn set_fd_flags(&self, fd: i32, flags: FdFlags) -> Result<(), KernelStatus> {
        let idx = Self::valid_index(fd)?;
        let mut inner = self.inner.lock();
        let slot = inner.slots[idx].as_mut().ok_or(KernelStatus::BadHandle)?;
        slot.fd_flags = flags;
        Ok(())
    }

    /// Number of slots pointing at `io` right now — the observable `dupcount` (spec §8 invariant
    /// 2), used by tests and by `fstat`-style introspection.
    pub fn dupcount_of(&self, io: &IoObject) -> u32 {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .filter(|slot| slot.io.ptr_eq(io))
            .count() as u32
    }

    fn valid_index(fd: i32) -> Result<usize, KernelStatus> {
        if fd < 0 || fd as usize >= MAX_FD {
            return Err(KernelStatus::BadHandle);
        }
        Ok(fd as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::IoFlags;
    use crate::io_object::Transport;
    use crate::transports::null::NullTransport;
    use std::sync::Arc;

    fn null_io() -> IoObject {
        IoObject::new(Arc::new(NullTransport), Transport::Null, IoFlags::empty())
    }

    #[test]
    fn bind_lowest_free_slot() {
        let table = FdTable::new();
        let a = table.bind(null_io(), -1, 0).unwrap();
        let b = table.bind(null_io(), -1, 0).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn bind_desired_fd_out_of_range() {
        let table = FdTable::new();
        let err = table.bind(null_io(), MAX_FD as i32, 0).unwrap_err();
        assert_eq!(err, KernelStatus::InvalidArgs);
    }

    #[test]
    fn bind_with_no_free_slot_is_no_free_slots() {
        let table = FdTable::new();
        for _ in 0..MAX_FD {
            table.bind(null_io(), -1, 0).unwrap();
        }
        let err = table.bind(null_io(), -1, 0).unwrap_err();
        assert_eq!(err, KernelStatus::NoFreeSlots);
    }

    #[test]
    fn close_clears_slot() {
        let table = FdTable::new();
        let fd = table.bind(null_io(), -1, 0).unwrap();
        table.close(fd).unwrap();
        assert!(table.lookup(fd).is_none());
    }

    #[test]
    fn dup_shares_the_same_io_object() {
        let table = FdTable::new();
        let a = table.bind(null_io(), -1, 0).unwrap();
        let b = table.dup(a, -1, 0).unwrap();
        let io_a = table.lookup(a).unwrap();
        let io_b = table.lookup(b).unwrap();
        assert!(io_a.ptr_eq(&io_b));
    }

    #[test]
    fn unbind_fails_while_dupped() {
        let table = FdTable::new();
        let a = table.bind(null_io(), -1, 0).unwrap();
        let _b = table.dup(a, -1, 0).unwrap();
        assert_eq!(table.unbind(a).unwrap_err(), KernelStatus::NoResources);
    }

    #[test]
    fn fd_flags_default_empty_and_are_not_shared_across_dup() {
        let table = FdTable::new();
        let a = table.bind(null_io(), -1, 0).unwrap();
        table.set_fd_flags(a, FdFlags::CLOEXEC).unwrap();
        let b = table.dup(a, -1, 0).unwrap();
        assert_eq!(table.fd_flags(a).unwrap(), FdFlags::CLOEXEC);
        assert_eq!(table.fd_flags(b).unwrap(), FdFlags::empty());
    }

    #[test]
    fn unbind_fails_while_a_lookup_reference_is_outstanding() {
        let table = FdTable::new();
        let a = table.bind(null_io(), -1, 0).unwrap();
        let held = table.lookup(a).unwrap();
        assert_eq!(table.unbind(a).unwrap_err(), KernelStatus::NoResources);
        drop(held);
        assert!(table.unbind(a).is_ok());
    }
}
