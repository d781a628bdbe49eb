//! The POSIX call surface (spec §4.5/§4.6), built atop [`crate::fd_table::FdTable`],
//! [`crate::path_router::PathRouter`], and [`crate::wait_mux::WaitMux`].
//!
//! Every public method here takes the POSIX-conventional shape: success is a non-negative value,
//! failure is `-1`/`None` with `errno` set via [`crate::errno::fail`]. Internally everything is
//! plumbed through `Result<_, KernelStatus>` and translated exactly once, at the boundary.

use std::io::{IoSlice, IoSliceMut};
use std::time::Duration;

use crate::context::Context;
use crate::cwd::CwdTracker;
use crate::dir_stream::{DirStream, Dirent};
use crate::errno::{fail, KernelStatus};
use crate::fd_table::AT_FDCWD;
use crate::flags::{FdFlags, IoFlags};
use crate::io_object::{IoObject, IoTransport, MiscOp, Transport};
use crate::kernel::{WaitItem, WaitTimeout};
use crate::open_flags::OpenFlags;
use crate::path_router::PathRouter;
use crate::poll_events::PollEvents;
use crate::transports::null::NullTransport;
use crate::transports::pipe;
use crate::transports::socket;
use crate::wait_mux::WaitMux;

/// Maximum fds accepted by one `poll` call.
pub const MAX_POLL_NFDS: usize = 1024;

/// `fcntl` command selector (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcntlCmd {
    /// `F_DUPFD` — dup at or above `arg`.
    DupFd(i32),
    /// `F_DUPFD_CLOEXEC` — like `DupFd`, plus sets `FD_CLOEXEC` on the result.
    DupFdCloexec(i32),
    /// `F_GETFD`.
    GetFd,
    /// `F_SETFD`.
    SetFd(FdFlags),
    /// `F_GETFL`.
    GetFl,
    /// `F_SETFL`.
    SetFl(IoFlags),
    /// `F_GETOWN`/`F_SETOWN`/`F_GETLK`/`F_SETLK`/`F_SETLKW` — none implemented (spec §4.5).
    Unimplemented,
}

/// The populated subset of `struct stat` this crate can produce from a `vnattr` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixStat {
    pub mode: u32,
    pub ino: u64,
    pub size: u64,
    pub nlink: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub ctime_sec: i64,
    pub ctime_nsec: i64,
}

fn parse_vnattr(buf: &[u8]) -> Result<PosixStat, KernelStatus> {
    if buf.len() < 40 {
        return Err(KernelStatus::InvalidArgs);
    }
    let mode = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let ino = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let size = u64::from_le_bytes(buf[16..24].try_into().unwrap());
    let nlink = u64::from_le_bytes(buf[24..32].try_into().unwrap());
    let create_ns = u64::from_le_bytes(buf[32..40].try_into().unwrap());
    let modify_ns = if buf.len() >= 48 {
        u64::from_le_bytes(buf[40..48].try_into().unwrap())
    } else {
        create_ns
    };
    Ok(PosixStat {
        mode,
        ino,
        size,
        nlink,
        mtime_sec: (modify_ns / 1_000_000_000) as i64,
        mtime_nsec: (modify_ns % 1_000_000_000) as i64,
        ctime_sec: (create_ns / 1_000_000_000) as i64,
        ctime_nsec: (create_ns % 1_000_000_000) as i64,
    })
}

/// An in-flight timestamp update for `utimensat`/`futimens`: either leave it alone, set it to
/// "now", or set it to a literal value.
#[derive(Debug, Clone, Copy)]
pub enum TimeUpdate {
    /// `UTIME_OMIT`.
    Omit,
    /// `UTIME_NOW`.
    Now,
    /// A literal `(sec, nsec)` pair.
    Literal(i64, i64),
}

/// The POSIX operation surface, bound to one [`Context`].
pub struct PosixOps<'a> {
    ctx: &'a Context,
}

impl<'a> PosixOps<'a> {
    /// Binds the operation surface to `ctx`.
    pub fn new(ctx: &'a Context) -> Self {
        PosixOps { ctx }
    }

    /// The process root, or a `Null` stand-in if none has been installed yet (pre-startup, or a
    /// minimal test `Context`) — `PathRouter` always needs *some* base to hand back for absolute
    /// paths; a lookup against it then fails downstream at the actual `open`, which is the right
    /// place for that error to surface.
    fn root_or_null(&self) -> IoObject {
        self.ctx
            .root()
            .unwrap_or_else(|| IoObject::new(std::sync::Arc::new(NullTransport), Transport::Null, IoFlags::empty()))
    }

    fn resolve(&self, dirfd: i32, path: &str) -> Result<(IoObject, String), KernelStatus> {
        let root = self.root_or_null();
        PathRouter::new(&root, &self.ctx.cwd, &self.ctx.fds).resolve(dirfd, path)
    }

    fn resolve_containing_dir(&self, dirfd: i32, path: &str) -> Result<(IoObject, String), KernelStatus> {
        let root = self.root_or_null();
        PathRouter::new(&root, &self.ctx.cwd, &self.ctx.fds).resolve_containing_dir(dirfd, path)
    }

    fn resolve_two_path(
        &self,
        old_dirfd: i32,
        old_path: &str,
        new_dirfd: i32,
        new_path: &str,
    ) -> Result<(IoObject, IoObject, Vec<u8>), KernelStatus> {
        let root = self.root_or_null();
        PathRouter::new(&root, &self.ctx.cwd, &self.ctx.fds).resolve_two_path(old_dirfd, old_path, new_dirfd, new_path)
    }

    fn lookup(&self, fd: i32) -> Result<IoObject, KernelStatus> {
        self.ctx.fds.lookup(fd).ok_or(KernelStatus::BadHandle)
    }

    /// Retries a transport op that returned `ShouldWait` by blocking in `WaitMux` until `events`,
    /// unless the object is `NONBLOCK` (spec §4.5 steps 3-4).
    fn retry_on_should_wait<F>(&self, io: &IoObject, events: PollEvents, mut op: F) -> Result<usize, KernelStatus>
    where
        F: FnMut() -> Result<usize, KernelStatus>,
    {
        loop {
            match op() {
                Err(KernelStatus::ShouldWait) if !io.is_nonblocking() => {
                    let mux = WaitMux::new(self.ctx.kernel());
                    mux.wait_fd(io, events, None)?;
                }
                other => return other,
            }
        }
    }

    // ---- read / write family --------------------------------------------------------------

    /// `read(fd, buf)`.
    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            self.retry_on_should_wait(&io, PollEvents::POLLIN, || io.transport().read(buf))
        })
    }

    /// `write(fd, buf)`.
    pub fn write(&self, fd: i32, buf: &[u8]) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            self.retry_on_should_wait(&io, PollEvents::POLLOUT, || io.transport().write(buf))
        })
    }

    /// `pread(fd, buf, offset)`.
    pub fn pread(&self, fd: i32, buf: &mut [u8], offset: u64) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            self.retry_on_should_wait(&io, PollEvents::POLLIN, || io.transport().read_at(buf, offset))
        })
    }

    /// `pwrite(fd, buf, offset)`.
    pub fn pwrite(&self, fd: i32, buf: &[u8], offset: u64) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            self.retry_on_should_wait(&io, PollEvents::POLLOUT, || io.transport().write_at(buf, offset))
        })
    }

    /// `readv(fd, iov)`. Stops at the first short read or error; a short read is treated as
    /// end-of-data, not failure (spec §4.5).
    pub fn readv(&self, fd: i32, iov: &mut [IoSliceMut<'_>]) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            let mut total = 0usize;
            for slice in iov.iter_mut() {
                if slice.is_empty() {
                    continue;
                }
                let n = self.retry_on_should_wait(&io, PollEvents::POLLIN, || io.transport().read(slice))?;
                total += n;
                if n < slice.len() {
                    break;
                }
            }
            Ok(total)
        })
    }

    /// `writev(fd, iov)`.
    pub fn writev(&self, fd: i32, iov: &[IoSlice<'_>]) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            let mut total = 0usize;
            for slice in iov.iter() {
                if slice.is_empty() {
                    continue;
                }
                let n = self.retry_on_should_wait(&io, PollEvents::POLLOUT, || io.transport().write(slice))?;
                total += n;
                if n < slice.len() {
                    break;
                }
            }
            Ok(total)
        })
    }

    /// `preadv(fd, iov, offset)`. `offset` advances by each entry's length, not by bytes
    /// actually read, matching `preadv(2)`'s fixed per-entry addressing.
    pub fn preadv(&self, fd: i32, iov: &mut [IoSliceMut<'_>], offset: u64) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            let mut total = 0usize;
            let mut pos = offset;
            for slice in iov.iter_mut() {
                if slice.is_empty() {
                    continue;
                }
                let n = self.retry_on_should_wait(&io, PollEvents::POLLIN, || io.transport().read_at(slice, pos))?;
                total += n;
                pos += slice.len() as u64;
                if n < slice.len() {
                    break;
                }
            }
            Ok(total)
        })
    }

    /// `pwritev(fd, iov, offset)`.
    pub fn pwritev(&self, fd: i32, iov: &[IoSlice<'_>], offset: u64) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            let mut total = 0usize;
            let mut pos = offset;
            for slice in iov.iter() {
                if slice.is_empty() {
                    continue;
                }
                let n = self.retry_on_should_wait(&io, PollEvents::POLLOUT, || io.transport().write_at(slice, pos))?;
                total += n;
                pos += slice.len() as u64;
                if n < slice.len() {
                    break;
                }
            }
            Ok(total)
        })
    }

    // ---- open / close / dup family --------------------------------------------------------

    /// `open(path, flags, mode)`, equivalent to `openat(AT_FDCWD, ...)`.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<i32, isize> {
        self.openat(AT_FDCWD, path, flags, mode)
    }

    /// `openat(dirfd, path, flags, mode)`.
    pub fn openat(&self, dirfd: i32, path: &str, flags: OpenFlags, mode: u32) -> Result<i32, isize> {
        self.posix(|| {
            if flags.creates() && flags.wants_directory() {
                return Err(KernelStatus::InvalidArgs);
            }
            let masked_mode = if flags.creates() { self.ctx.apply_umask(mode) } else { mode };
            let (base, residual) = self.resolve(dirfd, path)?;
            let transport = base.transport().open(&residual, flags, masked_mode)?;
            let mut io_flags = IoFlags::empty();
            if flags.nonblocking() {
                io_flags |= IoFlags::NONBLOCK;
            }
            let io = IoObject::new(transport, Transport::Remote, io_flags);
            let fd = self.ctx.fds.bind(io, -1, 0)?;
            Ok(fd as usize)
        })
        .map(|fd| fd as i32)
    }

    /// `close(fd)`.
    pub fn close(&self, fd: i32) -> Result<(), isize> {
        self.posix(|| self.ctx.fds.close(fd).map(|_| 0usize)).map(drop)
    }

    /// `dup(oldfd)`.
    pub fn dup(&self, oldfd: i32) -> Result<i32, isize> {
        self.posix(|| self.ctx.fds.dup(oldfd, -1, 0).map(|fd| fd as usize)).map(|fd| fd as i32)
    }

    /// `dup2(oldfd, newfd)`: a no-op returning `newfd` when `oldfd == newfd` and `oldfd` is
    /// valid, matching `dup2(2)`'s same-fd special case (distinct from `dup3`, which rejects it).
    pub fn dup2(&self, oldfd: i32, newfd: i32) -> Result<i32, isize> {
        self.posix(|| {
            if oldfd == newfd {
                self.lookup(oldfd)?;
                return Ok(newfd as usize);
            }
            self.ctx.fds.dup(oldfd, newfd, 0).map(|fd| fd as usize)
        })
        .map(|fd| fd as i32)
    }

    /// `dup3(oldfd, newfd, flags)`: `oldfd == newfd` is always `EINVAL` (spec §7).
    pub fn dup3(&self, oldfd: i32, newfd: i32, cloexec: bool) -> Result<i32, isize> {
        self.posix(|| {
            if oldfd == newfd {
                return Err(KernelStatus::InvalidArgs);
            }
            let fd = self.ctx.fds.dup(oldfd, newfd, 0)?;
            if cloexec {
                self.ctx.fds.set_fd_flags(fd, FdFlags::CLOEXEC)?;
            }
            Ok(fd as usize)
        })
        .map(|fd| fd as i32)
    }

    /// `fcntl(fd, cmd)`.
    pub fn fcntl(&self, fd: i32, cmd: FcntlCmd) -> Result<i32, isize> {
        self.posix(|| match cmd {
            FcntlCmd::DupFd(starting) => self.ctx.fds.dup(fd, -1, starting).map(|r| r as usize),
            FcntlCmd::DupFdCloexec(starting) => {
                let new_fd = self.ctx.fds.dup(fd, -1, starting)?;
                self.ctx.fds.set_fd_flags(new_fd, FdFlags::CLOEXEC)?;
                Ok(new_fd as usize)
            }
            FcntlCmd::GetFd => self.ctx.fds.fd_flags(fd).map(|f| f.bits() as usize),
            FcntlCmd::SetFd(flags) => self.ctx.fds.set_fd_flags(fd, flags).map(|_| 0usize),
            FcntlCmd::GetFl => {
                let io = self.lookup(fd)?;
                Ok(if io.is_nonblocking() { libc::O_NONBLOCK as usize } else { 0 })
            }
            FcntlCmd::SetFl(flags) => {
                let io = self.lookup(fd)?;
                io.set_flags(flags);
                Ok(0)
            }
            FcntlCmd::Unimplemented => Err(KernelStatus::NotImplemented),
        })
        .map(|v| v as i32)
    }

    /// `lseek(fd, offset, whence)`.
    pub fn lseek(&self, fd: i32, offset: i64, whence: i32) -> Result<u64, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            io.transport().seek(offset, whence).map(|o| o as usize)
        })
        .map(|o| o as u64)
    }

    // ---- stat family ------------------------------------------------------------------------

    fn stat_io(&self, io: &IoObject) -> Result<PosixStat, KernelStatus> {
        let mut buf = [0u8; 48];
        let result = io.transport().misc(MiscOp::Stat, 0, &[], &mut buf)?;
        parse_vnattr(&buf[..result.len])
    }

    /// `fstat(fd)`.
    pub fn fstat(&self, fd: i32) -> Result<PosixStat, isize> {
        self.posix_val(|| {
            let io = self.lookup(fd)?;
            self.stat_io(&io)
        })
    }

    /// `stat(path)`, equivalent to `fstatat(AT_FDCWD, path, 0)`.
    pub fn stat(&self, path: &str) -> Result<PosixStat, isize> {
        self.fstatat(AT_FDCWD, path)
    }

    /// `fstatat(dirfd, path)`.
    pub fn fstatat(&self, dirfd: i32, path: &str) -> Result<PosixStat, isize> {
        self.posix_val(|| {
            let (base, residual) = self.resolve(dirfd, path)?;
            let transport = base.transport().open(&residual, OpenFlags(libc::O_RDONLY), 0)?;
            let io = IoObject::new(transport, Transport::Remote, IoFlags::empty());
            let result = self.stat_io(&io);
            let _ = io.close();
            result
        })
    }

    /// `faccessat(dirfd, path, amode)`: existence check only (spec §4.5/Non-goal).
    pub fn faccessat(&self, dirfd: i32, path: &str, amode: crate::access_flags::AccessFlags) -> Result<(), isize> {
        self.posix(|| {
            use crate::access_flags::AccessFlags;
            let known = AccessFlags::F_OK | AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK;
            if !known.contains(amode) {
                return Err(KernelStatus::InvalidArgs);
            }
            let (base, residual) = self.resolve(dirfd, path)?;
            let transport = base.transport().open(&residual, OpenFlags(libc::O_RDONLY), 0)?;
            let io = IoObject::new(transport, Transport::Remote, IoFlags::empty());
            let _ = io.close();
            Ok(0)
        })
        .map(drop)
    }

    // ---- unlink / rename / link --------------------------------------------------------------

    /// `unlink(path)`, equivalent to `unlinkat(AT_FDCWD, path)`.
    pub fn unlink(&self, path: &str) -> Result<(), isize> {
        self.unlinkat(AT_FDCWD, path)
    }

    /// `unlinkat(dirfd, path)`.
    pub fn unlinkat(&self, dirfd: i32, path: &str) -> Result<(), isize> {
        self.posix(|| {
            let (dir, leaf) = self.resolve_containing_dir(dirfd, path)?;
            let mut in_buf = leaf.into_bytes();
            in_buf.push(0);
            dir.transport().misc(MiscOp::Unlink, 0, &in_buf, &mut []).map(|_| 0usize)
        })
        .map(drop)
    }

    /// `rename(old, new)`.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), isize> {
        self.two_path_op(AT_FDCWD, old_path, AT_FDCWD, new_path, false)
    }

    /// `link(old, new)`.
    pub fn link(&self, old_path: &str, new_path: &str) -> Result<(), isize> {
        self.two_path_op(AT_FDCWD, old_path, AT_FDCWD, new_path, true)
    }

    fn two_path_op(&self, old_dirfd: i32, old_path: &str, new_dirfd: i32, new_path: &str, is_link: bool) -> Result<(), isize> {
        self.posix(|| {
            let (old_base, new_base, packed) = self.resolve_two_path(old_dirfd, old_path, new_dirfd, new_path)?;
            if !old_base.ptr_eq(&new_base) {
                // The vtable's `misc` has no way to name a second directory (see
                // `RemoteTransport`'s doc comment); cross-directory rename/link isn't supported.
                return Err(KernelStatus::NotSupported);
            }
            old_base
                .transport()
                .misc(MiscOp::Rename, u64::from(is_link), &packed, &mut [])
                .map(|_| 0usize)
        })
        .map(drop)
    }

    /// `truncate(path, length)`.
    pub fn truncate(&self, path: &str, length: u64) -> Result<(), isize> {
        self.posix(|| {
            let (base, residual) = self.resolve(AT_FDCWD, path)?;
            let transport = base.transport().open(&residual, OpenFlags(libc::O_WRONLY), 0)?;
            let io = IoObject::new(transport, Transport::Remote, IoFlags::empty());
            let result = io.transport().misc(MiscOp::Truncate, length, &[], &mut []).map(|_| 0usize);
            let _ = io.close();
            result
        })
        .map(drop)
    }

    /// `ftruncate(fd, length)`.
    pub fn ftruncate(&self, fd: i32, length: u64) -> Result<(), isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            io.transport().misc(MiscOp::Truncate, length, &[], &mut []).map(|_| 0usize)
        })
        .map(drop)
    }

    // ---- directory creation -------------------------------------------------------------------

    /// `mkdir(path, mode)`, equivalent to `mkdirat(AT_FDCWD, ...)`.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<(), isize> {
        self.mkdirat(AT_FDCWD, path, mode)
    }

    /// `mkdirat(dirfd, path, mode)`: opens with `O_CREAT|O_EXCL|O_RDWR`, mode masked to
    /// `0777 | S_IFDIR` (spec §4.5).
    pub fn mkdirat(&self, dirfd: i32, path: &str, mode: u32) -> Result<(), isize> {
        self.posix(|| {
            let (base, residual) = self.resolve(dirfd, path)?;
            let masked = self.ctx.apply_umask(mode & 0o777) | (libc::S_IFDIR as u32);
            let transport = base
                .transport()
                .open(&residual, OpenFlags(libc::O_CREAT | libc::O_EXCL | libc::O_RDWR), masked)?;
            let _ = transport.close();
            Ok(0usize)
        })
        .map(drop)
    }

    // ---- timestamps -----------------------------------------------------------------------

    /// `utimensat(dirfd, path, mtime)`: only `mtime` is honored (spec §4.5 — `atime` is not
    /// implemented); `AT_SYMLINK_NOFOLLOW` always fails with `EINVAL` since symlinks don't exist
    /// in this model.
    pub fn utimensat(&self, dirfd: i32, path: &str, mtime: TimeUpdate, nofollow: bool) -> Result<(), isize> {
        self.posix(|| {
            if nofollow {
                return Err(KernelStatus::InvalidArgs);
            }
            let (base, residual) = self.resolve(dirfd, path)?;
            let transport = base.transport().open(&residual, OpenFlags(libc::O_RDONLY), 0)?;
            let io = IoObject::new(transport, Transport::Remote, IoFlags::empty());
            let result = self.apply_mtime(&io, mtime);
            let _ = io.close();
            result
        })
        .map(drop)
    }

    /// `futimens(fd, mtime)`. Spec §9 Open Question: the original skips the null check on the fd
    /// lookup; this implementation returns `EBADF` instead, as the Open Question resolves it.
    pub fn futimens(&self, fd: i32, mtime: TimeUpdate) -> Result<(), isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            self.apply_mtime(&io, mtime)
        })
        .map(drop)
    }

    fn apply_mtime(&self, io: &IoObject, mtime: TimeUpdate) -> Result<usize, KernelStatus> {
        let nanos = match mtime {
            TimeUpdate::Omit => return Ok(0),
            TimeUpdate::Now => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            TimeUpdate::Literal(sec, nsec) => (sec.max(0) as u64) * 1_000_000_000 + nsec.max(0) as u64,
        };
        let in_buf = nanos.to_le_bytes();
        io.transport().misc(MiscOp::SetAttr, 0, &in_buf, &mut []).map(|_| 0)
    }

    // ---- sync ------------------------------------------------------------------------------

    /// `fsync(fd)`.
    pub fn fsync(&self, fd: i32) -> Result<(), isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            io.transport().misc(MiscOp::Sync, 0, &[], &mut []).map(|_| 0usize)
        })
        .map(drop)
    }

    /// `fdatasync(fd)`, aliased to [`Self::fsync`] (spec §6).
    pub fn fdatasync(&self, fd: i32) -> Result<(), isize> {
        self.fsync(fd)
    }

    // ---- pipe / socket ----------------------------------------------------------------------

    /// `pipe()`, equivalent to `pipe2(0)`.
    pub fn pipe(&self) -> Result<(i32, i32), isize> {
        self.pipe2(false)
    }

    /// `pipe2(flags)`.
    pub fn pipe2(&self, nonblock: bool) -> Result<(i32, i32), isize> {
        self.posix_val(|| {
            let (read_end, write_end) = pipe::create_pipe()?;
            if nonblock {
                read_end.set_flags(IoFlags::NONBLOCK);
                write_end.set_flags(IoFlags::NONBLOCK);
            }
            let rfd = self.ctx.fds.bind(read_end, -1, 0)?;
            let wfd = self.ctx.fds.bind(write_end, -1, 0)?;
            Ok((rfd, wfd))
        })
    }

    /// Creates a connected `AF_UNIX` socket pair, bound into the fd table; a convenience beyond
    /// the named POSIX surface, grounded on `socketpair(2)`.
    pub fn socketpair(&self) -> Result<(i32, i32), isize> {
        self.posix_val(|| {
            let (a, b) = socket::create_socketpair()?;
            let afd = self.ctx.fds.bind(a, -1, 0)?;
            let bfd = self.ctx.fds.bind(b, -1, 0)?;
            Ok((afd, bfd))
        })
    }

    // ---- poll / select ----------------------------------------------------------------------

    /// `poll(fds, timeout_ms)`. Negative fds are left untouched (`revents` stays empty), matching
    /// `poll(2)`. Returns the number of fds with non-zero `revents`.
    pub fn poll(&self, fds: &mut [(i32, PollEvents, PollEvents)], timeout_ms: i32) -> Result<i32, isize> {
        self.poll_inner(fds, timeout_ms).map_err(fail)
    }

    /// The literal spec §4.6 `poll` algorithm: aborts the whole call with `InvalidArgs` if any
    /// fd's transport has nothing waitable, rather than `WaitMux::poll_many`'s more lenient
    /// short-circuit-to-ready-for-nothing behavior.
    fn poll_inner(&self, fds: &mut [(i32, PollEvents, PollEvents)], timeout_ms: i32) -> Result<i32, KernelStatus> {
        if fds.len() > MAX_POLL_NFDS {
            return Err(KernelStatus::InvalidArgs);
        }
        let mut held: Vec<Option<IoObject>> = Vec::with_capacity(fds.len());
        let mut items: Vec<WaitItem> = Vec::new();
        let mut item_for_index: Vec<Option<usize>> = vec![None; fds.len()];

        for (i, (fd, events, revents)) in fds.iter_mut().enumerate() {
            *revents = PollEvents::empty();
            if *fd < 0 {
                held.push(None);
                continue;
            }
            match self.ctx.fds.lookup(*fd) {
                None => {
                    *revents = PollEvents::POLLNVAL;
                    held.push(None);
                }
                Some(io) => {
                    let (handle, kernel_events) = io.transport().wait_begin(*events);
                    if handle.is_invalid() {
                        return Err(KernelStatus::InvalidArgs);
                    }
                    item_for_index[i] = Some(items.len());
                    items.push(WaitItem { handle, events: kernel_events });
                    held.push(Some(io));
                }
            }
        }

        let timeout: WaitTimeout = WaitMux::timeout_from_millis(timeout_ms);
        let results = if items.is_empty() {
            Vec::new()
        } else {
            match self.ctx.kernel().multi_wait(&items, timeout) {
                Ok(r) => r,
                Err(KernelStatus::TimedOut) => vec![PollEvents::empty(); items.len()],
                Err(status) => return Err(status),
            }
        };

        let mut ready = 0i32;
        for (i, (_, events, revents)) in fds.iter_mut().enumerate() {
            if *revents == PollEvents::POLLNVAL {
                ready += 1;
                continue;
            }
            if let Some(slot) = item_for_index[i] {
                let io = held[i].as_ref().unwrap();
                let observed = io.transport().wait_end(results[slot]);
                let mask = observed & (*events | PollEvents::POLLHUP | PollEvents::POLLERR);
                *revents = mask;
                if !mask.is_empty() {
                    ready += 1;
                }
            }
        }
        Ok(ready)
    }

    /// `select(nfds, readfds, writefds, errfds, timeout)`. Each set is a list of candidate fds;
    /// returns the subset of each that's actually ready, or an error if any listed fd is invalid.
    pub fn select(
        &self,
        read_fds: &[i32],
        write_fds: &[i32],
        err_fds: &[i32],
        timeout: Option<Duration>,
    ) -> Result<(Vec<i32>, Vec<i32>, Vec<i32>), isize> {
        self.posix_val(|| {
            use std::collections::HashMap;
            let mut wanted: HashMap<i32, PollEvents> = HashMap::new();
            for &fd in read_fds {
                *wanted.entry(fd).or_insert_with(PollEvents::empty) |= PollEvents::POLLIN;
            }
            for &fd in write_fds {
                *wanted.entry(fd).or_insert_with(PollEvents::empty) |= PollEvents::POLLOUT;
            }
            for &fd in err_fds {
                *wanted.entry(fd).or_insert_with(PollEvents::empty) |= PollEvents::POLLERR;
            }

            let mut pairs: Vec<(i32, PollEvents, PollEvents)> =
                wanted.into_iter().map(|(fd, ev)| (fd, ev, PollEvents::empty())).collect();
            for (fd, _, _) in &pairs {
                if self.ctx.fds.lookup(*fd).is_none() {
                    return Err(KernelStatus::BadHandle);
                }
            }

            let timeout_ms = match timeout {
                None => -1,
                Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            };
            self.poll_inner(&mut pairs, timeout_ms)?;

            let mut ready_r = Vec::new();
            let mut ready_w = Vec::new();
            let mut ready_e = Vec::new();
            for (fd, _, revents) in &pairs {
                if revents.contains(PollEvents::POLLIN) && read_fds.contains(fd) {
                    ready_r.push(*fd);
                }
                if revents.contains(PollEvents::POLLOUT) && write_fds.contains(fd) {
                    ready_w.push(*fd);
                }
                if revents.contains(PollEvents::POLLERR) && err_fds.contains(fd) {
                    ready_e.push(*fd);
                }
            }
            Ok((ready_r, ready_w, ready_e))
        })
    }

    // ---- ioctl ------------------------------------------------------------------------------

    /// `ioctl(fd, op, in_buf, out_buf)`.
    pub fn ioctl(&self, fd: i32, op: u32, in_buf: &[u8], out_buf: &mut [u8]) -> Result<usize, isize> {
        self.posix(|| {
            let io = self.lookup(fd)?;
            io.transport().ioctl(op, in_buf, out_buf)
        })
    }

    // ---- directory streams --------------------------------------------------------------------

    /// `opendir(path)`.
    pub fn opendir(&self, path: &str) -> Result<DirStream, isize> {
        self.posix_val(|| {
            let (base, residual) = self.resolve(AT_FDCWD, path)?;
            let transport = base
                .transport()
                .open(&residual, OpenFlags(libc::O_DIRECTORY | libc::O_RDONLY), 0)?;
            Ok(DirStream::new(IoObject::new(transport, Transport::Remote, IoFlags::empty())))
        })
    }

    /// `fdopendir(fd)`.
    pub fn fdopendir(&self, fd: i32) -> Result<DirStream, isize> {
        self.posix_val(|| {
            let io = self.lookup(fd)?;
            Ok(DirStream::new(io))
        })
    }

    /// `readdir(dir)`.
    pub fn readdir(&self, dir: &DirStream) -> Result<Option<Dirent>, isize> {
        self.posix_val(|| dir.readdir())
    }

    /// `rewinddir(dir)`.
    pub fn rewinddir(&self, dir: &DirStream) {
        dir.rewind();
    }

    // ---- misc -------------------------------------------------------------------------------

    /// `isatty(fd)`: `true` for 0/1/2 if bound, `false` with `ENOTTY` otherwise (spec §4.5 design
    /// placeholder — there's no terminal capability in this model yet).
    pub fn isatty(&self, fd: i32) -> bool {
        if (0..3).contains(&fd) && self.ctx.fds.lookup(fd).is_some() {
            true
        } else {
            crate::errno::Errno::from_i32(libc::ENOTTY).set_errno();
            false
        }
    }

    /// `umask(mask)`.
    pub fn umask(&self, mask: u32) -> u32 {
        self.ctx.set_umask(mask)
    }

    /// `chdir(path)`.
    pub fn chdir(&self, path: &str) -> Result<(), isize> {
        self.posix(|| {
            let (base, residual) = self.resolve(AT_FDCWD, path)?;
            let transport = base.transport().open(&residual, CwdTracker::DIRECTORY_OPEN_FLAGS, 0)?;
            let io = IoObject::new(transport, Transport::Remote, IoFlags::empty());
            self.ctx.cwd.chdir(io, path)?;
            Ok(0usize)
        })
        .map(drop)
    }

    /// `getcwd(buf)`.
    pub fn getcwd(&self, buf: &mut [u8]) -> Result<usize, isize> {
        self.posix(|| self.ctx.cwd.getcwd(buf))
    }

    // ---- supplemented (SPEC_FULL.md §B): clone_fd / transfer_fd -----------------------------

    /// Duplicates `fd`'s `IoObject` reference without going through the fd table — a building
    /// block for handing a copy of a handle to another process. Non-POSIX; returns the raw
    /// `KernelStatus` rather than an errno-style result.
    pub fn clone_fd(&self, fd: i32) -> Result<IoObject, KernelStatus> {
        self.ctx.fds.lookup(fd).ok_or(KernelStatus::BadHandle)
    }

    /// Removes `fd` from the table entirely and hands the caller the sole remaining reference,
    /// for transferring ownership elsewhere (e.g. to another process). Fails with
    /// `KernelStatus::NoResources` if the fd is shared (dup'd) or has an outstanding transient
    /// reference — see [`crate::fd_table::FdTable::unbind`].
    pub fn transfer_fd(&self, fd: i32) -> Result<IoObject, KernelStatus> {
        self.ctx.fds.unbind(fd)
    }

    // ---- helpers ------------------------------------------------------------------------------

    fn posix(&self, f: impl FnOnce() -> Result<usize, KernelStatus>) -> Result<usize, isize> {
        f().map_err(fail)
    }

    fn posix_val<T>(&self, f: impl FnOnce() -> Result<T, KernelStatus>) -> Result<T, isize> {
        f().map_err(fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx_with_root(path: &std::path::Path) -> Context {
        let ctx = Context::new();
        let root = crate::transports::remote::RemoteTransport::open_path(
            path.to_str().unwrap(),
            OpenFlags(libc::O_DIRECTORY | libc::O_RDONLY),
            0,
        )
        .unwrap();
        ctx.set_root(IoObject::new(std::sync::Arc::new(root), Transport::Remote, IoFlags::empty()));
        ctx
    }

    #[test]
    fn pipe_echo_scenario() {
        // spec.md §8 end-to-end scenario 1.
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, w) = ops.pipe().unwrap();
        assert_eq!(ops.write(w, b"hi").unwrap(), 2);
        let mut buf = [0u8; 2];
        assert_eq!(ops.read(r, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn non_blocking_read_on_empty_pipe_is_eagain() {
        // spec.md §8 end-to-end scenario 4.
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        ops.fcntl(r, FcntlCmd::SetFl(IoFlags::NONBLOCK)).unwrap();
        let mut buf = [0u8; 2];
        let err = ops.read(r, &mut buf).unwrap_err();
        assert_eq!(err, -1);
    }

    #[test]
    fn open_create_and_directory_together_is_einval() {
        // spec.md §8 invariant 6.
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        let result = ops.openat(AT_FDCWD, "newdir", OpenFlags(libc::O_CREAT | libc::O_DIRECTORY), 0o644);
        assert!(result.is_err());
    }

    #[test]
    fn dup2_same_fd_is_a_no_op() {
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        assert_eq!(ops.dup2(r, r).unwrap(), r);
    }

    #[test]
    fn dup3_same_fd_is_einval() {
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        assert!(ops.dup3(r, r, false).is_err());
    }

    #[test]
    fn fcntl_unimplemented_command_is_enosys() {
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        assert!(ops.fcntl(r, FcntlCmd::Unimplemented).is_err());
        assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::ENOSYS));
    }

    #[test]
    fn close_then_dup_fails() {
        // spec.md §8 invariant 3 + scenario.
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        ops.close(r).unwrap();
        assert!(ops.dup(r).is_err());
    }

    #[test]
    fn mkdir_then_open_as_directory_round_trips() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        ops.mkdirat(AT_FDCWD, "sub", 0o755).unwrap();
        assert!(dir.path().join("sub").is_dir());
    }

    #[test]
    fn unlink_removes_file_via_posix_ops() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        let fd = ops.openat(AT_FDCWD, "f.txt", OpenFlags(libc::O_CREAT | libc::O_WRONLY), 0o644).unwrap();
        ops.close(fd).unwrap();
        ops.unlink("f.txt").unwrap();
        assert!(!dir.path().join("f.txt").exists());
    }

    #[test]
    fn rename_within_the_same_directory_succeeds() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        let fd = ops.openat(AT_FDCWD, "a.txt", OpenFlags(libc::O_CREAT | libc::O_WRONLY), 0o644).unwrap();
        ops.close(fd).unwrap();
        ops.rename("a.txt", "b.txt").unwrap();
        assert!(dir.path().join("b.txt").exists());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn fstat_reports_written_size() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        let fd = ops
            .openat(AT_FDCWD, "sized.txt", OpenFlags(libc::O_CREAT | libc::O_RDWR), 0o644)
            .unwrap();
        ops.write(fd, b"hello").unwrap();
        let stat = ops.fstat(fd).unwrap();
        assert_eq!(stat.size, 5);
    }

    #[test]
    fn poll_with_zero_timeout_on_an_empty_pipe_reports_zero_ready() {
        // spec.md §8 end-to-end scenario 5.
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        let mut fds = [(r, PollEvents::POLLIN, PollEvents::empty())];
        let ready = ops.poll(&mut fds, 0).unwrap();
        assert_eq!(ready, 0);
        assert!(fds[0].2.is_empty());
    }

    #[test]
    fn poll_reports_pollnval_for_a_closed_fd() {
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let mut fds = [(999, PollEvents::POLLIN, PollEvents::empty())];
        let ready = ops.poll(&mut fds, 0).unwrap();
        assert_eq!(ready, 1);
        assert_eq!(fds[0].2, PollEvents::POLLNVAL);
    }

    #[test]
    fn negative_fd_in_poll_set_is_left_untouched() {
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let mut fds = [(-1, PollEvents::POLLIN, PollEvents::empty())];
        let ready = ops.poll(&mut fds, 0).unwrap();
        assert_eq!(ready, 0);
        assert!(fds[0].2.is_empty());
    }

    #[test]
    fn transfer_fd_fails_while_dupped_then_succeeds_after_release() {
        // spec.md §8 end-to-end scenario 6.
        let ctx = Context::new();
        let ops = PosixOps::new(&ctx);
        let (r, _w) = ops.pipe().unwrap();
        let dup = ops.dup(r).unwrap();
        assert!(ops.transfer_fd(r).is_err());
        ops.close(dup).unwrap();
        assert!(ops.transfer_fd(r).is_ok());
    }

    #[test]
    fn readdir_surfaces_directory_entries() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with_root(dir.path());
        let ops = PosixOps::new(&ctx);
        let fd = ops.openat(AT_FDCWD, "e.txt", OpenFlags(libc::O_CREAT | libc::O_WRONLY), 0o644).unwrap();
        ops.close(fd).unwrap();
        let stream = ops.opendir(".").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = ops.readdir(&stream).unwrap() {
            names.push(entry.name);
        }
        assert!(names.contains(&"e.txt".to_string()));
    }
}
