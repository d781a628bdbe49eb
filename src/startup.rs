//! Parses the inherited-handle bundle a process is launched with into fdtab/root/cwd state
//! (spec §4.7).

use std::os::unix::io::{IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::context::Context;
use crate::cwd::CwdTracker;
use crate::errno::KernelStatus;
use crate::flags::IoFlags;
use crate::io_object::{IoObject, Transport};
use crate::transports::null::NullTransport;
use crate::transports::pipe::PipeTransport;
use crate::transports::remote::RemoteTransport;

/// Bit layout of a bundle entry's info word: `(type << 24) | (flags << 16) | arg`.
pub mod info {
    /// Becomes the process's root directory.
    pub const TYPE_ROOT: u8 = 1;
    /// Becomes the process's initial cwd.
    pub const TYPE_CWD: u8 = 2;
    /// A remote (RPC-channel-style) object, installed at `fdtab[arg]`.
    pub const TYPE_REMOTE: u8 = 3;
    /// One end of a pipe, installed at `fdtab[arg]`.
    pub const TYPE_PIPE: u8 = 4;
    /// A log sink, installed at `fdtab[arg]`.
    pub const TYPE_LOGGER: u8 = 5;

    /// This handle should be considered for stdio aliasing if fds 0-2 are left unbound.
    pub const FLAG_USE_FOR_STDIO: u8 = 1 << 0;

    pub(super) fn type_of(info: u32) -> u8 {
        ((info >> 24) & 0xFF) as u8
    }
    pub(super) fn flags_of(info: u32) -> u8 {
        ((info >> 16) & 0xFF) as u8
    }
    pub(super) fn arg_of(info: u32) -> u32 {
        info & 0xFFFF
    }
}

/// One entry of the inherited-handle bundle the process is launched with.
pub struct InheritedHandle {
    /// The raw handle/fd, owned by this entry until it's consumed by [`bootstrap`].
    pub fd: RawFd,
    /// The packed type/flags/arg word, per [`info`].
    pub info: u32,
}

impl InheritedHandle {
    /// Wraps an owned fd with the given info word (takes ownership of `fd`).
    pub fn new(fd: OwnedFd, info: u32) -> Self {
        InheritedHandle { fd: fd.into_raw_fd(), info }
    }
}

fn null_io() -> IoObject {
    IoObject::new(Arc::new(NullTransport), Transport::Null, IoFlags::empty())
}

/// Walks `handles` and installs root/cwd/fd-table state into `ctx`, per spec §4.7.
///
/// An explicit index-advancing loop, not a `for` over an iterator, because `REMOTE` entries can
/// consume a second ("twinned") entry when its info word repeats (spec §9 "Startup bundle").
pub fn bootstrap(ctx: &Context, handles: Vec<InheritedHandle>) -> Result<(), KernelStatus> {
    let mut stdio_source: Option<IoObject> = None;
    let mut i = 0usize;

    while i < handles.len() {
        let entry = &handles[i];
        let ty = info::type_of(entry.info);
        let flags = info::flags_of(entry.info);
        let arg = info::arg_of(entry.info);
        let fd = entry.fd;

        let installed: Option<IoObject> = match ty {
            info::TYPE_ROOT => {
                let io = IoObject::new(Arc::new(RemoteTransport::from_raw_fd(fd)), Transport::Remote, IoFlags::empty());
                ctx.set_root(io.clone());
                log::debug!("startup: installed root handle");
                i += 1;
                Some(io)
            }
            info::TYPE_CWD => {
                let io = IoObject::new(Arc::new(RemoteTransport::from_raw_fd(fd)), Transport::Remote, IoFlags::empty());
                ctx.cwd.set_io(io.clone());
                log::debug!("startup: installed cwd handle");
                i += 1;
                Some(io)
            }
            info::TYPE_REMOTE => {
                let io = IoObject::new(Arc::new(RemoteTransport::from_raw_fd(fd)), Transport::Remote, IoFlags::empty());
                if i + 1 < handles.len() && handles[i + 1].info == entry.info {
                    log::debug!("startup: consuming twinned signaling handle for fd {}", arg);
                    i += 2;
                } else {
                    i += 1;
                }
                ctx.fds.bind(io.clone(), arg as i32, arg as i32)?;
                log::debug!("startup: bound remote at fd {}", arg);
                Some(io)
            }
            info::TYPE_PIPE => {
                let owned = unsafe { <OwnedFd as std::os::unix::io::FromRawFd>::from_raw_fd(fd) };
                let io = IoObject::new(Arc::new(PipeTransport::from_owned(owned)?), Transport::Pipe, IoFlags::empty());
                ctx.fds.bind(io.clone(), arg as i32, arg as i32)?;
                log::debug!("startup: bound pipe at fd {}", arg);
                i += 1;
                Some(io)
            }
            info::TYPE_LOGGER => {
                let io = IoObject::new(
                    Arc::new(crate::transports::logger::LoggerTransport::new(
                        "startup",
                        crate::transports::logger::LogLevel::Info,
                    )),
                    Transport::Logger,
                    IoFlags::empty(),
                );
                // The raw fd carried no useful payload for a log sink; nothing backs it here so
                // there's nothing further to close besides the fd itself.
                let _ = unsafe { libc::close(fd) };
                ctx.fds.bind(io.clone(), arg as i32, arg as i32)?;
                log::debug!("startup: bound logger at fd {}", arg);
                i += 1;
                Some(io)
            }
            other => {
                log::warn!("startup: unclassified handle type {} left untouched", other);
                let _ = unsafe { libc::close(fd) };
                i += 1;
                None
            }
        };

        if let Some(io) = installed {
            if flags & info::FLAG_USE_FOR_STDIO != 0 && arg < crate::fd_table::MAX_FD as u32 {
                stdio_source = Some(io);
            }
        }
    }

    if let Ok(pwd) = std::env::var("PWD") {
        ctx.cwd.update(&pwd);
    }

    for fd in 0..3i32 {
        if ctx.fds.lookup(fd).is_some() {
            continue;
        }
        let io = match &stdio_source {
            Some(src) => src.clone(),
            None => null_io(),
        };
        ctx.fds.bind(io, fd, fd)?;
    }

    if ctx.cwd.io().is_none() {
        let opened = match ctx.root() {
            Some(root) => open_cwd_under_root(&root, &ctx.cwd),
            None => None,
        };
        ctx.cwd.set_io(opened.unwrap_or_else(null_io));
    }

    Ok(())
}

/// Registers a process-exit hook that walks [`Context::global`]'s fd table, clearing every slot
/// and closing the underlying transport once its dupcount drops to zero (spec §4.7, last step).
/// Only meaningful for processes that actually use the global context; callers managing their
/// own `Context` values tear them down explicitly instead.
pub fn register_atexit() {
    extern "C" fn cleanup() {
        let ctx = Context::global();
        for fd in 0..crate::fd_table::MAX_FD as i32 {
            let _ = ctx.fds.close(fd);
        }
    }
    unsafe {
        libc::atexit(cleanup);
    }
}

fn open_cwd_under_root(root: &IoObject, cwd: &CwdTracker) -> Option<IoObject> {
    let path = cwd.path();
    let relative = path.trim_start_matches('/');
    let relative = if relative.is_empty() { "." } else { relative };
    root.transport()
        .open(relative, CwdTracker::DIRECTORY_OPEN_FLAGS, 0)
        .map(|t| IoObject::new(t, Transport::Remote, IoFlags::empty()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pipe_pair() -> (OwnedFd, OwnedFd) {
        let (r, w) = nix::unistd::pipe().unwrap();
        (r, w)
    }

    fn pack_info(ty: u8, flags: u8, arg: u32) -> u32 {
        ((ty as u32) << 24) | ((flags as u32) << 16) | (arg & 0xFFFF)
    }

    #[test]
    fn unbound_stdio_falls_back_to_null_without_any_handles() {
        let ctx = Context::new();
        bootstrap(&ctx, Vec::new()).unwrap();
        for fd in 0..3 {
            let io = ctx.fds.lookup(fd).unwrap();
            assert_eq!(io.tag(), Transport::Null);
        }
    }

    #[test]
    fn cwd_falls_back_to_null_without_a_root_handle() {
        let ctx = Context::new();
        bootstrap(&ctx, Vec::new()).unwrap();
        let cwd_io = ctx.cwd.io().unwrap();
        assert_eq!(cwd_io.tag(), Transport::Null);
    }

    #[test]
    fn pipe_handle_is_installed_at_its_arg_fd() {
        let ctx = Context::new();
        let (_unused_read, write_half) = make_pipe_pair();
        let handle = InheritedHandle::new(write_half, pack_info(info::TYPE_PIPE, 0, 3));
        bootstrap(&ctx, vec![handle]).unwrap();
        let io = ctx.fds.lookup(3).unwrap();
        assert_eq!(io.tag(), Transport::Pipe);
    }

    #[test]
    fn use_for_stdio_flag_aliases_stdio_fds() {
        let ctx = Context::new();
        let (_unused_read, write_half) = make_pipe_pair();
        let handle = InheritedHandle::new(
            write_half,
            pack_info(info::TYPE_PIPE, info::FLAG_USE_FOR_STDIO, 3),
        );
        bootstrap(&ctx, vec![handle]).unwrap();
        let fd3 = ctx.fds.lookup(3).unwrap();
        let fd1 = ctx.fds.lookup(1).unwrap();
        assert!(fd3.ptr_eq(&fd1));
    }

    #[test]
    fn pwd_environment_variable_seeds_cwd_path() {
        std::env::set_var("PWD", "/tmp/example");
        let ctx = Context::new();
        bootstrap(&ctx, Vec::new()).unwrap();
        assert_eq!(ctx.cwd.path(), "/tmp/example");
        std::env::remove_var("PWD");
    }

    #[test]
    fn unclassified_type_is_left_untouched_but_consumes_the_fd() {
        let ctx = Context::new();
        let (read_half, _write_half) = make_pipe_pair();
        let handle = InheritedHandle::new(read_half, pack_info(99, 0, 0));
        bootstrap(&ctx, vec![handle]).unwrap();
        assert!(ctx.fds.lookup(0).is_some());
    }
}
