//! A POSIX compatibility layer over a capability/handle-based microkernel.
//!
//! This crate sits between application code expecting classical file-descriptor semantics and a
//! kernel whose primitive is an opaque handle to one of a closed set of transport families
//! (remote filesystem objects, pipes, loggers, waitable handles, sockets). [`posix_ops::PosixOps`]
//! is the POSIX call surface (`open`/`read`/`write`/`stat`/`rename`/`poll`/... — see its module
//! docs for the full list); everything else is the plumbing it's built from: an fd table with
//! dup-count lifecycle ([`fd_table`]), path resolution relative to a root or a dirfd
//! ([`path_router`]), a blocking-read/`poll`/`select` multiplexer over the kernel's wait primitive
//! ([`wait_mux`], [`kernel`]), and the inherited-handle bootstrap a process is launched with
//! ([`startup`]).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::access_flags::AccessFlags;
pub use crate::context::Context;
pub use crate::cwd::CwdTracker;
pub use crate::dir_stream::{DirStream, Dirent};
pub use crate::errno::{Errno, ErrorMap, KernelStatus};
pub use crate::fd_table::{FdTable, AT_FDCWD, MAX_FD};
pub use crate::flags::{FdFlags, IoFlags};
pub use crate::io_object::{IoObject, IoTransport, MiscOp, MiscResult, Transport};
pub use crate::kernel::{Kernel, PollKernel, WaitHandle, WaitItem, WaitTimeout};
pub use crate::open_flags::{OpenAccMode, OpenFlags};
pub use crate::path_router::PathRouter;
pub use crate::poll_events::PollEvents;
pub use crate::posix_ops::{FcntlCmd, PosixOps, PosixStat, TimeUpdate, MAX_POLL_NFDS};
pub use crate::startup::{bootstrap, info, register_atexit, InheritedHandle};
pub use crate::wait_mux::{PollRequest, WaitMux};

mod access_flags;
mod context;
mod cwd;
mod dir_stream;
mod errno;
mod fd_table;
mod flags;
mod io_object;
mod kernel;
mod open_flags;
mod path_router;
mod poll_events;
mod posix_ops;
mod startup;
/// Concrete transport implementations (remote/pipe/logger/null/waitable/socket).
pub mod transports;
mod wait_mux;
