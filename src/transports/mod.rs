//! Concrete transport implementations.
//!
//! These are explicitly out of scope for the core (spec §1: "the concrete transport
//! implementations... except for the vtable contract they must satisfy"). What's here is the
//! minimum needed to make the crate runnable and testable end to end: a real OS-pipe transport,
//! a `/dev/null`-equivalent, a `log`-backed logger sink, and a raw-fd-backed "remote"/"waitable"
//! stand-in for what would otherwise be an RPC channel to a remote filesystem server. `socket` is
//! a thin wrapper over the same raw-fd plumbing as `pipe`.

pub mod logger;
pub mod null;
pub mod pipe;
pub mod raw_fd;
pub mod remote;
pub mod socket;
pub mod waitable;
