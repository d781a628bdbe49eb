//! Literal end-to-end scenarios from the design's testable-properties list, exercised through
//! the public `PosixOps` surface with real OS pipes and directories rather than mocks.

use std::thread;
use std::time::Duration;

use posix_shim::{
    Context, FcntlCmd, IoFlags, IoObject, OpenFlags, PollEvents, PosixOps, Transport, AT_FDCWD,
};
use tempfile::tempdir;

fn ctx_with_root(path: &std::path::Path) -> Context {
    let ctx = Context::new();
    let root = posix_shim::transports::remote::RemoteTransport::open_path(
        path.to_str().unwrap(),
        OpenFlags(libc::O_DIRECTORY | libc::O_RDONLY),
        0,
    )
    .unwrap();
    ctx.set_root(IoObject::new(std::sync::Arc::new(root), Transport::Remote, IoFlags::empty()));
    ctx
}

#[test]
fn pipe_echo() {
    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let (r, w) = ops.pipe2(false).unwrap();
    assert_eq!(ops.write(w, b"hi").unwrap(), 2);
    let mut buf = [0u8; 2];
    assert_eq!(ops.read(r, &mut buf).unwrap(), 2);
    assert_eq!(&buf, b"hi");
}

#[test]
fn path_normalization_against_a_real_directory_tree() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
    std::fs::create_dir_all(dir.path().join("a/c/d")).unwrap();
    let ctx = ctx_with_root(dir.path());
    let ops = PosixOps::new(&ctx);

    ops.chdir("/a/b/../c//d").unwrap();

    let mut buf = [0u8; 256];
    let len = ops.getcwd(&mut buf).unwrap();
    assert_eq!(std::str::from_utf8(&buf[..len]).unwrap(), "/a/c/d");
}

#[test]
fn blocking_read_unblocks_once_a_writer_writes() {
    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let (r, w) = ops.pipe2(false).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            ops.write(w, b"abc").unwrap();
        });

        let mut buf = [0u8; 8];
        let n = ops.read(r, &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"abc");
    });
}

#[test]
fn unbind_while_in_use_then_succeeds_after_release() {
    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let (r, _w) = ops.pipe2(false).unwrap();

    // A lookup reference held via `clone_fd` stands in for "thread A holds a lookup reference".
    let held = ops.clone_fd(r).unwrap();

    assert!(ops.transfer_fd(r).is_err());

    drop(held);
    assert!(ops.transfer_fd(r).is_ok());
}

#[test]
fn poll_rejects_more_than_max_poll_nfds() {
    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let mut fds: Vec<(i32, PollEvents, PollEvents)> =
        vec![(-1, PollEvents::POLLIN, PollEvents::empty()); posix_shim::MAX_POLL_NFDS + 1];
    assert!(ops.poll(&mut fds, 0).is_err());
}

#[test]
fn readv_skips_zero_length_iovecs() {
    use std::io::IoSliceMut;

    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let (r, w) = ops.pipe2(false).unwrap();
    ops.write(w, b"ab").unwrap();

    let mut empty: [u8; 0] = [];
    let mut two = [0u8; 2];
    let mut iov = [IoSliceMut::new(&mut empty), IoSliceMut::new(&mut two)];
    let n = ops.readv(r, &mut iov).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&two, b"ab");
}

#[test]
fn non_blocking_read_on_an_empty_pipe_is_eagain() {
    let ctx = Context::new();
    let ops = PosixOps::new(&ctx);
    let (r, _w) = ops.pipe2(false).unwrap();
    ops.fcntl(r, FcntlCmd::SetFl(IoFlags::NONBLOCK)).unwrap();
    let mut buf = [0u8; 2];
    assert!(ops.read(r, &mut buf).is_err());
}

#[test]
fn open_create_and_directory_together_is_einval() {
    let dir = tempdir().unwrap();
    let ctx = ctx_with_root(dir.path());
    let ops = PosixOps::new(&ctx);
    assert!(ops
        .openat(AT_FDCWD, "newdir", OpenFlags(libc::O_CREAT | libc::O_DIRECTORY), 0o644)
        .is_err());
    assert!(!dir.path().join("newdir").exists());
}
