//! Buffered directory enumeration (spec §4.8).

use parking_lot::Mutex;

use crate::errno::KernelStatus;
use crate::io_object::{IoObject, MiscOp};

const READDIR_RESET: u64 = 1;
const READDIR_NONE: u64 = 0;
const FETCH_SIZE: usize = 2048;

/// A single directory entry, as handed back to a `readdir` caller.
///
/// Per spec §9 Open Question, `d_ino`/`d_off`/`d_reclen` are not populated by the underlying
/// `vdirent` records this crate reads, so they're zeroed here; callers relying on them will
/// misbehave, exactly as the original does.
#[derive(Debug, Clone)]
pub struct Dirent {
    /// Entry name.
    pub name: String,
    /// `vdirent`'s type byte (maps loosely onto `d_type`).
    pub file_type: u8,
    /// Always zero — not populated (see struct docs).
    pub ino: u64,
    /// Always zero — not populated.
    pub off: i64,
}

struct Inner {
    io: IoObject,
    buffer: Vec<u8>,
    cursor: Option<usize>,
}

/// Per-fd directory stream, matching one open directory. Guarded by its own mutex (spec §4.8
/// "Thread safety: per-DIR mutex").
pub struct DirStream {
    inner: Mutex<Inner>,
}

impl DirStream {
    /// Wraps an already-open directory `IoObject` as a stream with an empty cache.
    pub fn new(io: IoObject) -> Self {
        DirStream {
            inner: Mutex::new(Inner {
                io,
                buffer: Vec::new(),
                cursor: None,
            }),
        }
    }

    /// Resets the cache so the next `readdir` fetches from the start.
    pub fn rewind(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.cursor = None;
    }

    /// Returns the next entry, or `None` at end of stream.
    pub fn readdir(&self) -> Result<Option<Dirent>, KernelStatus> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(cursor) = inner.cursor {
                if cursor < inner.buffer.len() {
                    return Ok(Some(parse_one(&inner.buffer, &mut inner.cursor, cursor)));
                }
            }

            let first_fetch = inner.cursor.is_none();
            let cmd = if first_fetch { READDIR_RESET } else { READDIR_NONE };
            let mut buf = vec![0u8; FETCH_SIZE];
            let result = inner.io.transport().misc(MiscOp::ReadDir, cmd, &[], &mut buf)?;
            if result.len == 0 {
                return Ok(None);
            }
            buf.truncate(result.len);
            inner.buffer = buf;
            inner.cursor = Some(0);
        }
    }
}

/// Parses one packed `vdirent` record at `cursor`: a `size` field (u32 LE), a `type` byte, then
/// a NUL-terminated name, `size` bytes total.
fn parse_one(buffer: &[u8], cursor: &mut Option<usize>, at: usize) -> Dirent {
    let size = u32::from_le_bytes(buffer[at..at + 4].try_into().unwrap()) as usize;
    let file_type = buffer[at + 4];
    let name_start = at + 5;
    let name_end = buffer[name_start..at + size]
        .iter()
        .position(|&b| b == 0)
        .map(|p| name_start + p)
        .unwrap_or(at + size);
    let name = String::from_utf8_lossy(&buffer[name_start..name_end]).into_owned();
    *cursor = Some(at + size);
    Dirent {
        name,
        file_type,
        ino: 0,
        off: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::KernelStatus;
    use crate::flags::IoFlags;
    use crate::io_object::{IoTransport, MiscResult, Transport};
    use crate::kernel::WaitHandle;
    use crate::poll_events::PollEvents;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeDir {
        fetches_since_reset: AtomicUsize,
    }

    fn encode(name: &str, file_type: u8) -> Vec<u8> {
        let mut v = Vec::new();
        let size = 5 + name.len() + 1;
        v.extend_from_slice(&(size as u32).to_le_bytes());
        v.push(file_type);
        v.extend_from_slice(name.as_bytes());
        v.push(0);
        v
    }

    impl IoTransport for FakeDir {
        fn close(&self) -> Result<(), KernelStatus> {
            Ok(())
        }
        fn read(&self, _buf: &mut [u8]) -> Result<usize, KernelStatus> {
            Err(KernelStatus::NotSupported)
        }
        fn write(&self, _buf: &[u8]) -> Result<usize, KernelStatus> {
            Err(KernelStatus::NotSupported)
        }
        fn misc(
            &self,
            op: MiscOp,
            arg: u64,
            _in_buf: &[u8],
            out_buf: &mut [u8],
        ) -> Result<MiscResult, KernelStatus> {
            assert_eq!(op, MiscOp::ReadDir);
            if arg == READDIR_RESET {
                self.fetches_since_reset.store(0, Ordering::SeqCst);
            }
            let fetch = self.fetches_since_reset.fetch_add(1, Ordering::SeqCst);
            if fetch == 0 {
                let mut payload = encode(".", 4);
                payload.extend(encode("..", 4));
                payload.extend(encode("file.txt", 8));
                out_buf[..payload.len()].copy_from_slice(&payload);
                Ok(MiscResult { len: payload.len() })
            } else {
                Ok(MiscResult { len: 0 })
            }
        }
        fn wait_begin(&self, _events: PollEvents) -> (WaitHandle, PollEvents) {
            (WaitHandle::INVALID, PollEvents::empty())
        }
    }

    fn stream() -> DirStream {
        let io = IoObject::new(
            Arc::new(FakeDir {
                fetches_since_reset: AtomicUsize::new(0),
            }),
            Transport::Remote,
            IoFlags::empty(),
        );
        DirStream::new(io)
    }

    #[test]
    fn readdir_yields_entries_then_none() {
        let s = stream();
        let a = s.readdir().unwrap().unwrap();
        assert_eq!(a.name, ".");
        let b = s.readdir().unwrap().unwrap();
        assert_eq!(b.name, "..");
        let c = s.readdir().unwrap().unwrap();
        assert_eq!(c.name, "file.txt");
        assert!(s.readdir().unwrap().is_none());
    }

    #[test]
    fn rewind_restarts_the_stream() {
        let s = stream();
        let _ = s.readdir().unwrap();
        s.rewind();
        let a = s.readdir().unwrap().unwrap();
        assert_eq!(a.name, ".");
    }
}
