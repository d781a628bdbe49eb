//! Current-working-directory tracking: the normalized path string plus the `IoObject` used to
//! resolve relative paths.

use parking_lot::Mutex;

use crate::errno::KernelStatus;
use crate::io_object::IoObject;
use crate::open_flags::OpenFlags;

/// Matches the platform's `PATH_MAX`.
pub const PATH_MAX: usize = libc::PATH_MAX as usize;

/// Sentinel path used when normalization would overflow `PATH_MAX` (spec §4.4, design-level —
/// there is no real error return path for `chdir`'s internal bookkeeping at that point).
pub const UNKNOWN_CWD: &str = "(unknown)";

struct Inner {
    io: Option<IoObject>,
    path: String,
}

/// Guards the cwd path string and the cwd `IoObject` pointer under one lock, ordered outside the
/// fd table's lock (spec §5).
pub struct CwdTracker {
    inner: Mutex<Inner>,
}

impl Default for CwdTracker {
    fn default() -> Self {
        CwdTracker {
            inner: Mutex::new(Inner {
                io: None,
                path: "/".to_string(),
            }),
        }
    }
}

impl CwdTracker {
    /// A tracker with no cwd `IoObject` set and path `/`.
    pub fn new() -> Self {
        CwdTracker::default()
    }

    /// Normalizes `path` against the current cwd string and stores the result. Pure string
    /// manipulation; does not touch the cwd `IoObject`.
    pub fn update(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.path = normalize(&inner.path, path);
        log::debug!("cwd updated to {:?}", inner.path);
    }

    /// The current cwd `IoObject`, if one has been set.
    pub fn io(&self) -> Option<IoObject> {
        self.inner.lock().io.clone()
    }

    /// Replaces the cwd `IoObject` directly (used by startup, which has no path to normalize).
    pub fn set_io(&self, io: IoObject) {
        self.inner.lock().io = Some(io);
    }

    /// Opens `path` with `O_DIRECTORY` against the current base (relative paths go through the
    /// current cwd `IoObject`; the caller resolves `path` via [`crate::path_router::PathRouter`]
    /// first when it might be absolute) and, on success, atomically swaps in the new cwd
    /// `IoObject` and path string, closing the old `IoObject`.
    pub fn chdir(&self, new_io: IoObject, new_path_component: &str) -> Result<(), KernelStatus> {
        let mut inner = self.inner.lock();
        let old = inner.io.replace(new_io);
        inner.path = normalize(&inner.path, new_path_component);
        if let Some(old) = old {
            if let Err(status) = old.close() {
                log::warn!("chdir: closing previous cwd io failed: {:?}", status);
            }
        }
        Ok(())
    }

    /// Copies the current path into `buf`. Returns the number of bytes written (not including a
    /// NUL terminator), or `Err(OutOfRange)` (-> `ERANGE`) if `buf` is too small.
    pub fn getcwd(&self, buf: &mut [u8]) -> Result<usize, KernelStatus> {
        let inner = self.inner.lock();
        let bytes = inner.path.as_bytes();
        if bytes.len() + 1 > buf.len() {
            return Err(KernelStatus::OutOfRange);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        Ok(bytes.len())
    }

    /// The current path as an owned `String`, for callers (like `chdir`'s own path resolution)
    /// that want the full string rather than a fixed buffer.
    pub fn path(&self) -> String {
        self.inner.lock().path.clone()
    }

    /// `O_DIRECTORY` flags used whenever this module opens a directory for itself.
    pub const DIRECTORY_OPEN_FLAGS: OpenFlags = OpenFlags(libc::O_DIRECTORY | libc::O_RDONLY);
}

/// Normalizes `path` against `base`, per spec §4.4:
/// - an absolute `path` resets to `/` and continues as if relative from there
/// - `""`/`.` segments are skipped
/// - `..` pops the last segment (staying at `/` if already there)
/// - everything else is appended
/// - a result that would exceed `PATH_MAX` becomes [`UNKNOWN_CWD`]
fn normalize(base: &str, path: &str) -> String {
    let mut cwd = if path.starts_with('/') {
        "/".to_string()
    } else {
        base.to_string()
    };

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if cwd != "/" {
                    if let Some(pos) = cwd.rfind('/') {
                        cwd.truncate(pos.max(1));
                    }
                }
            }
            seg => {
                if cwd == "/" {
                    cwd.push_str(seg);
                } else {
                    cwd.push('/');
                    cwd.push_str(seg);
                }
            }
        }
        if cwd.len() > PATH_MAX {
            return UNKNOWN_CWD.to_string();
        }
    }
    cwd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalization_scenario() {
        // spec.md §8 end-to-end scenario 2.
        let tracker = CwdTracker::new();
        assert_eq!(tracker.path(), "/");
        tracker.update("/a/b/../c//d");
        assert_eq!(tracker.path(), "/a/c/d");
    }

    #[test]
    fn dotdot_at_root_stays_at_root() {
        assert_eq!(normalize("/", ".."), "/");
    }

    #[test]
    fn relative_append() {
        assert_eq!(normalize("/a", "b/c"), "/a/b/c");
    }

    #[test]
    fn getcwd_too_small_is_out_of_range() {
        let tracker = CwdTracker::new();
        tracker.update("/abc");
        let mut buf = [0u8; 2];
        assert_eq!(tracker.getcwd(&mut buf).unwrap_err(), KernelStatus::OutOfRange);
    }

    #[test]
    fn overflow_becomes_unknown_sentinel() {
        let long_segment = "x".repeat(PATH_MAX + 10);
        assert_eq!(normalize("/", &long_segment), UNKNOWN_CWD);
    }

    #[test]
    fn chdir_is_a_no_op_on_getcwd_roundtrip() {
        let tracker = CwdTracker::new();
        tracker.update("/a/b");
        let before = tracker.path();
        // chdir(getcwd()) should leave the path unchanged (spec §8 round-trip property).
        tracker.update(&before);
        assert_eq!(tracker.path(), before);
    }
}
