//! Resolves `(dirfd, path)` pairs to a base directory [`IoObject`] plus a residual path
//! (spec §4.3).

use crate::cwd::CwdTracker;
use crate::errno::KernelStatus;
use crate::fd_table::{FdTable, AT_FDCWD};
use crate::io_object::IoObject;

/// Resolves `(dirfd, path)` pairs against a root, a cwd, and the fd table.
pub struct PathRouter<'a> {
    root: &'a IoObject,
    cwd: &'a CwdTracker,
    fds: &'a FdTable,
}

impl<'a> PathRouter<'a> {
    /// Builds a router over the given root/cwd/fd-table, borrowed for the duration of one
    /// resolution (spec §4.3: "Base is acquired for the caller" — callers clone what they need
    /// to keep past this borrow).
    pub fn new(root: &'a IoObject, cwd: &'a CwdTracker, fds: &'a FdTable) -> Self {
        PathRouter { root, cwd, fds }
    }

    /// Resolves `(dirfd, path)` to a base directory and the residual path to open/stat/etc
    /// relative to it.
    pub fn resolve(&self, dirfd: i32, path: &str) -> Result<(IoObject, String), KernelStatus> {
        if path.is_empty() {
            return Err(KernelStatus::InvalidArgs);
        }
        if let Some(stripped) = path.strip_prefix('/') {
            let residual = if stripped.is_empty() { "." } else { stripped };
            return Ok((self.root.clone(), residual.to_string()));
        }
        if dirfd == AT_FDCWD {
            let io = self.cwd.io().ok_or(KernelStatus::BadHandle)?;
            return Ok((io, path.to_string()));
        }
        let io = self.fds.lookup(dirfd).ok_or(KernelStatus::BadHandle)?;
        Ok((io, path.to_string()))
    }

    /// Splits `path` into a containing directory (resolved the same way as [`Self::resolve`])
    /// and a leaf name, for `unlink`/`unlinkat`.
    pub fn resolve_containing_dir(
        &self,
        dirfd: i32,
        path: &str,
    ) -> Result<(IoObject, String), KernelStatus> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(KernelStatus::InvalidArgs);
        }
        let (dir_path, leaf) = match trimmed.rfind('/') {
            Some(pos) => {
                let dir = &trimmed[..=pos];
                let dir = if dir.is_empty() { "/" } else { dir };
                (dir, &trimmed[pos + 1..])
            }
            None => {
                if path.starts_with('/') {
                    ("/", trimmed)
                } else {
                    (".", trimmed)
                }
            }
        };
        if leaf.is_empty() {
            return Err(KernelStatus::InvalidArgs);
        }
        let (base, _residual) = self.resolve(dirfd, dir_path)?;
        Ok((base, leaf.to_string()))
    }

    /// Resolves a two-path operation (`rename`/`link`): both paths must be both-absolute or
    /// both-relative. Returns the shared base plus the two residual paths, packed back-to-back
    /// with a NUL separator as spec §4.3 describes for the `misc` buffer.
    pub fn resolve_two_path(
        &self,
        old_dirfd: i32,
        old_path: &str,
        new_dirfd: i32,
        new_path: &str,
    ) -> Result<(IoObject, IoObject, Vec<u8>), KernelStatus> {
        if old_path.starts_with('/') != new_path.starts_with('/') {
            return Err(KernelStatus::NotSupported);
        }
        let (old_base, old_residual) = self.resolve(old_dirfd, old_path)?;
        let (new_base, new_residual) = self.resolve(new_dirfd, new_path)?;
        let mut packed = Vec::with_capacity(old_residual.len() + new_residual.len() + 2);
        packed.extend_from_slice(old_residual.as_bytes());
        packed.push(0);
        packed.extend_from_slice(new_residual.as_bytes());
        packed.push(0);
        Ok((old_base, new_base, packed))
    }
}
