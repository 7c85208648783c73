//! Path-based operations.
//!
//! Each call is a single remote round trip whose failure is reported as a
//! [`PathError`](crate::PathError) carrying the operation, the path(s)
//! and the remote cause.

use std::io;
use std::time::SystemTime;

use tracing::{instrument, trace};

use super::{DirOps, Volume, mkdir_all, read_sized, split_names};
use crate::backend::{Backend, RemoteFs};
use crate::error::{Error, Op, PathError, Result, UsageError, errno};
use crate::fd::{DirEntry, File};
use crate::options::{AccessMode, OpenFlags, OpenOptions, XattrFlags};
use crate::stat::{FileMetadata, FsStats, Timespec};

/// Upper bound for a link target, matching `PATH_MAX`.
const MAX_LINK_TARGET: usize = libc::PATH_MAX as usize;

impl<B: Backend> Volume<B> {
    fn dispatch<T>(
        &self,
        op: Op,
        path: &str,
        call: impl FnOnce(&B::Fs) -> io::Result<T>,
    ) -> Result<T> {
        let fs = self.mounted()?;
        trace!(volume = %self.name, %op, path, "dispatch");
        call(fs).map_err(|source| Error::path(op, path, source))
    }

    fn dispatch2<T>(
        &self,
        op: Op,
        path: &str,
        target: &str,
        call: impl FnOnce(&B::Fs) -> io::Result<T>,
    ) -> Result<T> {
        let fs = self.mounted()?;
        trace!(volume = %self.name, %op, path, target, "dispatch");
        call(fs).map_err(|source| Error::Path(PathError::new(op, path, source).with_target(target)))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.dispatch(Op::Chmod, path, |fs| fs.chmod(path, mode))
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.dispatch(Op::Chown, path, |fs| fs.chown(path, uid, gid))
    }

    /// Set access and modification times, with nanosecond precision.
    pub fn set_times(&self, path: &str, accessed: SystemTime, modified: SystemTime) -> Result<()> {
        let times = [Timespec::from(accessed), Timespec::from(modified)];
        self.dispatch(Op::Utimens, path, |fs| fs.utimens(path, times))
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.dispatch(Op::Truncate, path, |fs| {
            let size = i64::try_from(size).map_err(|_| errno(libc::EFBIG))?;
            fs.truncate(path, size)
        })
    }

    /// Create (or open, unless `flags` holds `EXCL`) a regular file.
    ///
    /// The create flag is implied.
    #[instrument(level = "debug", skip(self), fields(volume = %self.name))]
    pub fn create(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<File<'_, B>> {
        let flags = flags | OpenFlags::CREATE;
        let fd = self.dispatch(Op::Create, path, |fs| fs.creat(path, flags.bits(), mode))?;
        Ok(File::new(self, path, false, self.handles.register(fd)))
    }

    /// Open an existing entry.
    ///
    /// Directories are accepted too: when the remote open refuses with
    /// `EISDIR`, the path is opened as a directory instead. `flags` must not
    /// request creation; use [`create`](Self::create) or
    /// [`open_file`](Self::open_file) for that.
    #[instrument(level = "debug", skip(self), fields(volume = %self.name))]
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<File<'_, B>> {
        let fs = self.mounted()?;
        match fs.open(path, flags.bits()) {
            Ok(fd) => Ok(File::new(self, path, false, self.handles.register(fd))),
            Err(e) if e.raw_os_error() == Some(libc::EISDIR) => self.open_dir(path),
            Err(source) => Err(Error::path(Op::Open, path, source)),
        }
    }

    /// Open with `mode` applied when `flags` request creation.
    ///
    /// An existing directory is opened as one, whether or not creation was requested.
    pub fn open_file(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<File<'_, B>> {
        if !flags.contains(OpenFlags::CREATE) {
            return self.open(path, flags);
        }
        match self.create(path, flags, mode) {
            Err(e) if e.raw_os_error() == Some(libc::EISDIR) => self.open_dir(path),
            other => other,
        }
    }

    /// Open as described by `options`, in the manner of `std::fs::OpenOptions::open`.
    pub fn open_with(&self, path: &str, options: &OpenOptions) -> Result<File<'_, B>> {
        let flags = options.flags()?;
        self.open_file(path, flags, options.creation_mode())
    }

    #[instrument(level = "debug", skip(self), fields(volume = %self.name))]
    pub fn open_dir(&self, path: &str) -> Result<File<'_, B>> {
        let fd = self.dispatch(Op::OpenDir, path, |fs| fs.opendir(path))?;
        Ok(File::new(self, path, true, self.handles.register(fd)))
    }

    /// All entries of the directory at `path`, with metadata.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let mut dir = self.open_dir(path)?;
        let entries = dir.read_dir(0)?;
        dir.close()?;
        Ok(entries)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.dispatch(Op::Unlink, path, |fs| fs.unlink(path))
    }

    /// Metadata of `path`, following symlinks.
    pub fn stat(&self, path: &str) -> Result<FileMetadata> {
        let raw = self.dispatch(Op::Stat, path, |fs| fs.stat(path))?;
        Ok(FileMetadata::from_raw(&raw, path))
    }

    /// Metadata of `path` itself, without following a final symlink.
    pub fn lstat(&self, path: &str) -> Result<FileMetadata> {
        let raw = self.dispatch(Op::Lstat, path, |fs| fs.lstat(path))?;
        Ok(FileMetadata::from_raw(&raw, path))
    }

    /// Whether `path` exists; other stat failures are returned as errors.
    pub fn exists(&self, path: &str) -> Result<bool> {
        match self.lstat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.dispatch(Op::Mkdir, path, |fs| fs.mkdir(path, mode))
    }

    /// Create `path` and any missing ancestors.
    ///
    /// Succeeds without change when `path` already is a directory.
    /// Ancestors created before a failure are left in place.
    #[instrument(level = "debug", skip(self), fields(volume = %self.name))]
    pub fn mkdir_all(&self, path: &str, mode: u32) -> Result<()> {
        mkdir_all(self, path, mode)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.dispatch(Op::Rmdir, path, |fs| fs.rmdir(path))
    }

    /// Rename `from` to `to`, atomically replacing `to` if it exists.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.dispatch2(Op::Rename, from, to, |fs| fs.rename(from, to))
    }

    /// Create `new` as a hard link to `existing`.
    pub fn link(&self, existing: &str, new: &str) -> Result<()> {
        self.dispatch2(Op::Link, existing, new, |fs| fs.link(existing, new))
    }

    /// Create `link` pointing at `target`. The target need not exist.
    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        self.dispatch2(Op::Symlink, link, target, |fs| fs.symlink(target, link))
    }

    /// Target of the symlink at `path`.
    ///
    /// The buffer is sized from the link's own size, with one spare byte to
    /// detect a target that grew in between.
    pub fn readlink(&self, path: &str) -> Result<String> {
        let fs = self.mounted()?;
        let fail = |source| Error::path(Op::Readlink, path, source);
        let size = fs.lstat(path).map_err(fail)?.size;
        let mut capacity = usize::try_from(size).unwrap_or(0).max(64) + 1;
        loop {
            let mut buf = vec![0u8; capacity];
            let n = fs.readlink(path, &mut buf).map_err(fail)?;
            if n < capacity {
                buf.truncate(n);
                return String::from_utf8(buf)
                    .map_err(|e| fail(io::Error::new(io::ErrorKind::InvalidData, e)));
            }
            if capacity > MAX_LINK_TARGET {
                return Err(fail(errno(libc::ENAMETOOLONG)));
            }
            capacity *= 2;
        }
    }

    /// Read the symlink target into `buf`, returning the number of bytes copied.
    pub fn readlink_into(&self, path: &str, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(UsageError::ZeroLengthBuffer { op: Op::Readlink }.into());
        }
        self.dispatch(Op::Readlink, path, |fs| fs.readlink(path, buf))
    }

    /// Read an extended attribute into `buf`.
    ///
    /// An empty `buf` returns the value's length without reading it.
    pub fn getxattr(&self, path: &str, name: &str, buf: &mut [u8]) -> Result<usize> {
        self.dispatch(Op::Getxattr, path, |fs| fs.getxattr(path, name, buf))
    }

    /// The whole value of an extended attribute.
    pub fn xattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        self.dispatch(Op::Getxattr, path, |fs| {
            read_sized(|buf| fs.getxattr(path, name, buf))
        })
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: XattrFlags) -> Result<()> {
        self.dispatch(Op::Setxattr, path, |fs| {
            fs.setxattr(path, name, value, flags.as_raw())
        })
    }

    pub fn removexattr(&self, path: &str, name: &str) -> Result<()> {
        self.dispatch(Op::Removexattr, path, |fs| fs.removexattr(path, name))
    }

    /// NUL-separated attribute names into `buf`; an empty `buf` returns the size.
    pub fn listxattr(&self, path: &str, buf: &mut [u8]) -> Result<usize> {
        self.dispatch(Op::Listxattr, path, |fs| fs.listxattr(path, buf))
    }

    /// Names of all extended attributes of `path`.
    pub fn xattr_names(&self, path: &str) -> Result<Vec<String>> {
        let raw = self.dispatch(Op::Listxattr, path, |fs| {
            read_sized(|buf| fs.listxattr(path, buf))
        })?;
        Ok(split_names(&raw))
    }

    /// Space and inode usage of the volume holding `path`.
    pub fn statvfs(&self, path: &str) -> Result<FsStats> {
        let raw = self.dispatch(Op::Statvfs, path, |fs| fs.statvfs(path))?;
        Ok(FsStats::from(raw))
    }

    /// Check `mode` against `path` as the remote layer evaluates the caller's credentials.
    pub fn access(&self, path: &str, mode: AccessMode) -> Result<()> {
        self.dispatch(Op::Access, path, |fs| fs.access(path, mode.bits()))
    }
}

impl<B: Backend> DirOps for Volume<B> {
    fn stat(&self, path: &str) -> Result<FileMetadata> {
        Volume::stat(self, path)
    }

    fn lstat(&self, path: &str) -> Result<FileMetadata> {
        Volume::lstat(self, path)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        Volume::mkdir(self, path, mode)
    }
}
