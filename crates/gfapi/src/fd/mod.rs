//! Open descriptors.
//!
//! A [`File`] is an open file or directory of a mounted [`Volume`]. It
//! borrows the volume, so the volume cannot be unmounted while descriptors
//! are open.
//!
//! # Concurrency
//!
//! Positioned I/O ([`File::read_at`], [`File::write_at`]) and the metadata
//! calls take `&self` and may be issued concurrently on one descriptor; they
//! never move the implicit offset. Calls using the implicit offset
//! ([`File::read`], [`File::write`], [`File::seek`], directory enumeration)
//! take `&mut self`.
//!
//! # Closing
//!
//! [`File::close`] releases the remote descriptor and reports failures.
//! Any call after it fails with [`HandleError::Closed`]; a second close fails
//! with [`HandleError::AlreadyClosed`]. Dropping an open descriptor closes it
//! and logs failures.

mod dirent;

use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{trace, warn};

pub use dirent::{DirEntry, dirent_name};

use crate::backend::{Backend, RemoteFs};
use crate::error::{Error, HandleError, Op, Result, errno};
use crate::options::{FallocateMode, XattrFlags};
use crate::stat::{FileMetadata, Timespec};
use crate::volume::{FdOf, FdToken, Volume, read_sized, split_names};

fn offset(value: u64) -> io::Result<i64> {
    i64::try_from(value).map_err(|_| errno(libc::EINVAL))
}

/// An open file or directory.
pub struct File<'v, B: Backend> {
    volume: &'v Volume<B>,
    path: String,
    is_dir: bool,
    token: Option<FdToken>,
}

impl<'v, B: Backend> File<'v, B> {
    pub(crate) fn new(volume: &'v Volume<B>, path: &str, is_dir: bool, token: FdToken) -> Self {
        trace!(volume = volume.name(), path, is_dir, id = token.id(), "descriptor opened");
        Self {
            volume,
            path: path.to_string(),
            is_dir,
            token: Some(token),
        }
    }

    /// The path this descriptor was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_open(&self) -> bool {
        self.token.is_some()
    }

    pub fn volume(&self) -> &'v Volume<B> {
        self.volume
    }

    fn handle(&self, op: Op) -> Result<(&'v B::Fs, Arc<FdOf<B>>)> {
        let token = self.token.as_ref().ok_or_else(|| HandleError::Closed {
            op,
            path: self.path.clone(),
        })?;
        let fs = self.volume.mounted()?;
        let fd = self.volume.registry().get(token)?;
        Ok((fs, fd))
    }

    fn call<T>(&self, op: Op, f: impl FnOnce(&B::Fs, &FdOf<B>) -> io::Result<T>) -> Result<T> {
        let (fs, fd) = self.handle(op)?;
        f(fs, &fd).map_err(|source| Error::fd(op, &self.path, source))
    }

    /// Release the remote descriptor.
    pub fn close(&mut self) -> Result<()> {
        let token = self.token.take().ok_or_else(|| HandleError::AlreadyClosed {
            path: self.path.clone(),
        })?;
        let fs = self.volume.mounted()?;
        let fd = self.volume.registry().release(token)?;
        trace!(path = %self.path, "descriptor closed");
        fs.close(fd)
            .map_err(|source| Error::fd(Op::Close, &self.path, source))
    }

    pub fn chmod(&self, mode: u32) -> Result<()> {
        self.call(Op::Fchmod, |fs, fd| fs.fchmod(fd, mode))
    }

    pub fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        self.call(Op::Fchown, |fs, fd| fs.fchown(fd, uid, gid))
    }

    pub fn set_times(&self, accessed: SystemTime, modified: SystemTime) -> Result<()> {
        let times = [Timespec::from(accessed), Timespec::from(modified)];
        self.call(Op::Futimens, |fs, fd| fs.futimens(fd, times))
    }

    pub fn stat(&self) -> Result<FileMetadata> {
        let raw = self.call(Op::Fstat, |fs, fd| fs.fstat(fd))?;
        Ok(FileMetadata::from_raw(&raw, &self.path))
    }

    /// Flush written data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.call(Op::Fsync, |fs, fd| fs.fsync(fd))
    }

    pub fn truncate(&self, size: u64) -> Result<()> {
        self.call(Op::Ftruncate, |fs, fd| fs.ftruncate(fd, offset(size)?))
    }

    /// Read at `offset` without moving the implicit offset.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.call(Op::Pread, |fs, fd| fs.pread(fd, buf, self::offset(offset)?))
    }

    /// Write at `offset` without moving the implicit offset.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.call(Op::Pwrite, |fs, fd| fs.pwrite(fd, buf, self::offset(offset)?))
    }

    /// Read at the implicit offset and advance it.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.call(Op::Read, |fs, fd| fs.read(fd, buf))
    }

    /// Write at the implicit offset and advance it.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.call(Op::Write, |fs, fd| fs.write(fd, buf))
    }

    /// Move the implicit offset, returning the new position.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.call(Op::Seek, |fs, fd| {
            let (off, whence) = match pos {
                SeekFrom::Start(start) => (offset(start)?, libc::SEEK_SET),
                SeekFrom::Current(delta) => (delta, libc::SEEK_CUR),
                SeekFrom::End(delta) => (delta, libc::SEEK_END),
            };
            let new = fs.lseek(fd, off, whence)?;
            u64::try_from(new).map_err(|_| errno(libc::EINVAL))
        })
    }

    /// Reserve space for `len` bytes at `offset`.
    pub fn allocate(&self, mode: FallocateMode, offset: u64, len: u64) -> Result<()> {
        self.call(Op::Fallocate, |fs, fd| {
            fs.fallocate(fd, mode.as_raw(), self::offset(offset)?, len)
        })
    }

    /// Read an extended attribute into `buf`; an empty `buf` returns the size.
    pub fn getxattr(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        self.call(Op::Fgetxattr, |fs, fd| fs.fgetxattr(fd, name, buf))
    }

    /// The whole value of an extended attribute.
    pub fn xattr(&self, name: &str) -> Result<Vec<u8>> {
        self.call(Op::Fgetxattr, |fs, fd| {
            read_sized(|buf| fs.fgetxattr(fd, name, buf))
        })
    }

    pub fn setxattr(&self, name: &str, value: &[u8], flags: XattrFlags) -> Result<()> {
        self.call(Op::Fsetxattr, |fs, fd| {
            fs.fsetxattr(fd, name, value, flags.as_raw())
        })
    }

    pub fn removexattr(&self, name: &str) -> Result<()> {
        self.call(Op::Fremovexattr, |fs, fd| fs.fremovexattr(fd, name))
    }

    /// Up to `max` entries with metadata, continuing where the previous call
    /// stopped. `max == 0` returns all remaining entries; an empty result
    /// means the end of the directory.
    ///
    /// `.` and `..` are skipped and do not count toward `max`.
    pub fn read_dir(&mut self, max: usize) -> Result<Vec<DirEntry>> {
        self.enumerate(Op::Readdirplus, max, |fs, fd| {
            Ok(fs
                .readdirplus(fd)?
                .map(|(raw, st)| DirEntry::from_raw(&raw, Some(&st))))
        })
    }

    /// Like [`read_dir`](Self::read_dir), names only.
    pub fn read_dir_names(&mut self, max: usize) -> Result<Vec<String>> {
        let entries = self.enumerate(Op::Readdir, max, |fs, fd| {
            Ok(fs.readdir(fd)?.map(|raw| DirEntry::from_raw(&raw, None)))
        })?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    fn enumerate(
        &mut self,
        op: Op,
        max: usize,
        mut next: impl FnMut(&B::Fs, &FdOf<B>) -> io::Result<Option<DirEntry>>,
    ) -> Result<Vec<DirEntry>> {
        let (fs, fd) = self.handle(op)?;
        if !self.is_dir {
            return Err(Error::fd(op, &self.path, errno(libc::ENOTDIR)));
        }
        let mut entries = Vec::new();
        while max == 0 || entries.len() < max {
            let entry = next(fs, &fd).map_err(|source| Error::fd(op, &self.path, source))?;
            match entry {
                None => break,
                Some(entry) if entry.is_dot() => {}
                Some(entry) => entries.push(entry),
            }
        }
        Ok(entries)
    }

    /// Names of all extended attributes, through the path this descriptor was opened with.
    pub fn xattr_names(&self) -> Result<Vec<String>> {
        // There is no descriptor-scoped list call in the remote surface.
        let (fs, _) = self.handle(Op::Listxattr)?;
        let raw = read_sized(|buf| fs.listxattr(&self.path, buf))
            .map_err(|source| Error::fd(Op::Listxattr, &self.path, source))?;
        Ok(split_names(&raw))
    }
}

impl<B: Backend> Drop for File<'_, B> {
    fn drop(&mut self) {
        if self.token.is_some()
            && let Err(e) = self.close()
        {
            warn!(path = %self.path, error = %e, "failed to close descriptor on drop");
        }
    }
}

impl<B: Backend> std::fmt::Debug for File<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("volume", &self.volume.name())
            .field("path", &self.path)
            .field("is_dir", &self.is_dir)
            .field("id", &self.token.as_ref().map(FdToken::id))
            .finish()
    }
}

impl<B: Backend> io::Read for File<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self, buf).map_err(io::Error::from)
    }
}

impl<B: Backend> io::Write for File<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl<B: Backend> io::Seek for File<'_, B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        File::seek(self, pos).map_err(io::Error::from)
    }
}
