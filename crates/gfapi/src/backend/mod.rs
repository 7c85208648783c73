//! The remote call surface.
//!
//! [`Backend`] creates one remote filesystem object per volume (`glfs_new`),
//! and [`RemoteFs`] exposes one method per remote call. Implementations
//! report failures as `io::Error` carrying the remote errno; translating
//! that into structured errors is the job of [`Volume`](crate::Volume) and
//! [`File`](crate::File).
//!
//! Two implementations ship with the crate:
//!
//! - [`memory::MemoryBackend`]: an in-process volume, used for tests and
//!   local development.
//! - `native::NativeBackend` (feature `native`, Linux): libgfapi over FFI.

pub mod memory;

#[cfg(all(feature = "native", target_os = "linux"))]
pub mod native;

use std::io;
use std::path::Path;

use crate::stat::{RawStat, RawStatVfs, Timespec};

/// Size of the fixed `d_name` buffer of a directory entry record.
pub const DIRENT_NAME_LEN: usize = 256;

/// A directory entry record as produced by the remote readdir calls.
///
/// `name` is a fixed-size buffer that is not guaranteed to contain a NUL
/// terminator when the name fills it completely. Use
/// [`dirent_name`](crate::fd::dirent_name) to extract the name.
#[derive(Clone, PartialEq, Eq)]
pub struct RawDirent {
    pub ino: u64,
    pub off: i64,
    pub reclen: u16,
    /// `DT_*` type byte.
    pub kind: u8,
    /// Declared name length, for platforms whose dirent carries one
    /// (`d_namlen`). Linux records leave this unset.
    pub namlen: Option<u16>,
    pub name: [u8; DIRENT_NAME_LEN],
}

impl RawDirent {
    /// Build a record holding `name`, truncated to the buffer size.
    pub fn new(ino: u64, kind: u8, name: &[u8]) -> Self {
        let mut buf = [0u8; DIRENT_NAME_LEN];
        let len = name.len().min(DIRENT_NAME_LEN);
        buf[..len].copy_from_slice(&name[..len]);
        Self {
            ino,
            off: 0,
            reclen: 0,
            kind,
            namlen: None,
            name: buf,
        }
    }
}

impl std::fmt::Debug for RawDirent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDirent")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field(
                "name",
                &String::from_utf8_lossy(crate::fd::dirent_name(self)),
            )
            .finish_non_exhaustive()
    }
}

/// Factory for per-volume remote filesystem objects.
pub trait Backend: Send + Sync {
    type Fs: RemoteFs;

    /// Create the (unconfigured) remote object for `volume`.
    fn new_fs(&self, volume: &str) -> io::Result<Self::Fs>;
}

/// One remote filesystem object, i.e. one `glfs_t`.
///
/// All methods block until the remote layer answers. Implementations must be
/// safe to call concurrently from several threads, except that operations
/// using the implicit offset of a single `Fd` ([`read`](Self::read),
/// [`write`](Self::write), [`lseek`](Self::lseek), [`readdir`](Self::readdir))
/// are serialized by the caller.
pub trait RemoteFs: Send + Sync {
    /// Opaque open-file or open-directory resource.
    type Fd: Send + Sync;

    // Volume lifecycle

    /// Append a volfile server to the list consulted, in order, by [`init`](Self::init).
    fn set_volfile_server(&self, transport: &str, host: &str, port: u16) -> io::Result<()>;
    fn set_volfile(&self, volfile: &Path) -> io::Result<()>;
    /// `None` selects the remote library's default log location.
    fn set_logging(&self, logfile: Option<&Path>, level: i32) -> io::Result<()>;
    fn init(&self) -> io::Result<()>;
    fn fini(&self) -> io::Result<()>;

    // Path operations

    fn chmod(&self, path: &str, mode: u32) -> io::Result<()>;
    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()>;
    /// `times` is `[atime, mtime]`.
    fn utimens(&self, path: &str, times: [Timespec; 2]) -> io::Result<()>;
    fn truncate(&self, path: &str, size: i64) -> io::Result<()>;
    fn creat(&self, path: &str, flags: i32, mode: u32) -> io::Result<Self::Fd>;
    fn open(&self, path: &str, flags: i32) -> io::Result<Self::Fd>;
    fn opendir(&self, path: &str) -> io::Result<Self::Fd>;
    fn close(&self, fd: Self::Fd) -> io::Result<()>;
    fn unlink(&self, path: &str) -> io::Result<()>;
    fn stat(&self, path: &str) -> io::Result<RawStat>;
    fn lstat(&self, path: &str) -> io::Result<RawStat>;
    fn mkdir(&self, path: &str, mode: u32) -> io::Result<()>;
    fn rmdir(&self, path: &str) -> io::Result<()>;
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    fn link(&self, existing: &str, new: &str) -> io::Result<()>;
    fn symlink(&self, target: &str, link: &str) -> io::Result<()>;
    /// Copies at most `buf.len()` bytes of the link target, without a terminator.
    fn readlink(&self, path: &str, buf: &mut [u8]) -> io::Result<usize>;
    /// An empty `buf` asks for the value size only.
    fn getxattr(&self, path: &str, name: &str, buf: &mut [u8]) -> io::Result<usize>;
    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> io::Result<()>;
    fn removexattr(&self, path: &str, name: &str) -> io::Result<()>;
    /// NUL-separated attribute names. An empty `buf` asks for the size only.
    fn listxattr(&self, path: &str, buf: &mut [u8]) -> io::Result<usize>;
    fn statvfs(&self, path: &str) -> io::Result<RawStatVfs>;
    fn access(&self, path: &str, mode: i32) -> io::Result<()>;

    // Descriptor operations

    fn fchmod(&self, fd: &Self::Fd, mode: u32) -> io::Result<()>;
    fn fchown(&self, fd: &Self::Fd, uid: u32, gid: u32) -> io::Result<()>;
    fn futimens(&self, fd: &Self::Fd, times: [Timespec; 2]) -> io::Result<()>;
    fn fstat(&self, fd: &Self::Fd) -> io::Result<RawStat>;
    fn fsync(&self, fd: &Self::Fd) -> io::Result<()>;
    fn ftruncate(&self, fd: &Self::Fd, size: i64) -> io::Result<()>;
    /// Positioned read; leaves the implicit offset untouched.
    fn pread(&self, fd: &Self::Fd, buf: &mut [u8], offset: i64) -> io::Result<usize>;
    /// Positioned write; leaves the implicit offset untouched.
    fn pwrite(&self, fd: &Self::Fd, buf: &[u8], offset: i64) -> io::Result<usize>;
    fn read(&self, fd: &Self::Fd, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, fd: &Self::Fd, buf: &[u8]) -> io::Result<usize>;
    fn lseek(&self, fd: &Self::Fd, offset: i64, whence: i32) -> io::Result<i64>;
    fn fallocate(&self, fd: &Self::Fd, mode: i32, offset: i64, len: u64) -> io::Result<()>;
    fn fgetxattr(&self, fd: &Self::Fd, name: &str, buf: &mut [u8]) -> io::Result<usize>;
    fn fsetxattr(&self, fd: &Self::Fd, name: &str, value: &[u8], flags: i32) -> io::Result<()>;
    fn fremovexattr(&self, fd: &Self::Fd, name: &str) -> io::Result<()>;
    /// Next entry, or `None` at end of directory.
    fn readdir(&self, fd: &Self::Fd) -> io::Result<Option<RawDirent>>;
    /// Next entry with its stat record, or `None` at end of directory.
    fn readdirplus(&self, fd: &Self::Fd) -> io::Result<Option<(RawDirent, RawStat)>>;
}
