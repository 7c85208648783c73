//! Error types for the gfapi crate
//!
//! Every remote failure is surfaced with enough context for the caller to
//! decide what to do next: the operation, the path(s) involved and the
//! errno-carrying cause. This layer never retries.

use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::volume::VolumeState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Remote operation names, used to tag errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Chmod,
    Chown,
    Utimens,
    Truncate,
    Create,
    Open,
    OpenDir,
    Close,
    Unlink,
    Stat,
    Lstat,
    Mkdir,
    Rmdir,
    Rename,
    Link,
    Symlink,
    Readlink,
    Getxattr,
    Setxattr,
    Removexattr,
    Listxattr,
    Statvfs,
    Access,
    Fchmod,
    Fchown,
    Futimens,
    Fstat,
    Fsync,
    Ftruncate,
    Pread,
    Pwrite,
    Read,
    Write,
    Seek,
    Fallocate,
    Fgetxattr,
    Fsetxattr,
    Fremovexattr,
    Readdir,
    Readdirplus,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Chmod => "chmod",
            Op::Chown => "chown",
            Op::Utimens => "utimens",
            Op::Truncate => "truncate",
            Op::Create => "create",
            Op::Open => "open",
            Op::OpenDir => "opendir",
            Op::Close => "close",
            Op::Unlink => "unlink",
            Op::Stat => "stat",
            Op::Lstat => "lstat",
            Op::Mkdir => "mkdir",
            Op::Rmdir => "rmdir",
            Op::Rename => "rename",
            Op::Link => "link",
            Op::Symlink => "symlink",
            Op::Readlink => "readlink",
            Op::Getxattr => "getxattr",
            Op::Setxattr => "setxattr",
            Op::Removexattr => "removexattr",
            Op::Listxattr => "listxattr",
            Op::Statvfs => "statvfs",
            Op::Access => "access",
            Op::Fchmod => "fchmod",
            Op::Fchown => "fchown",
            Op::Futimens => "futimens",
            Op::Fstat => "fstat",
            Op::Fsync => "fsync",
            Op::Ftruncate => "ftruncate",
            Op::Pread => "pread",
            Op::Pwrite => "pwrite",
            Op::Read => "read",
            Op::Write => "write",
            Op::Seek => "lseek",
            Op::Fallocate => "fallocate",
            Op::Fgetxattr => "fgetxattr",
            Op::Fsetxattr => "fsetxattr",
            Op::Fremovexattr => "fremovexattr",
            Op::Readdir => "readdir",
            Op::Readdirplus => "readdirplus",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed operation on a path (or on a descriptor, using the path it was opened with).
///
/// Callers can branch on [`op`](Self::op) and [`path`](Self::path) without
/// parsing the message.
#[derive(Debug)]
pub struct PathError {
    pub op: Op,
    pub path: String,
    /// Second path of two-path operations (rename, link, symlink).
    pub target: Option<String>,
    pub source: io::Error,
}

impl PathError {
    pub fn new(op: Op, path: impl Into<String>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            target: None,
            source,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(ref target) => write!(
                f,
                "{} '{}' -> '{}': {}",
                self.op, self.path, target, self.source
            ),
            None => write!(f, "{} '{}': {}", self.op, self.path, self.source),
        }
    }
}

impl std::error::Error for PathError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Volume identity and volfile-source configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("volume name must not be empty")]
    MissingVolumeName,

    #[error("no volfile servers given for volume '{volume}'")]
    NoVolfileServers { volume: String },

    #[error("error creating mount object for volume '{volume}': {source}")]
    HandleCreation {
        volume: String,
        #[source]
        source: io::Error,
    },

    /// Registering one of the volfile servers failed. `index` is zero-based.
    #[error(
        "error adding host {} of {total} '{host}' as a volfile server for volume '{volume}': {source}",
        .index + 1
    )]
    VolfileServer {
        volume: String,
        index: usize,
        total: usize,
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("error setting volfile {path:?} for volume '{volume}': {source}")]
    Volfile {
        volume: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log directory {path:?} is not accessible: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error setting logging for volume '{volume}': {source}")]
    Logging {
        volume: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid volume configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Use of a handle that is closed, unknown or not (yet/anymore) usable.
#[derive(Error, Debug)]
pub enum HandleError {
    #[error("{op} on closed descriptor for '{path}'")]
    Closed { op: Op, path: String },

    #[error("descriptor for '{path}' is already closed")]
    AlreadyClosed { path: String },

    #[error("descriptor {id} is not registered with volume {volume}")]
    Stale { volume: u64, id: u64 },

    #[error("descriptor {id} is still in use and cannot be released")]
    Busy { id: u64 },

    #[error("volume '{volume}' is not mounted (state: {state})")]
    VolumeNotMounted { volume: String, state: VolumeState },
}

/// Caller mistakes detected before any remote call is attempted.
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("{op} requires a non-empty buffer")]
    ZeroLengthBuffer { op: Op },

    #[error("cannot {op} volume '{volume}' in state {state}")]
    InvalidTransition {
        volume: String,
        op: &'static str,
        state: VolumeState,
    },

    #[error("invalid open options: {0}")]
    InvalidOptions(&'static str),
}

/// Top-level error for all gfapi operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("mount of volume '{volume}' failed: {source}")]
    Mount {
        volume: String,
        #[source]
        source: io::Error,
    },

    #[error("failure to unmount volume '{volume}': {source}")]
    Unmount {
        volume: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Path(PathError),

    #[error(transparent)]
    Fd(PathError),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl Error {
    pub(crate) fn path(op: Op, path: &str, source: io::Error) -> Self {
        Error::Path(PathError::new(op, path, source))
    }

    pub(crate) fn fd(op: Op, path: &str, source: io::Error) -> Self {
        Error::Fd(PathError::new(op, path, source))
    }

    /// The path-shaped context, for both path and descriptor errors.
    pub fn as_path_error(&self) -> Option<&PathError> {
        match self {
            Error::Path(e) | Error::Fd(e) => Some(e),
            _ => None,
        }
    }

    /// The errno reported by the remote layer, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Path(e) | Error::Fd(e) => e.raw_os_error(),
            Error::Mount { source, .. } | Error::Unmount { source, .. } => source.raw_os_error(),
            Error::Config(
                ConfigError::HandleCreation { source, .. }
                | ConfigError::VolfileServer { source, .. }
                | ConfigError::Volfile { source, .. }
                | ConfigError::LogDirectory { source, .. }
                | ConfigError::Logging { source, .. },
            ) => source.raw_os_error(),
            _ => None,
        }
    }

    pub fn errno(&self) -> Option<Errno> {
        self.raw_os_error().map(Errno::from_raw)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Handle(_) => ErrorCategory::InvalidHandle,
            Error::Usage(_) | Error::Config(ConfigError::Parse(_)) => {
                ErrorCategory::InvalidArgument
            }
            Error::Config(ConfigError::MissingVolumeName | ConfigError::NoVolfileServers { .. }) => {
                ErrorCategory::InvalidArgument
            }
            _ => self
                .raw_os_error()
                .map_or(ErrorCategory::Io, ErrorCategory::from_errno),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

/// Semantic classification of errors, independent of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// ENOENT
    NotFound,
    /// EEXIST
    AlreadyExists,
    /// ENOTEMPTY
    NotEmpty,
    /// EISDIR
    IsDirectory,
    /// ENOTDIR
    NotDirectory,
    /// EINVAL, ERANGE, ENAMETOOLONG
    InvalidArgument,
    /// EACCES, EPERM, EROFS
    PermissionDenied,
    /// ENOTSUP, ENOSYS
    NotSupported,
    /// ENODATA: missing extended attribute
    NoData,
    /// Closed or unknown handle, volume not mounted (EBADF)
    InvalidHandle,
    /// Everything else (EIO)
    Io,
}

impl ErrorCategory {
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => Self::NotFound,
            libc::EEXIST => Self::AlreadyExists,
            libc::ENOTEMPTY => Self::NotEmpty,
            libc::EISDIR => Self::IsDirectory,
            libc::ENOTDIR => Self::NotDirectory,
            libc::EINVAL | libc::ERANGE | libc::ENAMETOOLONG => Self::InvalidArgument,
            libc::EACCES | libc::EPERM | libc::EROFS => Self::PermissionDenied,
            libc::ENOTSUP | libc::ENOSYS => Self::NotSupported,
            libc::ENODATA => Self::NoData,
            libc::EBADF => Self::InvalidHandle,
            _ => Self::Io,
        }
    }

    /// Converts this category to a representative POSIX errno value.
    pub fn to_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::InvalidArgument => libc::EINVAL,
            Self::PermissionDenied => libc::EACCES,
            Self::NotSupported => libc::ENOTSUP,
            Self::NoData => libc::ENODATA,
            Self::InvalidHandle => libc::EBADF,
            Self::Io => libc::EIO,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Path(e) | Error::Fd(e) => e.source.kind(),
            Error::Mount { source, .. } | Error::Unmount { source, .. } => source.kind(),
            Error::Usage(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Shorthand for an `io::Error` carrying a raw errno.
pub(crate) fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}
