//! Typed flags for open, access, xattr and fallocate calls.

use bitflags::bitflags;

use crate::error::UsageError;

bitflags! {
    /// `O_*` flags passed to the remote open/create calls.
    ///
    /// Read-only access is the empty set, as on POSIX where `O_RDONLY == 0`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;
        const CREATE = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
        const TRUNC = libc::O_TRUNC;
        const APPEND = libc::O_APPEND;
        const DIRECTORY = libc::O_DIRECTORY;
        const NOFOLLOW = libc::O_NOFOLLOW;
        const SYNC = libc::O_SYNC;
        const DSYNC = libc::O_DSYNC;
    }
}

impl OpenFlags {
    pub const RDONLY: Self = Self::empty();

    pub fn is_readable(self) -> bool {
        !self.contains(Self::WRONLY)
    }

    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }
}

/// Builder for open flags, following the rules of `std::fs::OpenOptions`.
///
/// ```
/// use gfapi::{OpenFlags, OpenOptions};
///
/// let flags = OpenOptions::new().write(true).create(true).truncate(true).flags()?;
/// assert_eq!(flags, OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::TRUNC);
/// # Ok::<(), gfapi::error::UsageError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
    mode: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            mode: 0o666,
        }
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Create the file, failing if it already exists.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    /// Permission bits used when the file is created.
    pub fn mode(&mut self, mode: u32) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn creation_mode(&self) -> u32 {
        self.mode
    }

    /// Resolve the options into open flags.
    pub fn flags(&self) -> Result<OpenFlags, UsageError> {
        let writable = self.write || self.append;
        let mut flags = match (self.read, writable) {
            (true, false) => OpenFlags::RDONLY,
            (false, true) => OpenFlags::WRONLY,
            (true, true) => OpenFlags::RDWR,
            (false, false) => {
                return Err(UsageError::InvalidOptions(
                    "one of read, write or append must be set",
                ));
            }
        };
        if self.append {
            flags |= OpenFlags::APPEND;
        }

        if !writable && (self.truncate || self.create || self.create_new) {
            return Err(UsageError::InvalidOptions(
                "truncate, create and create_new require write access",
            ));
        }
        if self.truncate && self.append {
            return Err(UsageError::InvalidOptions(
                "truncate and append are mutually exclusive",
            ));
        }

        if self.create_new {
            flags |= OpenFlags::CREATE | OpenFlags::EXCL;
        } else if self.create {
            flags |= OpenFlags::CREATE;
        }
        if self.truncate {
            flags |= OpenFlags::TRUNC;
        }
        Ok(flags)
    }
}

bitflags! {
    /// Predicate for [`Volume::access`](crate::Volume::access).
    ///
    /// The empty set checks for existence only (`F_OK`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: i32 {
        const READ = libc::R_OK;
        const WRITE = libc::W_OK;
        const EXECUTE = libc::X_OK;
    }
}

impl AccessMode {
    pub const EXISTS: Self = Self::empty();
}

/// `flags` argument of setxattr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum XattrFlags {
    /// Create or replace.
    #[default]
    Any,
    /// Fail with `EEXIST` if the attribute exists.
    Create,
    /// Fail with `ENODATA` if the attribute does not exist.
    Replace,
}

pub const XATTR_CREATE: i32 = 1;
pub const XATTR_REPLACE: i32 = 2;

impl XattrFlags {
    pub fn as_raw(self) -> i32 {
        match self {
            XattrFlags::Any => 0,
            XattrFlags::Create => XATTR_CREATE,
            XattrFlags::Replace => XATTR_REPLACE,
        }
    }
}

/// Mode of a space pre-allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FallocateMode {
    /// Allocate and extend the apparent size if the range ends past EOF.
    #[default]
    Default,
    /// Allocate without changing the apparent size.
    KeepSize,
}

pub const FALLOC_FL_KEEP_SIZE: i32 = 1;

impl FallocateMode {
    pub fn as_raw(self) -> i32 {
        match self {
            FallocateMode::Default => 0,
            FallocateMode::KeepSize => FALLOC_FL_KEEP_SIZE,
        }
    }
}
