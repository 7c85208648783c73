//! Client-side access layer for GlusterFS volumes.
//!
//! This crate exposes the gfapi call surface (mount a volume by name, then
//! run POSIX-style operations against files that live on the storage
//! cluster) with owned handles and structured errors.
//!
//! # Architecture
//!
//! - [`backend`]: the remote call surface as traits ([`Backend`], [`RemoteFs`]),
//!   an in-memory implementation and, behind the `native` feature, the libgfapi FFI.
//! - [`volume`]: the [`Volume`] lifecycle (`New -> Configured -> Mounted -> Unmounted`),
//!   path operations, the descriptor registry and recursive directory creation.
//! - [`fd`]: open descriptors ([`File`]) with positioned and sequential I/O and
//!   directory enumeration.
//! - [`stat`]: translation between wire stat records and [`FileMetadata`].
//!
//! # Example
//!
//! ```
//! use gfapi::{MemoryBackend, OpenFlags, Volume};
//!
//! let mut volume = Volume::new(MemoryBackend::new(), "gv0");
//! volume.init(&["server1", "server2"])?;
//! volume.mount()?;
//!
//! volume.mkdir_all("/data/logs", 0o755)?;
//! let mut file = volume.create("/data/logs/today", OpenFlags::RDWR, 0o644)?;
//! file.write(b"hello")?;
//! file.close()?;
//! drop(file);
//!
//! volume.unmount()?;
//! # Ok::<(), gfapi::Error>(())
//! ```

pub mod backend;
pub mod error;
pub mod fd;
pub mod options;
pub mod stat;
pub mod volume;

pub use backend::memory::MemoryBackend;
pub use backend::{Backend, RemoteFs};
pub use error::{Error, ErrorCategory, Op, PathError, Result};
pub use fd::{DirEntry, File};
pub use options::{AccessMode, FallocateMode, OpenFlags, OpenOptions, XattrFlags};
pub use stat::{FileKind, FileMetadata, FsStats, Timespec};
pub use volume::{
    LogConfig, LogLevel, LogTarget, Transport, VolfileServer, VolfileSource, Volume, VolumeConfig,
    VolumeState, mkdir_all,
};

#[cfg(all(feature = "native", target_os = "linux"))]
pub use backend::native::NativeBackend;
