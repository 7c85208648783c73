//! Mounted volumes.
//!
//! A [`Volume`] goes through `New -> Configured -> Mounted -> Unmounted`.
//! Transitions take `&mut self`, so they cannot race with open
//! descriptors (which borrow the volume); everything else takes `&self` and
//! may be issued from several threads once the volume is mounted.
//!
//! - `lifecycle`: configuration, logging, mount and unmount.
//! - `path_ops`: path-based metadata and namespace operations, open/create.
//! - [`mkdir_all`]: recursive directory creation over [`DirOps`].
//! - [`handles`]: the registry owning every open remote descriptor.

mod config;
pub mod handles;
mod lifecycle;
mod mkdir_all;
mod path_ops;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub use config::{
    DEFAULT_LOG_DIR, DEFAULT_VOLFILE_PORT, LOG_DIR_ENV, LogConfig, LogLevel, LogTarget,
    Transport, VolfileServer, VolfileSource, VolumeConfig, default_log_dir,
};
pub use handles::{FdToken, HandleRegistry};
pub use mkdir_all::{DirOps, mkdir_all};

use crate::backend::{Backend, RemoteFs};
use crate::error::{HandleError, Result};

static NEXT_VOLUME_ID: AtomicU64 = AtomicU64::new(1);

/// Remote descriptor type of a backend.
pub(crate) type FdOf<B> = <<B as Backend>::Fs as RemoteFs>::Fd;

/// Lifecycle state of a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeState {
    /// Created, no volfile source yet.
    New,
    /// Volfile source set; logging may be configured.
    Configured,
    /// Connected; path and descriptor operations are allowed.
    Mounted,
    /// Torn down. Terminal.
    Unmounted,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VolumeState::New => "new",
            VolumeState::Configured => "configured",
            VolumeState::Mounted => "mounted",
            VolumeState::Unmounted => "unmounted",
        })
    }
}

/// One mount session against a named remote volume.
///
/// Dropping a volume that was not unmounted closes any descriptors still
/// registered and finalizes the remote object, logging failures.
pub struct Volume<B: Backend> {
    id: u64,
    name: String,
    backend: B,
    fs: Option<B::Fs>,
    state: VolumeState,
    source: Option<VolfileSource>,
    logging: Mutex<Option<LogConfig>>,
    handles: HandleRegistry<FdOf<B>>,
}

impl<B: Backend> Volume<B> {
    /// A volume named `name`, not yet configured.
    pub fn new(backend: B, name: impl Into<String>) -> Self {
        let id = NEXT_VOLUME_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            name: name.into(),
            backend,
            fs: None,
            state: VolumeState::New,
            source: None,
            logging: Mutex::new(None),
            handles: HandleRegistry::new(id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn is_mounted(&self) -> bool {
        self.state == VolumeState::Mounted
    }

    /// Volfile source recorded at configuration.
    pub fn source(&self) -> Option<&VolfileSource> {
        self.source.as_ref()
    }

    /// Logging settings last applied successfully.
    pub fn logging(&self) -> Option<LogConfig> {
        self.logging.lock().clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of descriptors currently open against this volume.
    pub fn open_descriptors(&self) -> usize {
        self.handles.len()
    }

    /// The remote object, provided the volume is mounted.
    pub(crate) fn mounted(&self) -> Result<&B::Fs> {
        match (self.state, self.fs.as_ref()) {
            (VolumeState::Mounted, Some(fs)) => Ok(fs),
            _ => Err(HandleError::VolumeNotMounted {
                volume: self.name.clone(),
                state: self.state,
            }
            .into()),
        }
    }

    pub(crate) fn registry(&self) -> &HandleRegistry<FdOf<B>> {
        &self.handles
    }
}

impl<B: Backend> fmt::Debug for Volume<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("source", &self.source)
            .field("open_descriptors", &self.handles.len())
            .finish_non_exhaustive()
    }
}

/// Read a variable-length value through a call following the size-probe
/// convention: an empty buffer returns the required length.
///
/// Retries when the value grows between the probe and the read (`ERANGE`).
pub(crate) fn read_sized(
    mut call: impl FnMut(&mut [u8]) -> io::Result<usize>,
) -> io::Result<Vec<u8>> {
    loop {
        let len = call(&mut [])?;
        let mut buf = vec![0u8; len];
        if len == 0 {
            return Ok(buf);
        }
        match call(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Split a NUL-separated attribute name list.
pub(crate) fn split_names(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_names() {
        assert_eq!(
            split_names(b"user.a\0trusted.b\0"),
            vec!["user.a".to_string(), "trusted.b".to_string()]
        );
        assert!(split_names(b"").is_empty());
    }

    #[test]
    fn test_read_sized_retries_on_growth() {
        let mut value = b"abc".to_vec();
        let mut grown = false;
        let out = read_sized(|buf| {
            if buf.is_empty() {
                return Ok(value.len());
            }
            // Value grows between the first probe and the read.
            if !grown {
                grown = true;
                value.extend_from_slice(b"def");
            }
            if buf.len() < value.len() {
                return Err(io::Error::from_raw_os_error(libc::ERANGE));
            }
            buf[..value.len()].copy_from_slice(&value);
            Ok(value.len())
        })
        .unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_read_sized_empty_value() {
        let out = read_sized(|_| Ok(0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VolumeState::Mounted.to_string(), "mounted");
        assert_eq!(VolumeState::New.to_string(), "new");
    }
}
