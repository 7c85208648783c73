//! Registry of open descriptors for one volume.
//!
//! Every open remote descriptor is owned by the registry and referred to by
//! an [`FdToken`]: an exclusively owned, non-`Clone` ticket that can be
//! released exactly once. Presenting a released or foreign token yields
//! [`HandleError::Stale`] instead of touching freed resources.
//!
//! # Handle Lifecycle
//!
//! 1. **Register**: the remote descriptor is stored under a fresh id
//! 2. **Get**: a shared reference is handed out for the duration of one call
//! 3. **Release**: the descriptor is removed and returned for closing
//!
//! The registry itself is safe for concurrent use. Whether concurrent calls
//! on *one* descriptor are meaningful is up to the caller: positioned I/O is,
//! implicit-offset I/O is not.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::HandleError;

/// Proof of ownership of one registered descriptor.
///
/// Ids start at 1; 0 is never handed out.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a registered descriptor leaks until its token is released"]
pub struct FdToken {
    volume: u64,
    id: u64,
}

impl FdToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }
}

/// Thread-safe table of open descriptors with auto-incrementing ids.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    volume: u64,
    handles: DashMap<u64, Arc<T>>,
    next_id: AtomicU64,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry for the volume identified by `volume`.
    pub fn new(volume: u64) -> Self {
        Self {
            volume,
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take ownership of `value` and return its token.
    pub fn register(&self, value: T) -> FdToken {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Skip 0 after wrap-around and ids still held by long-lived entries.
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(Arc::new(value));
                return FdToken {
                    volume: self.volume,
                    id,
                };
            }
        }
    }

    /// Shared access to the descriptor behind `token`.
    pub fn get(&self, token: &FdToken) -> Result<Arc<T>, HandleError> {
        self.check_owner(token)?;
        self.handles
            .get(&token.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(HandleError::Stale {
                volume: token.volume,
                id: token.id,
            })
    }

    /// Remove the descriptor behind `token` and hand it back for closing.
    ///
    /// Fails with [`HandleError::Busy`] while another caller still holds a
    /// reference obtained from [`get`](Self::get); the entry then stays
    /// registered and is reclaimed by [`drain`](Self::drain).
    pub fn release(&self, token: FdToken) -> Result<T, HandleError> {
        self.check_owner(&token)?;
        let (id, value) = self.handles.remove(&token.id).ok_or(HandleError::Stale {
            volume: token.volume,
            id: token.id,
        })?;
        Arc::try_unwrap(value).map_err(|shared| {
            self.handles.insert(id, shared);
            HandleError::Busy { id }
        })
    }

    /// Remove every entry that is not currently borrowed.
    pub fn drain(&self) -> Vec<(u64, T)> {
        let ids: Vec<u64> = self.handles.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.handles.remove(&id))
            .filter_map(|(id, value)| match Arc::try_unwrap(value) {
                Ok(value) => Some((id, value)),
                Err(shared) => {
                    self.handles.insert(id, shared);
                    None
                }
            })
            .collect()
    }

    pub fn contains(&self, token: &FdToken) -> bool {
        token.volume == self.volume && self.handles.contains_key(&token.id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn check_owner(&self, token: &FdToken) -> Result<(), HandleError> {
        if token.volume != self.volume {
            return Err(HandleError::Stale {
                volume: token.volume,
                id: token.id,
            });
        }
        Ok(())
    }
}
