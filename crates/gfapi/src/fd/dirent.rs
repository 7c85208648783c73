//! Directory entries.

use crate::backend::{DIRENT_NAME_LEN, RawDirent};
use crate::stat::{FileKind, FileMetadata, RawStat};

/// The name stored in a raw directory entry record.
///
/// The name ends at the first NUL byte or at the record's bound, whichever
/// comes first. The bound is the declared name length when the record
/// carries one, capped at the size of the name buffer; a name that fills the
/// whole buffer has no terminator and is returned in full.
pub fn dirent_name(raw: &RawDirent) -> &[u8] {
    let bound = raw
        .namlen
        .map_or(DIRENT_NAME_LEN, usize::from)
        .min(raw.name.len());
    let name = &raw.name[..bound];
    match name.iter().position(|&b| b == 0) {
        Some(nul) => &name[..nul],
        None => name,
    }
}

/// One entry yielded by directory enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    /// Present when enumerated with metadata.
    pub metadata: Option<FileMetadata>,
    d_type: u8,
}

impl DirEntry {
    pub(crate) fn from_raw(raw: &RawDirent, stat: Option<&RawStat>) -> Self {
        let name = String::from_utf8_lossy(dirent_name(raw)).into_owned();
        let metadata = stat.map(|st| FileMetadata::from_raw(st, &name));
        Self {
            name,
            ino: raw.ino,
            metadata,
            d_type: raw.kind,
        }
    }

    /// Type from the attached metadata, else from the entry's type byte.
    pub fn file_type(&self) -> FileKind {
        self.metadata
            .as_ref()
            .map_or_else(|| FileKind::from_dirent_type(self.d_type), |meta| meta.kind)
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// `.` or `..`.
    pub(crate) fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}
