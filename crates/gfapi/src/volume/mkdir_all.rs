//! Recursive directory creation.
//!
//! The remote layer only creates one directory at a time and fails when the
//! parent is missing. [`mkdir_all`] builds the missing chain on top of
//! [`DirOps`], and tolerates a concurrent creator winning the race for any
//! component.

use tracing::trace;

use crate::error::{Error, Op, Result, errno};
use crate::stat::FileMetadata;

/// The directory primitives recursive creation needs.
pub trait DirOps {
    /// Metadata following symlinks.
    fn stat(&self, path: &str) -> Result<FileMetadata>;
    /// Metadata of the entry itself.
    fn lstat(&self, path: &str) -> Result<FileMetadata>;
    /// Create exactly one directory.
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
}

/// Create `path` and every missing ancestor with permission bits `mode`.
///
/// - Succeeds immediately if `path` already is a directory.
/// - Fails with `ENOTDIR` if `path` exists and is not a directory.
/// - If creating `path` fails but it is a directory afterwards (someone
///   else created it), succeeds; otherwise returns the creation error.
///
/// Ancestors created before a failure are left in place.
pub fn mkdir_all<D: DirOps + ?Sized>(ops: &D, path: &str, mode: u32) -> Result<()> {
    match ops.stat(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => return Err(Error::path(Op::Mkdir, path, errno(libc::ENOTDIR))),
        Err(_) => {}
    }

    let bytes = path.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b'/' {
        end -= 1;
    }
    let mut start = end;
    while start > 0 && bytes[start - 1] != b'/' {
        start -= 1;
    }
    // `start - 1` is the separator before the last component; a parent of
    // "" or "/" needs no creating.
    if start > 1 {
        mkdir_all(ops, &path[..start - 1], mode)?;
    }

    trace!(path, mode = format_args!("{mode:o}"), "mkdir");
    if let Err(err) = ops.mkdir(path, mode) {
        if let Ok(meta) = ops.lstat(path)
            && meta.is_dir()
        {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::{FileKind, RawStat};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    /// Flat namespace keyed by normalized path.
    #[derive(Default)]
    struct FakeDirs {
        entries: RefCell<BTreeMap<String, FileKind>>,
        mkdir_calls: RefCell<Vec<String>>,
        /// Paths a "concurrent creator" makes right before our mkdir lands.
        raced: BTreeSet<String>,
        /// Paths whose mkdir fails with this errno without creating anything.
        denied: BTreeMap<String, i32>,
    }

    fn normalize(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => normalize(&path[..idx]),
        }
    }

    impl FakeDirs {
        fn with(entries: &[(&str, FileKind)]) -> Self {
            let fake = Self::default();
            fake.entries
                .borrow_mut()
                .insert("/".to_string(), FileKind::Directory);
            for (path, kind) in entries {
                fake.entries.borrow_mut().insert((*path).to_string(), *kind);
            }
            fake
        }

        fn meta(&self, path: &str, op: Op) -> Result<FileMetadata> {
            let kind = self
                .entries
                .borrow()
                .get(&normalize(path))
                .copied()
                .ok_or_else(|| Error::path(op, path, errno(libc::ENOENT)))?;
            let raw = RawStat {
                mode: kind.mode_bits() | 0o755,
                ..RawStat::default()
            };
            Ok(FileMetadata::from_raw(&raw, path))
        }

        fn dirs(&self) -> Vec<String> {
            self.entries
                .borrow()
                .iter()
                .filter(|(_, kind)| **kind == FileKind::Directory)
                .map(|(path, _)| path.clone())
                .collect()
        }
    }

    impl DirOps for FakeDirs {
        fn stat(&self, path: &str) -> Result<FileMetadata> {
            self.meta(path, Op::Stat)
        }

        fn lstat(&self, path: &str) -> Result<FileMetadata> {
            self.meta(path, Op::Lstat)
        }

        fn mkdir(&self, path: &str, _mode: u32) -> Result<()> {
            let path = normalize(path);
            self.mkdir_calls.borrow_mut().push(path.clone());
            if let Some(&code) = self.denied.get(&path) {
                return Err(Error::path(Op::Mkdir, &path, errno(code)));
            }
            if self.raced.contains(&path) {
                self.entries
                    .borrow_mut()
                    .insert(path.clone(), FileKind::Directory);
            }
            let mut entries = self.entries.borrow_mut();
            if entries.contains_key(&path) {
                return Err(Error::path(Op::Mkdir, &path, errno(libc::EEXIST)));
            }
            match entries.get(&parent(&path)) {
                Some(FileKind::Directory) => {}
                Some(_) => return Err(Error::path(Op::Mkdir, &path, errno(libc::ENOTDIR))),
                None => return Err(Error::path(Op::Mkdir, &path, errno(libc::ENOENT))),
            }
            entries.insert(path, FileKind::Directory);
            Ok(())
        }
    }

    #[test]
    fn test_creates_missing_chain_in_order() {
        let fake = FakeDirs::with(&[("/a", FileKind::Directory)]);
        mkdir_all(&fake, "/a/b/c/d", 0o755).unwrap();
        assert_eq!(
            *fake.mkdir_calls.borrow(),
            vec!["/a/b", "/a/b/c", "/a/b/c/d"]
        );
        assert_eq!(fake.dirs(), vec!["/", "/a", "/a/b", "/a/b/c", "/a/b/c/d"]);
    }

    #[test]
    fn test_existing_directory_is_noop() {
        let fake = FakeDirs::with(&[("/a", FileKind::Directory)]);
        mkdir_all(&fake, "/a", 0o755).unwrap();
        mkdir_all(&fake, "/a/", 0o755).unwrap();
        assert!(fake.mkdir_calls.borrow().is_empty());
    }

    #[test]
    fn test_trailing_and_repeated_separators() {
        let fake = FakeDirs::with(&[]);
        mkdir_all(&fake, "/x//y/", 0o755).unwrap();
        assert_eq!(fake.dirs(), vec!["/", "/x", "/x//y"]);
    }

    #[test]
    fn test_target_is_file() {
        let fake = FakeDirs::with(&[("/f", FileKind::Regular)]);
        let err = mkdir_all(&fake, "/f", 0o755).unwrap_err();
        let path_err = err.as_path_error().unwrap();
        assert_eq!(path_err.op(), Op::Mkdir);
        assert_eq!(path_err.raw_os_error(), Some(libc::ENOTDIR));
    }

    #[test]
    fn test_file_in_ancestor_creates_nothing() {
        let fake = FakeDirs::with(&[("/a", FileKind::Directory), ("/a/f", FileKind::Regular)]);
        let before = fake.dirs();
        let err = mkdir_all(&fake, "/a/f/g/h", 0o755).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTDIR));
        assert_eq!(fake.dirs(), before);
        assert!(fake.mkdir_calls.borrow().is_empty());
    }

    #[test]
    fn test_lost_race_is_success() {
        let mut fake = FakeDirs::with(&[]);
        fake.raced.insert("/shared".to_string());
        mkdir_all(&fake, "/shared/child", 0o755).unwrap();
        assert_eq!(fake.dirs(), vec!["/", "/shared", "/shared/child"]);
    }

    #[test]
    fn test_original_error_is_kept() {
        let mut fake = FakeDirs::with(&[("/a", FileKind::Directory)]);
        fake.denied.insert("/a/b".to_string(), libc::EACCES);
        let err = mkdir_all(&fake, "/a/b/c", 0o755).unwrap_err();
        let path_err = err.as_path_error().unwrap();
        assert_eq!(path_err.op(), Op::Mkdir);
        assert_eq!(path_err.path(), "/a/b");
        assert_eq!(path_err.raw_os_error(), Some(libc::EACCES));
    }

    #[test]
    fn test_partial_progress_is_kept() {
        let mut fake = FakeDirs::with(&[]);
        fake.denied.insert("/p/q/r".to_string(), libc::ENOSPC);
        assert!(mkdir_all(&fake, "/p/q/r", 0o755).is_err());
        assert_eq!(fake.dirs(), vec!["/", "/p", "/p/q"]);
    }

    #[test]
    fn test_relative_path() {
        let fake = FakeDirs::with(&[]);
        // Relative components are created relative to the root of the fake.
        mkdir_all(&fake, "rel", 0o755).unwrap();
        assert_eq!(*fake.mkdir_calls.borrow(), vec!["rel"]);
    }
}
