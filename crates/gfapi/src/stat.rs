//! Translation between the wire stat representation and host metadata.
//!
//! The remote call surface reports `struct stat` / `struct statvfs` shaped
//! records ([`RawStat`], [`RawStatVfs`]). Callers see [`FileMetadata`] and
//! [`FsStats`], which are plain values derived from one snapshot and never
//! refreshed behind the caller's back.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File type mask of `st_mode`.
pub const S_IFMT: u32 = 0o170000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Permission and special bits (setuid, setgid, sticky, rwx).
pub const MODE_PERM_MASK: u32 = 0o7777;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A `struct timespec` as carried on the wire.
///
/// `nsec` is always normalized into `0..1_000_000_000`, also for instants
/// before the Unix epoch (where `sec` is negative).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Convert back into a host timestamp.
    pub fn to_system_time(self) -> SystemTime {
        let nanos = Duration::from_nanos(self.nsec.clamp(0, NANOS_PER_SEC - 1) as u64);
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.sec as u64) + nanos
        } else {
            UNIX_EPOCH - Duration::from_secs(self.sec.unsigned_abs()) + nanos
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self {
                sec: after.as_secs() as i64,
                nsec: i64::from(after.subsec_nanos()),
            },
            Err(err) => {
                let before = err.duration();
                let mut sec = -(before.as_secs() as i64);
                let mut nsec = -i64::from(before.subsec_nanos());
                if nsec < 0 {
                    sec -= 1;
                    nsec += NANOS_PER_SEC;
                }
                Self { sec, nsec }
            }
        }
    }
}

impl From<Timespec> for SystemTime {
    fn from(ts: Timespec) -> Self {
        ts.to_system_time()
    }
}

/// Mirror of `struct stat` as returned by the remote layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Mirror of `struct statvfs` as returned by the remote layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// Coarse file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    /// Devices, FIFOs, sockets.
    Other,
}

impl FileKind {
    /// Classify the type bits of an `st_mode`.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }

    /// Classify a `d_type` byte from a directory entry.
    ///
    /// `DT_UNKNOWN` and anything unrecognized map to [`FileKind::Other`].
    pub fn from_dirent_type(d_type: u8) -> Self {
        match d_type {
            DT_REG => FileKind::Regular,
            DT_DIR => FileKind::Directory,
            DT_LNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }

    /// The `d_type` byte for this kind.
    pub fn dirent_type(self) -> u8 {
        match self {
            FileKind::Regular => DT_REG,
            FileKind::Directory => DT_DIR,
            FileKind::Symlink => DT_LNK,
            FileKind::Other => DT_UNKNOWN,
        }
    }

    /// The `S_IF*` type bits for this kind (zero for [`FileKind::Other`]).
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::Other => 0,
        }
    }
}

pub const DT_UNKNOWN: u8 = 0;
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;

/// Metadata snapshot of one filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Final path component the metadata was fetched for.
    pub name: String,
    /// Full `st_mode` (type and permission bits).
    pub mode: u32,
    pub size: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub changed: SystemTime,
    pub dev: u64,
    pub ino: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub kind: FileKind,
}

impl FileMetadata {
    /// Build metadata from a raw stat record.
    ///
    /// `path` may be a full path; only its last component is kept as the name.
    pub fn from_raw(raw: &RawStat, path: &str) -> Self {
        Self {
            name: base_name(path).to_string(),
            mode: raw.mode,
            size: u64::try_from(raw.size).unwrap_or(0),
            nlink: raw.nlink,
            uid: raw.uid,
            gid: raw.gid,
            accessed: raw.atime.to_system_time(),
            modified: raw.mtime.to_system_time(),
            changed: raw.ctime.to_system_time(),
            dev: raw.dev,
            ino: raw.ino,
            blksize: u64::try_from(raw.blksize).unwrap_or(0),
            blocks: u64::try_from(raw.blocks).unwrap_or(0),
            kind: FileKind::from_mode(raw.mode),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Permission bits including setuid/setgid/sticky.
    pub fn permissions(&self) -> u32 {
        self.mode & MODE_PERM_MASK
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Last component of a slash-separated path, ignoring trailing slashes.
///
/// The root (or an all-slash path) is reported as `/`.
pub(crate) fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Space and inode usage of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub fragment_size: u64,
    /// Total blocks, in `fragment_size` units.
    pub blocks: u64,
    pub blocks_free: u64,
    /// Free blocks available to unprivileged callers.
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub files_available: u64,
    pub fsid: u64,
    pub flags: u64,
    pub name_max: u64,
}

impl FsStats {
    pub fn total_bytes(&self) -> u64 {
        self.blocks.saturating_mul(self.fragment_size)
    }

    pub fn free_bytes(&self) -> u64 {
        self.blocks_free.saturating_mul(self.fragment_size)
    }

    pub fn available_bytes(&self) -> u64 {
        self.blocks_available.saturating_mul(self.fragment_size)
    }
}

impl From<RawStatVfs> for FsStats {
    fn from(raw: RawStatVfs) -> Self {
        // statvfs permits frsize == 0 on some servers; fall back to bsize.
        let fragment_size = if raw.frsize == 0 { raw.bsize } else { raw.frsize };
        Self {
            block_size: raw.bsize,
            fragment_size,
            blocks: raw.blocks,
            blocks_free: raw.bfree,
            blocks_available: raw.bavail,
            files: raw.files,
            files_free: raw.ffree,
            files_available: raw.favail,
            fsid: raw.fsid,
            flags: raw.flag,
            name_max: raw.namemax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(mode: u32, size: i64) -> RawStat {
        RawStat {
            dev: 7,
            ino: 42,
            mode,
            nlink: 1,
            uid: 1000,
            gid: 100,
            size,
            blksize: 4096,
            blocks: 8,
            atime: Timespec::new(10, 5),
            mtime: Timespec::new(20, 0),
            ctime: Timespec::new(30, 999_999_999),
            ..RawStat::default()
        }
    }

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(S_IFDIR | 0o755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(S_IFREG | 0o644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(S_IFLNK | 0o777), FileKind::Symlink);
        // FIFO
        assert_eq!(FileKind::from_mode(0o010000 | 0o644), FileKind::Other);
    }

    #[test]
    fn test_kind_dirent_type_round_trip() {
        for kind in [FileKind::Regular, FileKind::Directory, FileKind::Symlink] {
            assert_eq!(FileKind::from_dirent_type(kind.dirent_type()), kind);
        }
        assert_eq!(FileKind::from_dirent_type(DT_UNKNOWN), FileKind::Other);
    }

    #[test]
    fn test_metadata_from_raw() {
        let meta = FileMetadata::from_raw(&raw(S_IFREG | 0o4755, 1234), "/a/b/report.txt");
        assert_eq!(meta.name, "report.txt");
        assert!(meta.is_file());
        assert!(!meta.is_dir());
        assert_eq!(meta.permissions(), 0o4755);
        assert_eq!(meta.len(), 1234);
        assert_eq!(meta.uid, 1000);
        assert_eq!(meta.gid, 100);
        assert_eq!(meta.ino, 42);
        assert_eq!(
            meta.accessed,
            UNIX_EPOCH + Duration::from_secs(10) + Duration::from_nanos(5)
        );
        assert_eq!(
            meta.changed,
            UNIX_EPOCH + Duration::from_secs(30) + Duration::from_nanos(999_999_999)
        );
    }

    #[test]
    fn test_metadata_negative_size_clamps_to_zero() {
        let meta = FileMetadata::from_raw(&raw(S_IFREG, -1), "x");
        assert_eq!(meta.size, 0);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c"), "c");
        assert_eq!(base_name("/a/b/c/"), "c");
        assert_eq!(base_name("c"), "c");
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("///"), "/");
        assert_eq!(base_name(""), "");
    }

    #[test]
    fn test_timespec_after_epoch() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let ts = Timespec::from(t);
        assert_eq!(ts, Timespec::new(1_700_000_000, 123_456_789));
        assert_eq!(ts.to_system_time(), t);
    }

    #[test]
    fn test_timespec_before_epoch_is_normalized() {
        let t = UNIX_EPOCH - Duration::new(1, 250_000_000);
        let ts = Timespec::from(t);
        assert_eq!(ts, Timespec::new(-2, 750_000_000));
        assert_eq!(ts.to_system_time(), t);
    }

    #[test]
    fn test_timespec_whole_seconds_before_epoch() {
        let t = UNIX_EPOCH - Duration::from_secs(5);
        let ts = Timespec::from(t);
        assert_eq!(ts, Timespec::new(-5, 0));
        assert_eq!(SystemTime::from(ts), t);
    }

    #[test]
    fn test_fs_stats_from_raw() {
        let stats = FsStats::from(RawStatVfs {
            bsize: 4096,
            frsize: 0,
            blocks: 100,
            bfree: 40,
            bavail: 30,
            files: 10,
            ffree: 5,
            favail: 5,
            namemax: 255,
            ..RawStatVfs::default()
        });
        assert_eq!(stats.fragment_size, 4096);
        assert_eq!(stats.total_bytes(), 409_600);
        assert_eq!(stats.free_bytes(), 163_840);
        assert_eq!(stats.available_bytes(), 122_880);
        assert_eq!(stats.name_max, 255);
    }
}
