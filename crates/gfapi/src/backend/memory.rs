//! In-process implementation of the remote call surface.
//!
//! [`MemoryBackend`] keeps one inode tree per volume name, shared by every
//! [`MemoryFs`] created for that name, so data written through one mount is
//! visible to the next. It reproduces the errno behavior of the remote layer
//! for the calls this crate uses: `EISDIR` from `open` on directories,
//! `.`/`..` in directory listings, the zero-length size probe of the xattr
//! calls, per-descriptor offsets, hard links and symlink resolution with
//! loop detection.
//!
//! Fault injection hooks (`fail_*`, `reject_server`, `mark_unreachable`)
//! let tests drive the lifecycle error paths.
//!
//! Permission checks are evaluated against the owner bits only; the
//! backend has no notion of caller credentials.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Backend, RawDirent, RemoteFs};
use crate::error::errno;
use crate::options::{FALLOC_FL_KEEP_SIZE, XATTR_CREATE, XATTR_REPLACE};
use crate::stat::{FileKind, MODE_PERM_MASK, RawStat, RawStatVfs, Timespec};

const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u64 = 4096;
const DEFAULT_CAPACITY: u64 = 1 << 30;
const DEFAULT_MAX_INODES: u64 = 1 << 20;
const NAME_MAX: usize = 255;
const SYMLOOP_MAX: usize = 40;
const XATTR_NAMESPACES: [&str; 4] = ["user.", "trusted.", "security.", "system."];

#[derive(Debug, Default)]
struct Faults {
    new_fs: Option<i32>,
    rejected_servers: HashMap<String, i32>,
    unreachable: HashSet<String>,
    init: Option<i32>,
    fini: Option<i32>,
}

#[derive(Debug)]
struct Shared {
    faults: Faults,
    volumes: HashMap<String, Arc<Mutex<Tree>>>,
    connections: HashMap<String, String>,
    logging: HashMap<String, (Option<PathBuf>, i32)>,
    capacity: u64,
    max_inodes: u64,
}

/// Factory for in-memory volumes. Cloning shares the underlying volumes.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_MAX_INODES)
    }

    /// Volumes created by this backend hold at most `capacity` bytes of file
    /// data and `max_inodes` entries.
    pub fn with_limits(capacity: u64, max_inodes: u64) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                faults: Faults::default(),
                volumes: HashMap::new(),
                connections: HashMap::new(),
                logging: HashMap::new(),
                capacity,
                max_inodes,
            })),
        }
    }

    /// Make `glfs_new` fail with `code`.
    pub fn fail_new_fs(&self, code: i32) {
        self.shared.lock().faults.new_fs = Some(code);
    }

    /// Make registration of `host` as a volfile server fail with `code`.
    pub fn reject_server(&self, host: &str, code: i32) {
        self.shared
            .lock()
            .faults
            .rejected_servers
            .insert(host.to_string(), code);
    }

    /// Accept `host` at registration but skip it when connecting.
    pub fn mark_unreachable(&self, host: &str) {
        self.shared.lock().faults.unreachable.insert(host.to_string());
    }

    pub fn fail_init(&self, code: i32) {
        self.shared.lock().faults.init = Some(code);
    }

    /// Make `glfs_fini` report `code`. The mount is still torn down.
    pub fn fail_fini(&self, code: i32) {
        self.shared.lock().faults.fini = Some(code);
    }

    pub fn clear_faults(&self) {
        self.shared.lock().faults = Faults::default();
    }

    /// The volfile server (or volfile path) the mounted `volume` was initialized from.
    pub fn connected_server(&self, volume: &str) -> Option<String> {
        self.shared.lock().connections.get(volume).cloned()
    }

    /// Last logging settings applied to `volume`.
    pub fn logging(&self, volume: &str) -> Option<(Option<PathBuf>, i32)> {
        self.shared.lock().logging.get(volume).cloned()
    }
}

impl Backend for MemoryBackend {
    type Fs = MemoryFs;

    fn new_fs(&self, volume: &str) -> io::Result<MemoryFs> {
        if let Some(code) = self.shared.lock().faults.new_fs {
            return Err(errno(code));
        }
        if volume.is_empty() {
            return Err(errno(libc::EINVAL));
        }
        Ok(MemoryFs {
            volume: volume.to_string(),
            shared: Arc::clone(&self.shared),
            config: Mutex::new(FsConfig::default()),
            tree: Mutex::new(None),
        })
    }
}

#[derive(Debug, Default)]
struct FsConfig {
    servers: Vec<(String, String, u16)>,
    volfile: Option<PathBuf>,
    initialized: bool,
}

/// One in-memory "mount object".
#[derive(Debug)]
pub struct MemoryFs {
    volume: String,
    shared: Arc<Mutex<Shared>>,
    config: Mutex<FsConfig>,
    tree: Mutex<Option<Arc<Mutex<Tree>>>>,
}

/// Open file or directory of a [`MemoryFs`].
#[derive(Debug)]
pub struct MemoryFd {
    ino: u64,
    flags: i32,
    is_dir: bool,
    offset: Mutex<i64>,
    cursor: Mutex<DirCursor>,
}

#[derive(Debug, Default)]
struct DirCursor {
    entries: Vec<(String, u64)>,
    pos: usize,
}

impl MemoryFd {
    fn readable(&self) -> bool {
        self.flags & libc::O_ACCMODE != libc::O_WRONLY
    }

    fn writable(&self) -> bool {
        matches!(self.flags & libc::O_ACCMODE, libc::O_WRONLY | libc::O_RDWR)
    }
}

impl MemoryFs {
    fn tree(&self) -> io::Result<Arc<Mutex<Tree>>> {
        self.tree.lock().clone().ok_or_else(|| errno(libc::ENOTCONN))
    }

    fn with_tree<T>(&self, f: impl FnOnce(&mut Tree) -> io::Result<T>) -> io::Result<T> {
        let tree = self.tree()?;
        let mut tree = tree.lock();
        f(&mut tree)
    }

    fn open_fd(&self, tree: &mut Tree, ino: u64, flags: i32) -> io::Result<MemoryFd> {
        let is_dir = tree.get(ino)?.is_dir();
        let mut cursor = DirCursor::default();
        if is_dir {
            let inode = tree.get(ino)?;
            cursor.entries.push((".".to_string(), ino));
            cursor.entries.push(("..".to_string(), inode.parent));
            cursor
                .entries
                .extend(tree.children(ino)?.iter().map(|(n, i)| (n.clone(), *i)));
        }
        tree.get_mut(ino)?.open += 1;
        Ok(MemoryFd {
            ino,
            flags,
            is_dir,
            offset: Mutex::new(0),
            cursor: Mutex::new(cursor),
        })
    }

    fn next_entry(&self, fd: &MemoryFd, tree: &Tree) -> io::Result<Option<(RawDirent, RawStat)>> {
        if !fd.is_dir {
            return Err(errno(libc::ENOTDIR));
        }
        let mut cursor = fd.cursor.lock();
        while cursor.pos < cursor.entries.len() {
            let pos = cursor.pos;
            cursor.pos += 1;
            let (ref name, ino) = cursor.entries[pos];
            // Entries removed since opendir are skipped.
            let Ok(inode) = tree.get(ino) else {
                continue;
            };
            let mut dirent = RawDirent::new(ino, inode.kind().dirent_type(), name.as_bytes());
            dirent.off = (pos + 1) as i64;
            return Ok(Some((dirent, tree.raw_stat(ino)?)));
        }
        Ok(None)
    }
}

impl RemoteFs for MemoryFs {
    type Fd = MemoryFd;

    fn set_volfile_server(&self, transport: &str, host: &str, port: u16) -> io::Result<()> {
        if let Some(&code) = self.shared.lock().faults.rejected_servers.get(host) {
            return Err(errno(code));
        }
        if host.is_empty() || transport.is_empty() {
            return Err(errno(libc::EINVAL));
        }
        self.config
            .lock()
            .servers
            .push((transport.to_string(), host.to_string(), port));
        Ok(())
    }

    fn set_volfile(&self, volfile: &Path) -> io::Result<()> {
        self.config.lock().volfile = Some(volfile.to_path_buf());
        Ok(())
    }

    fn set_logging(&self, logfile: Option<&Path>, level: i32) -> io::Result<()> {
        if !(0..=9).contains(&level) {
            return Err(errno(libc::EINVAL));
        }
        self.shared.lock().logging.insert(
            self.volume.clone(),
            (logfile.map(Path::to_path_buf), level),
        );
        Ok(())
    }

    fn init(&self) -> io::Result<()> {
        let mut config = self.config.lock();
        if config.initialized {
            return Err(errno(libc::EINVAL));
        }
        let mut shared = self.shared.lock();
        if let Some(code) = shared.faults.init {
            return Err(errno(code));
        }

        let connection = if let Some(ref volfile) = config.volfile {
            if !volfile.is_file() {
                return Err(errno(libc::ENOENT));
            }
            volfile.display().to_string()
        } else if config.servers.is_empty() {
            return Err(errno(libc::EINVAL));
        } else {
            // Failover list: first reachable server wins.
            config
                .servers
                .iter()
                .map(|(_, host, _)| host)
                .find(|host| !shared.faults.unreachable.contains(*host))
                .cloned()
                .ok_or_else(|| errno(libc::ENOTCONN))?
        };

        let (capacity, max_inodes) = (shared.capacity, shared.max_inodes);
        let tree = Arc::clone(
            shared
                .volumes
                .entry(self.volume.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Tree::new(capacity, max_inodes)))),
        );
        debug!(volume = %self.volume, connection = %connection, "in-memory volume initialized");
        shared.connections.insert(self.volume.clone(), connection);
        *self.tree.lock() = Some(tree);
        config.initialized = true;
        Ok(())
    }

    fn fini(&self) -> io::Result<()> {
        // Like glfs_fini, the mount is released even when an error is reported.
        let mut shared = self.shared.lock();
        if self.tree.lock().take().is_some() {
            shared.connections.remove(&self.volume);
        }
        match shared.faults.fini {
            Some(code) => Err(errno(code)),
            None => Ok(()),
        }
    }

    fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.set_mode(ino, mode)
        })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.set_owner(ino, uid, gid)
        })
    }

    fn utimens(&self, path: &str, times: [Timespec; 2]) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.set_times(ino, times)
        })
    }

    fn truncate(&self, path: &str, size: i64) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.resize(ino, size)
        })
    }

    fn creat(&self, path: &str, flags: i32, mode: u32) -> io::Result<MemoryFd> {
        self.with_tree(|tree| {
            let ino = match tree.resolve(path, true) {
                Ok(ino) => {
                    if flags & libc::O_EXCL != 0 {
                        return Err(errno(libc::EEXIST));
                    }
                    if tree.get(ino)?.is_dir() {
                        return Err(errno(libc::EISDIR));
                    }
                    if flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
                        tree.resize(ino, 0)?;
                    }
                    ino
                }
                Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                    let (parent, name) = tree.resolve_parent(path)?;
                    if tree.children(parent)?.contains_key(&name) {
                        // Dangling symlink in the final component.
                        return Err(errno(libc::EEXIST));
                    }
                    tree.insert(parent, name, mode, Body::File(Vec::new()))?
                }
                Err(e) => return Err(e),
            };
            trace!(path, ino, "created");
            self.open_fd(tree, ino, flags)
        })
    }

    fn open(&self, path: &str, flags: i32) -> io::Result<MemoryFd> {
        // Creation goes through creat; open only resolves existing entries.
        if flags & libc::O_CREAT != 0 {
            return Err(errno(libc::EINVAL));
        }
        self.with_tree(|tree| {
            let ino = tree.resolve(path, flags & libc::O_NOFOLLOW == 0)?;
            let inode = tree.get(ino)?;
            if inode.kind() == FileKind::Symlink {
                return Err(errno(libc::ELOOP));
            }
            if inode.is_dir() {
                return Err(errno(libc::EISDIR));
            }
            if flags & libc::O_DIRECTORY != 0 {
                return Err(errno(libc::ENOTDIR));
            }
            if flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
                tree.resize(ino, 0)?;
            }
            self.open_fd(tree, ino, flags)
        })
    }

    fn opendir(&self, path: &str) -> io::Result<MemoryFd> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            if !tree.get(ino)?.is_dir() {
                return Err(errno(libc::ENOTDIR));
            }
            self.open_fd(tree, ino, libc::O_RDONLY | libc::O_DIRECTORY)
        })
    }

    fn close(&self, fd: MemoryFd) -> io::Result<()> {
        // After fini the tree is gone and the descriptor has nothing left to release.
        let Ok(tree) = self.tree() else {
            return Ok(());
        };
        let mut tree = tree.lock();
        if let Ok(inode) = tree.get_mut(fd.ino) {
            inode.open = inode.open.saturating_sub(1);
            tree.maybe_free(fd.ino);
        }
        Ok(())
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        self.with_tree(|tree| tree.unlink(path))
    }

    fn stat(&self, path: &str) -> io::Result<RawStat> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.raw_stat(ino)
        })
    }

    fn lstat(&self, path: &str) -> io::Result<RawStat> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, false)?;
            tree.raw_stat(ino)
        })
    }

    fn mkdir(&self, path: &str, mode: u32) -> io::Result<()> {
        self.with_tree(|tree| {
            if tree.resolve(path, false).is_ok() {
                return Err(errno(libc::EEXIST));
            }
            let (parent, name) = tree.resolve_parent(path)?;
            tree.insert(parent, name, mode, Body::Dir(BTreeMap::new()))?;
            Ok(())
        })
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        self.with_tree(|tree| tree.rmdir(path))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.with_tree(|tree| tree.rename(from, to))
    }

    fn link(&self, existing: &str, new: &str) -> io::Result<()> {
        self.with_tree(|tree| tree.link(existing, new))
    }

    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        self.with_tree(|tree| {
            if tree.resolve(link, false).is_ok() {
                return Err(errno(libc::EEXIST));
            }
            let (parent, name) = tree.resolve_parent(link)?;
            tree.insert(parent, name, 0o777, Body::Symlink(target.to_string()))?;
            Ok(())
        })
    }

    fn readlink(&self, path: &str, buf: &mut [u8]) -> io::Result<usize> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, false)?;
            let Body::Symlink(ref target) = tree.get(ino)?.body else {
                return Err(errno(libc::EINVAL));
            };
            if buf.is_empty() {
                return Err(errno(libc::EINVAL));
            }
            let n = target.len().min(buf.len());
            buf[..n].copy_from_slice(&target.as_bytes()[..n]);
            Ok(n)
        })
    }

    fn getxattr(&self, path: &str, name: &str, buf: &mut [u8]) -> io::Result<usize> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.get_xattr(ino, name, buf)
        })
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.set_xattr(ino, name, value, flags)
        })
    }

    fn removexattr(&self, path: &str, name: &str) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.remove_xattr(ino, name)
        })
    }

    fn listxattr(&self, path: &str, buf: &mut [u8]) -> io::Result<usize> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            tree.list_xattr(ino, buf)
        })
    }

    fn statvfs(&self, path: &str) -> io::Result<RawStatVfs> {
        self.with_tree(|tree| {
            tree.resolve(path, true)?;
            Ok(tree.statvfs())
        })
    }

    fn access(&self, path: &str, mode: i32) -> io::Result<()> {
        self.with_tree(|tree| {
            let ino = tree.resolve(path, true)?;
            let owner = (tree.get(ino)?.attr.mode >> 6) & 0o7;
            let wanted = [
                (libc::R_OK, 0o4),
                (libc::W_OK, 0o2),
                (libc::X_OK, 0o1),
            ];
            for (bit, perm) in wanted {
                if mode & bit != 0 && owner & perm == 0 {
                    return Err(errno(libc::EACCES));
                }
            }
            Ok(())
        })
    }

    fn fchmod(&self, fd: &MemoryFd, mode: u32) -> io::Result<()> {
        self.with_tree(|tree| tree.set_mode(fd.ino, mode))
    }

    fn fchown(&self, fd: &MemoryFd, uid: u32, gid: u32) -> io::Result<()> {
        self.with_tree(|tree| tree.set_owner(fd.ino, uid, gid))
    }

    fn futimens(&self, fd: &MemoryFd, times: [Timespec; 2]) -> io::Result<()> {
        self.with_tree(|tree| tree.set_times(fd.ino, times))
    }

    fn fstat(&self, fd: &MemoryFd) -> io::Result<RawStat> {
        self.with_tree(|tree| tree.raw_stat(fd.ino))
    }

    fn fsync(&self, fd: &MemoryFd) -> io::Result<()> {
        self.with_tree(|tree| tree.get(fd.ino).map(|_| ()))
    }

    fn ftruncate(&self, fd: &MemoryFd, size: i64) -> io::Result<()> {
        if fd.is_dir {
            return Err(errno(libc::EISDIR));
        }
        if !fd.writable() {
            return Err(errno(libc::EINVAL));
        }
        self.with_tree(|tree| tree.resize(fd.ino, size))
    }

    fn pread(&self, fd: &MemoryFd, buf: &mut [u8], offset: i64) -> io::Result<usize> {
        if fd.is_dir {
            return Err(errno(libc::EISDIR));
        }
        if !fd.readable() {
            return Err(errno(libc::EBADF));
        }
        self.with_tree(|tree| tree.read_at(fd.ino, buf, offset))
    }

    fn pwrite(&self, fd: &MemoryFd, buf: &[u8], offset: i64) -> io::Result<usize> {
        if !fd.writable() {
            return Err(errno(libc::EBADF));
        }
        self.with_tree(|tree| tree.write_at(fd.ino, buf, offset))
    }

    fn read(&self, fd: &MemoryFd, buf: &mut [u8]) -> io::Result<usize> {
        if fd.is_dir {
            return Err(errno(libc::EISDIR));
        }
        if !fd.readable() {
            return Err(errno(libc::EBADF));
        }
        let mut offset = fd.offset.lock();
        let n = self.with_tree(|tree| tree.read_at(fd.ino, buf, *offset))?;
        *offset += n as i64;
        Ok(n)
    }

    fn write(&self, fd: &MemoryFd, buf: &[u8]) -> io::Result<usize> {
        if !fd.writable() {
            return Err(errno(libc::EBADF));
        }
        let mut offset = fd.offset.lock();
        let n = self.with_tree(|tree| {
            if fd.flags & libc::O_APPEND != 0 {
                *offset = tree.file_len(fd.ino)? as i64;
            }
            tree.write_at(fd.ino, buf, *offset)
        })?;
        *offset += n as i64;
        Ok(n)
    }

    fn lseek(&self, fd: &MemoryFd, offset: i64, whence: i32) -> io::Result<i64> {
        if fd.is_dir {
            // Only rewinding is meaningful on the directory snapshot.
            if whence == libc::SEEK_SET && offset == 0 {
                fd.cursor.lock().pos = 0;
                return Ok(0);
            }
            return Err(errno(libc::EINVAL));
        }
        let mut current = fd.offset.lock();
        let base = match whence {
            libc::SEEK_SET => 0,
            libc::SEEK_CUR => *current,
            libc::SEEK_END => self.with_tree(|tree| tree.file_len(fd.ino))? as i64,
            _ => return Err(errno(libc::EINVAL)),
        };
        let target = base.checked_add(offset).ok_or_else(|| errno(libc::EOVERFLOW))?;
        if target < 0 {
            return Err(errno(libc::EINVAL));
        }
        *current = target;
        Ok(target)
    }

    fn fallocate(&self, fd: &MemoryFd, mode: i32, offset: i64, len: u64) -> io::Result<()> {
        if !fd.writable() {
            return Err(errno(libc::EBADF));
        }
        if fd.is_dir {
            return Err(errno(libc::EISDIR));
        }
        if offset < 0 || len == 0 {
            return Err(errno(libc::EINVAL));
        }
        if mode & !FALLOC_FL_KEEP_SIZE != 0 {
            return Err(errno(libc::EOPNOTSUPP));
        }
        let end = i64::try_from(len)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or_else(|| errno(libc::EFBIG))?;
        self.with_tree(|tree| {
            if mode & FALLOC_FL_KEEP_SIZE == 0 && end > tree.file_len(fd.ino)? as i64 {
                tree.resize(fd.ino, end)?;
            }
            Ok(())
        })
    }

    fn fgetxattr(&self, fd: &MemoryFd, name: &str, buf: &mut [u8]) -> io::Result<usize> {
        self.with_tree(|tree| tree.get_xattr(fd.ino, name, buf))
    }

    fn fsetxattr(&self, fd: &MemoryFd, name: &str, value: &[u8], flags: i32) -> io::Result<()> {
        self.with_tree(|tree| tree.set_xattr(fd.ino, name, value, flags))
    }

    fn fremovexattr(&self, fd: &MemoryFd, name: &str) -> io::Result<()> {
        self.with_tree(|tree| tree.remove_xattr(fd.ino, name))
    }

    fn readdir(&self, fd: &MemoryFd) -> io::Result<Option<RawDirent>> {
        self.readdirplus(fd).map(|entry| entry.map(|(dirent, _)| dirent))
    }

    fn readdirplus(&self, fd: &MemoryFd) -> io::Result<Option<(RawDirent, RawStat)>> {
        let tree = self.tree()?;
        let tree = tree.lock();
        self.next_entry(fd, &tree)
    }
}

#[derive(Debug, Clone, Copy)]
struct Attr {
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u64,
    atime: Timespec,
    mtime: Timespec,
    ctime: Timespec,
}

#[derive(Debug)]
enum Body {
    File(Vec<u8>),
    Dir(BTreeMap<String, u64>),
    Symlink(String),
}

#[derive(Debug)]
struct Inode {
    attr: Attr,
    body: Body,
    xattrs: BTreeMap<String, Vec<u8>>,
    /// Containing directory; only meaningful for directories.
    parent: u64,
    open: usize,
}

impl Inode {
    fn kind(&self) -> FileKind {
        match self.body {
            Body::File(_) => FileKind::Regular,
            Body::Dir(_) => FileKind::Directory,
            Body::Symlink(_) => FileKind::Symlink,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.body, Body::Dir(_))
    }
}

#[derive(Debug)]
struct Tree {
    inodes: HashMap<u64, Inode>,
    next_ino: u64,
    capacity: u64,
    max_inodes: u64,
}

fn components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_xattr_name(name: &str) -> io::Result<()> {
    if name.is_empty() {
        return Err(errno(libc::ERANGE));
    }
    if !XATTR_NAMESPACES.iter().any(|ns| name.starts_with(ns)) {
        return Err(errno(libc::ENOTSUP));
    }
    Ok(())
}

/// Copy `value` into `buf` following the size-probe convention.
fn copy_sized(value: &[u8], buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
        return Ok(value.len());
    }
    if buf.len() < value.len() {
        return Err(errno(libc::ERANGE));
    }
    buf[..value.len()].copy_from_slice(value);
    Ok(value.len())
}

impl Tree {
    fn new(capacity: u64, max_inodes: u64) -> Self {
        let now = Timespec::now();
        let root = Inode {
            attr: Attr {
                mode: 0o755,
                uid: 0,
                gid: 0,
                nlink: 2,
                atime: now,
                mtime: now,
                ctime: now,
            },
            body: Body::Dir(BTreeMap::new()),
            xattrs: BTreeMap::new(),
            parent: ROOT_INO,
            open: 0,
        };
        Self {
            inodes: HashMap::from([(ROOT_INO, root)]),
            next_ino: ROOT_INO + 1,
            capacity,
            max_inodes,
        }
    }

    fn get(&self, ino: u64) -> io::Result<&Inode> {
        self.inodes.get(&ino).ok_or_else(|| errno(libc::ENOENT))
    }

    fn get_mut(&mut self, ino: u64) -> io::Result<&mut Inode> {
        self.inodes.get_mut(&ino).ok_or_else(|| errno(libc::ENOENT))
    }

    fn children(&self, ino: u64) -> io::Result<&BTreeMap<String, u64>> {
        match self.get(ino)?.body {
            Body::Dir(ref children) => Ok(children),
            _ => Err(errno(libc::ENOTDIR)),
        }
    }

    fn children_mut(&mut self, ino: u64) -> io::Result<&mut BTreeMap<String, u64>> {
        match self.get_mut(ino)?.body {
            Body::Dir(ref mut children) => Ok(children),
            _ => Err(errno(libc::ENOTDIR)),
        }
    }

    fn lookup(&self, dir: u64, name: &str) -> io::Result<u64> {
        self.children(dir)?
            .get(name)
            .copied()
            .ok_or_else(|| errno(libc::ENOENT))
    }

    /// Walk `path` from the root, expanding symlinks in intermediate
    /// components and, if `follow_last`, in the final one.
    fn resolve(&self, path: &str, follow_last: bool) -> io::Result<u64> {
        if path.is_empty() {
            return Err(errno(libc::ENOENT));
        }
        let mut pending = components(path);
        let mut current = ROOT_INO;
        let mut hops = 0;
        while let Some(component) = pending.pop_front() {
            let children = self.children(current)?;
            let next = match component.as_str() {
                "." => continue,
                ".." => {
                    current = self.get(current)?.parent;
                    continue;
                }
                name => *children.get(name).ok_or_else(|| errno(libc::ENOENT))?,
            };
            if let Body::Symlink(ref target) = self.get(next)?.body
                && (follow_last || !pending.is_empty())
            {
                hops += 1;
                if hops > SYMLOOP_MAX {
                    return Err(errno(libc::ELOOP));
                }
                let mut expanded = components(target);
                expanded.append(&mut pending);
                pending = expanded;
                if target.starts_with('/') {
                    current = ROOT_INO;
                }
                continue;
            }
            current = next;
        }
        Ok(current)
    }

    /// Split `path` into its (resolved) parent directory and final name.
    fn resolve_parent(&self, path: &str) -> io::Result<(u64, String)> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(errno(if path.is_empty() {
                libc::ENOENT
            } else {
                libc::EBUSY
            }));
        }
        let (dir, name) = match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
            None => ("", trimmed),
        };
        if name == "." || name == ".." {
            return Err(errno(libc::EINVAL));
        }
        if name.len() > NAME_MAX {
            return Err(errno(libc::ENAMETOOLONG));
        }
        let parent = self.resolve(if dir.is_empty() { "/" } else { dir }, true)?;
        self.children(parent)?;
        Ok((parent, name.to_string()))
    }

    fn used_bytes(&self) -> u64 {
        self.inodes
            .values()
            .map(|inode| match inode.body {
                Body::File(ref data) => data.len() as u64,
                _ => 0,
            })
            .sum()
    }

    fn insert(&mut self, parent: u64, name: String, mode: u32, body: Body) -> io::Result<u64> {
        if self.inodes.len() as u64 >= self.max_inodes {
            return Err(errno(libc::ENOSPC));
        }
        let is_dir = matches!(body, Body::Dir(_));
        let now = Timespec::now();
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(
            ino,
            Inode {
                attr: Attr {
                    mode: mode & MODE_PERM_MASK,
                    uid: 0,
                    gid: 0,
                    nlink: if is_dir { 2 } else { 1 },
                    atime: now,
                    mtime: now,
                    ctime: now,
                },
                body,
                xattrs: BTreeMap::new(),
                parent,
                open: 0,
            },
        );
        self.children_mut(parent)?.insert(name, ino);
        let dir = self.get_mut(parent)?;
        if is_dir {
            dir.attr.nlink += 1;
        }
        dir.attr.mtime = now;
        dir.attr.ctime = now;
        Ok(ino)
    }

    /// Drop an inode once it has no names and no open descriptors.
    fn maybe_free(&mut self, ino: u64) {
        if let Some(inode) = self.inodes.get(&ino)
            && inode.attr.nlink == 0
            && inode.open == 0
            && ino != ROOT_INO
        {
            self.inodes.remove(&ino);
        }
    }

    fn touch_dir(&mut self, dir: u64) -> io::Result<()> {
        let now = Timespec::now();
        let inode = self.get_mut(dir)?;
        inode.attr.mtime = now;
        inode.attr.ctime = now;
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> io::Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let ino = self.lookup(parent, &name)?;
        if self.get(ino)?.is_dir() {
            return Err(errno(libc::EISDIR));
        }
        self.children_mut(parent)?.remove(&name);
        self.touch_dir(parent)?;
        let inode = self.get_mut(ino)?;
        inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
        inode.attr.ctime = Timespec::now();
        self.maybe_free(ino);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> io::Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let ino = self.lookup(parent, &name)?;
        if !self.children(ino)?.is_empty() {
            return Err(errno(libc::ENOTEMPTY));
        }
        self.children_mut(parent)?.remove(&name);
        self.touch_dir(parent)?;
        self.get_mut(parent)?.attr.nlink -= 1;
        self.get_mut(ino)?.attr.nlink = 0;
        self.maybe_free(ino);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let (src_parent, src_name) = self.resolve_parent(from)?;
        let src = self.lookup(src_parent, &src_name)?;
        let (dst_parent, dst_name) = self.resolve_parent(to)?;
        let src_is_dir = self.get(src)?.is_dir();

        if src_is_dir {
            let mut cursor = dst_parent;
            loop {
                if cursor == src {
                    return Err(errno(libc::EINVAL));
                }
                if cursor == ROOT_INO {
                    break;
                }
                cursor = self.get(cursor)?.parent;
            }
        }

        if let Ok(dst) = self.lookup(dst_parent, &dst_name) {
            if dst == src {
                return Ok(());
            }
            let dst_is_dir = self.get(dst)?.is_dir();
            match (src_is_dir, dst_is_dir) {
                (true, false) => return Err(errno(libc::ENOTDIR)),
                (false, true) => return Err(errno(libc::EISDIR)),
                (true, true) if !self.children(dst)?.is_empty() => {
                    return Err(errno(libc::ENOTEMPTY));
                }
                _ => {}
            }
            self.children_mut(dst_parent)?.remove(&dst_name);
            if dst_is_dir {
                self.get_mut(dst_parent)?.attr.nlink -= 1;
                self.get_mut(dst)?.attr.nlink = 0;
            } else {
                let inode = self.get_mut(dst)?;
                inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
            }
            self.maybe_free(dst);
        }

        self.children_mut(src_parent)?.remove(&src_name);
        self.children_mut(dst_parent)?.insert(dst_name, src);
        if src_is_dir && src_parent != dst_parent {
            self.get_mut(src)?.parent = dst_parent;
            self.get_mut(src_parent)?.attr.nlink -= 1;
            self.get_mut(dst_parent)?.attr.nlink += 1;
        }
        self.touch_dir(src_parent)?;
        self.touch_dir(dst_parent)?;
        self.get_mut(src)?.attr.ctime = Timespec::now();
        Ok(())
    }

    fn link(&mut self, existing: &str, new: &str) -> io::Result<()> {
        let ino = self.resolve(existing, false)?;
        if self.get(ino)?.is_dir() {
            return Err(errno(libc::EPERM));
        }
        let (parent, name) = self.resolve_parent(new)?;
        if self.children(parent)?.contains_key(&name) {
            return Err(errno(libc::EEXIST));
        }
        self.children_mut(parent)?.insert(name, ino);
        self.touch_dir(parent)?;
        let inode = self.get_mut(ino)?;
        inode.attr.nlink += 1;
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn raw_stat(&self, ino: u64) -> io::Result<RawStat> {
        let inode = self.get(ino)?;
        let size = match inode.body {
            Body::File(ref data) => data.len() as i64,
            Body::Dir(_) => BLOCK_SIZE as i64,
            Body::Symlink(ref target) => target.len() as i64,
        };
        Ok(RawStat {
            dev: 0x676c,
            ino,
            mode: inode.kind().mode_bits() | inode.attr.mode,
            nlink: inode.attr.nlink,
            uid: inode.attr.uid,
            gid: inode.attr.gid,
            rdev: 0,
            size,
            blksize: BLOCK_SIZE as i64,
            blocks: (size + 511) / 512,
            atime: inode.attr.atime,
            mtime: inode.attr.mtime,
            ctime: inode.attr.ctime,
        })
    }

    fn statvfs(&self) -> RawStatVfs {
        let blocks = self.capacity / BLOCK_SIZE;
        let used = self.used_bytes().div_ceil(BLOCK_SIZE);
        let free = blocks.saturating_sub(used);
        let files_free = self.max_inodes.saturating_sub(self.inodes.len() as u64);
        RawStatVfs {
            bsize: BLOCK_SIZE,
            frsize: BLOCK_SIZE,
            blocks,
            bfree: free,
            bavail: free,
            files: self.max_inodes,
            ffree: files_free,
            favail: files_free,
            fsid: 0x676c,
            flag: 0,
            namemax: NAME_MAX as u64,
        }
    }

    fn set_mode(&mut self, ino: u64, mode: u32) -> io::Result<()> {
        let inode = self.get_mut(ino)?;
        inode.attr.mode = mode & MODE_PERM_MASK;
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn set_owner(&mut self, ino: u64, uid: u32, gid: u32) -> io::Result<()> {
        let inode = self.get_mut(ino)?;
        // u32::MAX is (uid_t)-1: leave unchanged.
        if uid != u32::MAX {
            inode.attr.uid = uid;
        }
        if gid != u32::MAX {
            inode.attr.gid = gid;
        }
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn set_times(&mut self, ino: u64, [atime, mtime]: [Timespec; 2]) -> io::Result<()> {
        if !(0..1_000_000_000).contains(&atime.nsec) || !(0..1_000_000_000).contains(&mtime.nsec) {
            return Err(errno(libc::EINVAL));
        }
        let inode = self.get_mut(ino)?;
        inode.attr.atime = atime;
        inode.attr.mtime = mtime;
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn file_len(&self, ino: u64) -> io::Result<usize> {
        match self.get(ino)?.body {
            Body::File(ref data) => Ok(data.len()),
            Body::Dir(_) => Err(errno(libc::EISDIR)),
            Body::Symlink(_) => Err(errno(libc::EINVAL)),
        }
    }

    fn reserve(&self, ino: u64, new_len: usize) -> io::Result<()> {
        let current = self.file_len(ino)? as u64;
        let grow = (new_len as u64).saturating_sub(current);
        if self.used_bytes() + grow > self.capacity {
            return Err(errno(libc::ENOSPC));
        }
        Ok(())
    }

    fn file_data_mut(&mut self, ino: u64) -> io::Result<&mut Vec<u8>> {
        let now = Timespec::now();
        let inode = self.get_mut(ino)?;
        inode.attr.mtime = now;
        inode.attr.ctime = now;
        match inode.body {
            Body::File(ref mut data) => Ok(data),
            Body::Dir(_) => Err(errno(libc::EISDIR)),
            Body::Symlink(_) => Err(errno(libc::EINVAL)),
        }
    }

    fn resize(&mut self, ino: u64, size: i64) -> io::Result<()> {
        let size = usize::try_from(size).map_err(|_| errno(libc::EINVAL))?;
        self.reserve(ino, size)?;
        self.file_data_mut(ino)?.resize(size, 0);
        Ok(())
    }

    fn read_at(&mut self, ino: u64, buf: &mut [u8], offset: i64) -> io::Result<usize> {
        let offset = usize::try_from(offset).map_err(|_| errno(libc::EINVAL))?;
        let inode = self.get_mut(ino)?;
        let Body::File(ref data) = inode.body else {
            return Err(errno(libc::EISDIR));
        };
        if buf.is_empty() || offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        inode.attr.atime = Timespec::now();
        Ok(n)
    }

    fn write_at(&mut self, ino: u64, buf: &[u8], offset: i64) -> io::Result<usize> {
        let offset = usize::try_from(offset).map_err(|_| errno(libc::EINVAL))?;
        if buf.is_empty() {
            self.file_len(ino)?;
            return Ok(0);
        }
        let end = offset.checked_add(buf.len()).ok_or_else(|| errno(libc::EFBIG))?;
        self.reserve(ino, end)?;
        let data = self.file_data_mut(ino)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn get_xattr(&self, ino: u64, name: &str, buf: &mut [u8]) -> io::Result<usize> {
        check_xattr_name(name)?;
        let value = self
            .get(ino)?
            .xattrs
            .get(name)
            .ok_or_else(|| errno(libc::ENODATA))?;
        copy_sized(value, buf)
    }

    fn set_xattr(&mut self, ino: u64, name: &str, value: &[u8], flags: i32) -> io::Result<()> {
        check_xattr_name(name)?;
        let inode = self.get_mut(ino)?;
        let exists = inode.xattrs.contains_key(name);
        if flags & XATTR_CREATE != 0 && exists {
            return Err(errno(libc::EEXIST));
        }
        if flags & XATTR_REPLACE != 0 && !exists {
            return Err(errno(libc::ENODATA));
        }
        inode.xattrs.insert(name.to_string(), value.to_vec());
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn remove_xattr(&mut self, ino: u64, name: &str) -> io::Result<()> {
        check_xattr_name(name)?;
        let inode = self.get_mut(ino)?;
        inode
            .xattrs
            .remove(name)
            .ok_or_else(|| errno(libc::ENODATA))?;
        inode.attr.ctime = Timespec::now();
        Ok(())
    }

    fn list_xattr(&self, ino: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut names = Vec::new();
        for name in self.get(ino)?.xattrs.keys() {
            names.extend_from_slice(name.as_bytes());
            names.push(0);
        }
        copy_sized(&names, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> MemoryFs {
        let backend = MemoryBackend::new();
        let fs = backend.new_fs("test").unwrap();
        fs.set_volfile_server("tcp", "localhost", 24007).unwrap();
        fs.init().unwrap();
        fs
    }

    fn code(err: &io::Error) -> Option<i32> {
        err.raw_os_error()
    }

    #[test]
    fn test_ops_before_init_are_not_connected() {
        let fs = MemoryBackend::new().new_fs("test").unwrap();
        let err = fs.stat("/").unwrap_err();
        assert_eq!(code(&err), Some(libc::ENOTCONN));
    }

    #[test]
    fn test_init_requires_source() {
        let fs = MemoryBackend::new().new_fs("test").unwrap();
        assert_eq!(code(&fs.init().unwrap_err()), Some(libc::EINVAL));
    }

    #[test]
    fn test_init_uses_first_reachable_server() {
        let backend = MemoryBackend::new();
        backend.mark_unreachable("a");
        let fs = backend.new_fs("vol").unwrap();
        fs.set_volfile_server("tcp", "a", 24007).unwrap();
        fs.set_volfile_server("tcp", "b", 24007).unwrap();
        fs.set_volfile_server("tcp", "c", 24007).unwrap();
        fs.init().unwrap();
        assert_eq!(backend.connected_server("vol").as_deref(), Some("b"));
        fs.fini().unwrap();
        assert_eq!(backend.connected_server("vol"), None);
    }

    #[test]
    fn test_fini_fault_still_releases_mount() {
        let backend = MemoryBackend::new();
        let fs = backend.new_fs("vol").unwrap();
        fs.set_volfile_server("tcp", "a", 24007).unwrap();
        fs.init().unwrap();
        backend.fail_fini(libc::EIO);
        assert_eq!(code(&fs.fini().unwrap_err()), Some(libc::EIO));
        assert_eq!(backend.connected_server("vol"), None);
        assert_eq!(code(&fs.stat("/").unwrap_err()), Some(libc::ENOTCONN));
    }

    #[test]
    fn test_root_stat() {
        let fs = mounted();
        let st = fs.stat("/").unwrap();
        assert_eq!(st.ino, ROOT_INO);
        assert_eq!(FileKind::from_mode(st.mode), FileKind::Directory);
        assert_eq!(st.nlink, 2);
    }

    #[test]
    fn test_mkdir_updates_parent_link_count() {
        let fs = mounted();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/a/b", 0o700).unwrap();
        assert_eq!(fs.stat("/").unwrap().nlink, 3);
        assert_eq!(fs.stat("/a").unwrap().nlink, 3);
        assert_eq!(fs.stat("/a/b").unwrap().mode & MODE_PERM_MASK, 0o700);
        assert_eq!(code(&fs.mkdir("/a", 0o755).unwrap_err()), Some(libc::EEXIST));
        assert_eq!(code(&fs.mkdir("/x/y", 0o755).unwrap_err()), Some(libc::ENOENT));
    }

    #[test]
    fn test_open_directory_is_eisdir() {
        let fs = mounted();
        fs.mkdir("/d", 0o755).unwrap();
        let err = fs.open("/d", libc::O_RDONLY).unwrap_err();
        assert_eq!(code(&err), Some(libc::EISDIR));
        let fd = fs.opendir("/d").unwrap();
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_open_does_not_create() {
        let fs = mounted();
        let err = fs.open("/new", libc::O_RDWR | libc::O_CREAT).unwrap_err();
        assert_eq!(code(&err), Some(libc::EINVAL));
        assert_eq!(code(&fs.lstat("/new").unwrap_err()), Some(libc::ENOENT));
    }

    #[test]
    fn test_path_through_file_is_enotdir() {
        let fs = mounted();
        let fd = fs.creat("/f", libc::O_RDWR, 0o644).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(code(&fs.stat("/f/x").unwrap_err()), Some(libc::ENOTDIR));
        assert_eq!(
            code(&fs.mkdir("/f/x", 0o755).unwrap_err()),
            Some(libc::ENOTDIR)
        );
    }

    #[test]
    fn test_symlink_resolution() {
        let fs = mounted();
        fs.mkdir("/real", 0o755).unwrap();
        let fd = fs.creat("/real/file", libc::O_WRONLY, 0o644).unwrap();
        fs.write(&fd, b"data").unwrap();
        fs.close(fd).unwrap();
        fs.symlink("/real", "/alias").unwrap();
        fs.symlink("file", "/real/rel").unwrap();

        assert_eq!(fs.stat("/alias/file").unwrap().size, 4);
        assert_eq!(fs.stat("/real/rel").unwrap().size, 4);
        let lst = fs.lstat("/alias").unwrap();
        assert_eq!(FileKind::from_mode(lst.mode), FileKind::Symlink);
        assert_eq!(lst.size, 5);
    }

    #[test]
    fn test_symlink_loop() {
        let fs = mounted();
        fs.symlink("/b", "/a").unwrap();
        fs.symlink("/a", "/b").unwrap();
        assert_eq!(code(&fs.stat("/a").unwrap_err()), Some(libc::ELOOP));
        // lstat does not follow
        assert!(fs.lstat("/a").is_ok());
    }

    #[test]
    fn test_unlinked_open_file_stays_readable() {
        let fs = mounted();
        let fd = fs.creat("/tmp", libc::O_RDWR, 0o644).unwrap();
        fs.write(&fd, b"still here").unwrap();
        fs.unlink("/tmp").unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(fs.pread(&fd, &mut buf, 0).unwrap(), 10);
        assert_eq!(&buf, b"still here");
        assert_eq!(fs.fstat(&fd).unwrap().nlink, 0);
        fs.close(fd).unwrap();
        assert_eq!(code(&fs.stat("/tmp").unwrap_err()), Some(libc::ENOENT));
    }

    #[test]
    fn test_rename_into_own_subtree_is_rejected() {
        let fs = mounted();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/a/b", 0o755).unwrap();
        assert_eq!(
            code(&fs.rename("/a", "/a/b/c").unwrap_err()),
            Some(libc::EINVAL)
        );
    }

    #[test]
    fn test_rename_replaces_file() {
        let fs = mounted();
        for (path, body) in [("/one", b"1"), ("/two", b"2")] {
            let fd = fs.creat(path, libc::O_WRONLY, 0o644).unwrap();
            fs.write(&fd, body).unwrap();
            fs.close(fd).unwrap();
        }
        fs.rename("/one", "/two").unwrap();
        assert!(fs.stat("/one").is_err());
        let fd = fs.open("/two", libc::O_RDONLY).unwrap();
        let mut buf = [0u8; 1];
        fs.read(&fd, &mut buf).unwrap();
        assert_eq!(&buf, b"1");
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_hard_link_shares_inode() {
        let fs = mounted();
        let fd = fs.creat("/a", libc::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();
        fs.link("/a", "/b").unwrap();
        let a = fs.stat("/a").unwrap();
        let b = fs.stat("/b").unwrap();
        assert_eq!(a.ino, b.ino);
        assert_eq!(a.nlink, 2);
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(code(&fs.link("/d", "/e").unwrap_err()), Some(libc::EPERM));
    }

    #[test]
    fn test_xattr_namespace_required() {
        let fs = mounted();
        fs.mkdir("/d", 0o755).unwrap();
        let err = fs.setxattr("/d", "plain", b"v", 0).unwrap_err();
        assert_eq!(code(&err), Some(libc::ENOTSUP));
        fs.setxattr("/d", "user.k", b"v", 0).unwrap();
        let err = fs.setxattr("/d", "user.k", b"v", XATTR_CREATE).unwrap_err();
        assert_eq!(code(&err), Some(libc::EEXIST));
        let err = fs.setxattr("/d", "user.z", b"v", XATTR_REPLACE).unwrap_err();
        assert_eq!(code(&err), Some(libc::ENODATA));
    }

    #[test]
    fn test_xattr_small_buffer_is_erange() {
        let fs = mounted();
        fs.setxattr("/", "user.big", b"0123456789", 0).unwrap();
        let mut small = [0u8; 4];
        let err = fs.getxattr("/", "user.big", &mut small).unwrap_err();
        assert_eq!(code(&err), Some(libc::ERANGE));
    }

    #[test]
    fn test_capacity_enforced() {
        let backend = MemoryBackend::with_limits(8192, 16);
        let fs = backend.new_fs("small").unwrap();
        fs.set_volfile_server("tcp", "h", 24007).unwrap();
        fs.init().unwrap();
        let fd = fs.creat("/f", libc::O_WRONLY, 0o644).unwrap();
        assert_eq!(fs.write(&fd, &[1u8; 8192]).unwrap(), 8192);
        let err = fs.write(&fd, &[1u8]).unwrap_err();
        assert_eq!(code(&err), Some(libc::ENOSPC));
        let vfs = fs.statvfs("/").unwrap();
        assert_eq!(vfs.blocks, 2);
        assert_eq!(vfs.bfree, 0);
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_volumes_persist_across_mounts() {
        let backend = MemoryBackend::new();
        let first = backend.new_fs("shared").unwrap();
        first.set_volfile_server("tcp", "h", 24007).unwrap();
        first.init().unwrap();
        first.mkdir("/kept", 0o755).unwrap();
        first.fini().unwrap();

        let second = backend.new_fs("shared").unwrap();
        second.set_volfile_server("tcp", "h", 24007).unwrap();
        second.init().unwrap();
        assert!(second.stat("/kept").is_ok());
    }
}
