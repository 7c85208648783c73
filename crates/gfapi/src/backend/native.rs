//! libgfapi over FFI.
//!
//! Signatures follow the `GFAPI_6.0` symbol versions (pre/post stat
//! out-parameters on fsync, ftruncate, pread and pwrite). Those are passed
//! as null.
//!
//! Slices are passed as `as_ptr()`/`as_mut_ptr()`; for an empty slice that is
//! a dangling, non-null pointer, never null.

#![allow(unsafe_code, non_camel_case_types)]

use std::ffi::{CString, c_char, c_int, c_void};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use libc::{dirent, mode_t, off_t, size_t, ssize_t, stat, statvfs, timespec};
use nix::errno::Errno;
use tracing::warn;

use super::{Backend, RawDirent, RemoteFs};
use crate::stat::{RawStat, RawStatVfs, Timespec};

#[repr(C)]
struct glfs_t {
    _private: [u8; 0],
}

#[repr(C)]
struct glfs_fd_t {
    _private: [u8; 0],
}

#[link(name = "gfapi")]
unsafe extern "C" {
    fn glfs_new(volname: *const c_char) -> *mut glfs_t;
    fn glfs_set_volfile_server(
        fs: *mut glfs_t,
        transport: *const c_char,
        host: *const c_char,
        port: c_int,
    ) -> c_int;
    fn glfs_set_volfile(fs: *mut glfs_t, volfile: *const c_char) -> c_int;
    fn glfs_set_logging(fs: *mut glfs_t, logfile: *const c_char, loglevel: c_int) -> c_int;
    fn glfs_init(fs: *mut glfs_t) -> c_int;
    fn glfs_fini(fs: *mut glfs_t) -> c_int;

    fn glfs_chmod(fs: *mut glfs_t, path: *const c_char, mode: mode_t) -> c_int;
    fn glfs_chown(fs: *mut glfs_t, path: *const c_char, uid: u32, gid: u32) -> c_int;
    fn glfs_utimens(fs: *mut glfs_t, path: *const c_char, times: *const timespec) -> c_int;
    fn glfs_truncate(fs: *mut glfs_t, path: *const c_char, length: off_t) -> c_int;
    fn glfs_creat(
        fs: *mut glfs_t,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> *mut glfs_fd_t;
    fn glfs_open(fs: *mut glfs_t, path: *const c_char, flags: c_int) -> *mut glfs_fd_t;
    fn glfs_opendir(fs: *mut glfs_t, path: *const c_char) -> *mut glfs_fd_t;
    fn glfs_close(fd: *mut glfs_fd_t) -> c_int;
    fn glfs_closedir(fd: *mut glfs_fd_t) -> c_int;
    fn glfs_unlink(fs: *mut glfs_t, path: *const c_char) -> c_int;
    fn glfs_stat(fs: *mut glfs_t, path: *const c_char, buf: *mut stat) -> c_int;
    fn glfs_lstat(fs: *mut glfs_t, path: *const c_char, buf: *mut stat) -> c_int;
    fn glfs_mkdir(fs: *mut glfs_t, path: *const c_char, mode: mode_t) -> c_int;
    fn glfs_rmdir(fs: *mut glfs_t, path: *const c_char) -> c_int;
    fn glfs_rename(fs: *mut glfs_t, oldpath: *const c_char, newpath: *const c_char) -> c_int;
    fn glfs_link(fs: *mut glfs_t, oldpath: *const c_char, newpath: *const c_char) -> c_int;
    fn glfs_symlink(fs: *mut glfs_t, oldpath: *const c_char, newpath: *const c_char) -> c_int;
    fn glfs_readlink(fs: *mut glfs_t, path: *const c_char, buf: *mut c_char, bufsiz: size_t)
    -> c_int;
    fn glfs_getxattr(
        fs: *mut glfs_t,
        path: *const c_char,
        name: *const c_char,
        value: *mut c_void,
        size: size_t,
    ) -> ssize_t;
    fn glfs_setxattr(
        fs: *mut glfs_t,
        path: *const c_char,
        name: *const c_char,
        value: *const c_void,
        size: size_t,
        flags: c_int,
    ) -> c_int;
    fn glfs_removexattr(fs: *mut glfs_t, path: *const c_char, name: *const c_char) -> c_int;
    fn glfs_listxattr(fs: *mut glfs_t, path: *const c_char, value: *mut c_void, size: size_t)
    -> ssize_t;
    fn glfs_statvfs(fs: *mut glfs_t, path: *const c_char, buf: *mut statvfs) -> c_int;
    fn glfs_access(fs: *mut glfs_t, path: *const c_char, mode: c_int) -> c_int;

    fn glfs_fchmod(fd: *mut glfs_fd_t, mode: mode_t) -> c_int;
    fn glfs_fchown(fd: *mut glfs_fd_t, uid: u32, gid: u32) -> c_int;
    fn glfs_futimens(fd: *mut glfs_fd_t, times: *const timespec) -> c_int;
    fn glfs_fstat(fd: *mut glfs_fd_t, buf: *mut stat) -> c_int;
    fn glfs_fsync(fd: *mut glfs_fd_t, prestat: *mut c_void, poststat: *mut c_void) -> c_int;
    fn glfs_ftruncate(
        fd: *mut glfs_fd_t,
        length: off_t,
        prestat: *mut c_void,
        poststat: *mut c_void,
    ) -> c_int;
    fn glfs_pread(
        fd: *mut glfs_fd_t,
        buf: *mut c_void,
        count: size_t,
        offset: off_t,
        flags: c_int,
        poststat: *mut c_void,
    ) -> ssize_t;
    fn glfs_pwrite(
        fd: *mut glfs_fd_t,
        buf: *const c_void,
        count: size_t,
        offset: off_t,
        flags: c_int,
        prestat: *mut c_void,
        poststat: *mut c_void,
    ) -> ssize_t;
    fn glfs_read(fd: *mut glfs_fd_t, buf: *mut c_void, count: size_t, flags: c_int) -> ssize_t;
    fn glfs_write(fd: *mut glfs_fd_t, buf: *const c_void, count: size_t, flags: c_int)
    -> ssize_t;
    fn glfs_lseek(fd: *mut glfs_fd_t, offset: off_t, whence: c_int) -> off_t;
    fn glfs_fallocate(fd: *mut glfs_fd_t, keep_size: c_int, offset: off_t, len: size_t) -> c_int;
    fn glfs_fgetxattr(
        fd: *mut glfs_fd_t,
        name: *const c_char,
        value: *mut c_void,
        size: size_t,
    ) -> ssize_t;
    fn glfs_fsetxattr(
        fd: *mut glfs_fd_t,
        name: *const c_char,
        value: *const c_void,
        size: size_t,
        flags: c_int,
    ) -> c_int;
    fn glfs_fremovexattr(fd: *mut glfs_fd_t, name: *const c_char) -> c_int;
    fn glfs_readdir(fd: *mut glfs_fd_t) -> *mut dirent;
    fn glfs_readdirplus(fd: *mut glfs_fd_t, stat: *mut stat) -> *mut dirent;
}

fn c_string(s: &str) -> io::Result<CString> {
    CString::new(s).map_err(|_| io::Error::from(Errno::EINVAL))
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::from(Errno::EINVAL))
}

fn check(ret: c_int) -> io::Result<()> {
    if ret < 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}

fn check_len(ret: ssize_t) -> io::Result<usize> {
    usize::try_from(ret).map_err(|_| Errno::last().into())
}

fn check_fd(raw: *mut glfs_fd_t) -> io::Result<NonNull<glfs_fd_t>> {
    NonNull::new(raw).ok_or_else(|| Errno::last().into())
}

fn c_times(times: [Timespec; 2]) -> [timespec; 2] {
    times.map(|t| timespec {
        tv_sec: t.sec as libc::time_t,
        tv_nsec: t.nsec as libc::c_long,
    })
}

#[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
fn raw_stat(st: &stat) -> RawStat {
    RawStat {
        dev: st.st_dev as u64,
        ino: st.st_ino as u64,
        mode: st.st_mode as u32,
        nlink: st.st_nlink as u64,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u64,
        size: st.st_size as i64,
        blksize: st.st_blksize as i64,
        blocks: st.st_blocks as i64,
        atime: Timespec::new(st.st_atime as i64, st.st_atime_nsec as i64),
        mtime: Timespec::new(st.st_mtime as i64, st.st_mtime_nsec as i64),
        ctime: Timespec::new(st.st_ctime as i64, st.st_ctime_nsec as i64),
    }
}

#[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
fn raw_statvfs(st: &statvfs) -> RawStatVfs {
    RawStatVfs {
        bsize: st.f_bsize as u64,
        frsize: st.f_frsize as u64,
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        favail: st.f_favail as u64,
        fsid: st.f_fsid as u64,
        flag: st.f_flag as u64,
        namemax: st.f_namemax as u64,
    }
}

fn raw_dirent(entry: &dirent) -> RawDirent {
    let mut out = RawDirent::new(entry.d_ino, entry.d_type, &[]);
    for (dst, src) in out.name.iter_mut().zip(entry.d_name.iter()) {
        *dst = *src as u8;
    }
    out.off = entry.d_off;
    out.reclen = entry.d_reclen;
    out
}

/// Creates libgfapi mount objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl Backend for NativeBackend {
    type Fs = NativeFs;

    fn new_fs(&self, volume: &str) -> io::Result<NativeFs> {
        let name = c_string(volume)?;
        // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
        let raw = unsafe { glfs_new(name.as_ptr()) };
        let raw = NonNull::new(raw).ok_or_else(|| io::Error::from(Errno::last()))?;
        Ok(NativeFs {
            raw,
            finalized: AtomicBool::new(false),
        })
    }
}

/// An owned `glfs_t`.
#[derive(Debug)]
pub struct NativeFs {
    raw: NonNull<glfs_t>,
    finalized: AtomicBool,
}

// SAFETY: libgfapi mount objects may be used from any thread concurrently.
unsafe impl Send for NativeFs {}
// SAFETY: see above.
unsafe impl Sync for NativeFs {}

/// An owned `glfs_fd_t`, for a file or a directory.
#[derive(Debug)]
pub struct NativeFd {
    raw: NonNull<glfs_fd_t>,
    is_dir: bool,
}

// SAFETY: descriptors are thread-safe in libgfapi; implicit-offset calls are
// serialized by the caller per the `RemoteFs` contract.
unsafe impl Send for NativeFd {}
// SAFETY: see above.
unsafe impl Sync for NativeFd {}

impl NativeFs {
    fn fs(&self) -> *mut glfs_t {
        self.raw.as_ptr()
    }
}

impl Drop for NativeFs {
    fn drop(&mut self) {
        if let Err(e) = self.fini() {
            warn!(error = %e, "glfs_fini failed while dropping mount object");
        }
    }
}

// SAFETY (applies to every call below): `self.fs()` is a live `glfs_t` until
// `fini`, after which `Volume` drops this object without another call.
// `NativeFd` pointers are live until `close`, and all string and buffer
// arguments outlive the call with lengths matching their allocations.
impl RemoteFs for NativeFs {
    type Fd = NativeFd;

    fn set_volfile_server(&self, transport: &str, host: &str, port: u16) -> io::Result<()> {
        let transport = c_string(transport)?;
        let host = c_string(host)?;
        check(unsafe {
            glfs_set_volfile_server(
                self.fs(),
                transport.as_ptr(),
                host.as_ptr(),
                c_int::from(port),
            )
        })
    }

    fn set_volfile(&self, volfile: &Path) -> io::Result<()> {
        let volfile = c_path(volfile)?;
        check(unsafe { glfs_set_volfile(self.fs(), volfile.as_ptr()) })
    }

    fn set_logging(&self, logfile: Option<&Path>, level: i32) -> io::Result<()> {
        let logfile = logfile.map(c_path).transpose()?;
        let ptr = logfile.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        check(unsafe { glfs_set_logging(self.fs(), ptr, level) })
    }

    fn init(&self) -> io::Result<()> {
        check(unsafe { glfs_init(self.fs()) })
    }

    fn fini(&self) -> io::Result<()> {
        // glfs_fini releases the object even when it reports an error.
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        check(unsafe { glfs_fini(self.fs()) })
    }

    fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_chmod(self.fs(), path.as_ptr(), mode as mode_t) })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_chown(self.fs(), path.as_ptr(), uid, gid) })
    }

    fn utimens(&self, path: &str, times: [Timespec; 2]) -> io::Result<()> {
        let path = c_string(path)?;
        let times = c_times(times);
        check(unsafe { glfs_utimens(self.fs(), path.as_ptr(), times.as_ptr()) })
    }

    fn truncate(&self, path: &str, size: i64) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_truncate(self.fs(), path.as_ptr(), size as off_t) })
    }

    fn creat(&self, path: &str, flags: i32, mode: u32) -> io::Result<NativeFd> {
        let path = c_string(path)?;
        let raw = check_fd(unsafe { glfs_creat(self.fs(), path.as_ptr(), flags, mode as mode_t) })?;
        Ok(NativeFd { raw, is_dir: false })
    }

    fn open(&self, path: &str, flags: i32) -> io::Result<NativeFd> {
        let path = c_string(path)?;
        let raw = check_fd(unsafe { glfs_open(self.fs(), path.as_ptr(), flags) })?;
        Ok(NativeFd { raw, is_dir: false })
    }

    fn opendir(&self, path: &str) -> io::Result<NativeFd> {
        let path = c_string(path)?;
        let raw = check_fd(unsafe { glfs_opendir(self.fs(), path.as_ptr()) })?;
        Ok(NativeFd { raw, is_dir: true })
    }

    fn close(&self, fd: NativeFd) -> io::Result<()> {
        if fd.is_dir {
            check(unsafe { glfs_closedir(fd.raw.as_ptr()) })
        } else {
            check(unsafe { glfs_close(fd.raw.as_ptr()) })
        }
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_unlink(self.fs(), path.as_ptr()) })
    }

    fn stat(&self, path: &str) -> io::Result<RawStat> {
        let path = c_string(path)?;
        let mut st = unsafe { std::mem::zeroed::<stat>() };
        check(unsafe { glfs_stat(self.fs(), path.as_ptr(), &raw mut st) })?;
        Ok(raw_stat(&st))
    }

    fn lstat(&self, path: &str) -> io::Result<RawStat> {
        let path = c_string(path)?;
        let mut st = unsafe { std::mem::zeroed::<stat>() };
        check(unsafe { glfs_lstat(self.fs(), path.as_ptr(), &raw mut st) })?;
        Ok(raw_stat(&st))
    }

    fn mkdir(&self, path: &str, mode: u32) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_mkdir(self.fs(), path.as_ptr(), mode as mode_t) })
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_rmdir(self.fs(), path.as_ptr()) })
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = c_string(from)?;
        let to = c_string(to)?;
        check(unsafe { glfs_rename(self.fs(), from.as_ptr(), to.as_ptr()) })
    }

    fn link(&self, existing: &str, new: &str) -> io::Result<()> {
        let existing = c_string(existing)?;
        let new = c_string(new)?;
        check(unsafe { glfs_link(self.fs(), existing.as_ptr(), new.as_ptr()) })
    }

    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        let target = c_string(target)?;
        let link = c_string(link)?;
        check(unsafe { glfs_symlink(self.fs(), target.as_ptr(), link.as_ptr()) })
    }

    fn readlink(&self, path: &str, buf: &mut [u8]) -> io::Result<usize> {
        let path = c_string(path)?;
        let ret = unsafe {
            glfs_readlink(
                self.fs(),
                path.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        check(ret)?;
        Ok(ret as usize)
    }

    fn getxattr(&self, path: &str, name: &str, buf: &mut [u8]) -> io::Result<usize> {
        let path = c_string(path)?;
        let name = c_string(name)?;
        check_len(unsafe {
            glfs_getxattr(
                self.fs(),
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        })
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> io::Result<()> {
        let path = c_string(path)?;
        let name = c_string(name)?;
        check(unsafe {
            glfs_setxattr(
                self.fs(),
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        })
    }

    fn removexattr(&self, path: &str, name: &str) -> io::Result<()> {
        let path = c_string(path)?;
        let name = c_string(name)?;
        check(unsafe { glfs_removexattr(self.fs(), path.as_ptr(), name.as_ptr()) })
    }

    fn listxattr(&self, path: &str, buf: &mut [u8]) -> io::Result<usize> {
        let path = c_string(path)?;
        check_len(unsafe {
            glfs_listxattr(
                self.fs(),
                path.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        })
    }

    fn statvfs(&self, path: &str) -> io::Result<RawStatVfs> {
        let path = c_string(path)?;
        let mut st = unsafe { std::mem::zeroed::<statvfs>() };
        check(unsafe { glfs_statvfs(self.fs(), path.as_ptr(), &raw mut st) })?;
        Ok(raw_statvfs(&st))
    }

    fn access(&self, path: &str, mode: i32) -> io::Result<()> {
        let path = c_string(path)?;
        check(unsafe { glfs_access(self.fs(), path.as_ptr(), mode) })
    }

    fn fchmod(&self, fd: &NativeFd, mode: u32) -> io::Result<()> {
        check(unsafe { glfs_fchmod(fd.raw.as_ptr(), mode as mode_t) })
    }

    fn fchown(&self, fd: &NativeFd, uid: u32, gid: u32) -> io::Result<()> {
        check(unsafe { glfs_fchown(fd.raw.as_ptr(), uid, gid) })
    }

    fn futimens(&self, fd: &NativeFd, times: [Timespec; 2]) -> io::Result<()> {
        let times = c_times(times);
        check(unsafe { glfs_futimens(fd.raw.as_ptr(), times.as_ptr()) })
    }

    fn fstat(&self, fd: &NativeFd) -> io::Result<RawStat> {
        let mut st = unsafe { std::mem::zeroed::<stat>() };
        check(unsafe { glfs_fstat(fd.raw.as_ptr(), &raw mut st) })?;
        Ok(raw_stat(&st))
    }

    fn fsync(&self, fd: &NativeFd) -> io::Result<()> {
        check(unsafe { glfs_fsync(fd.raw.as_ptr(), ptr::null_mut(), ptr::null_mut()) })
    }

    fn ftruncate(&self, fd: &NativeFd, size: i64) -> io::Result<()> {
        check(unsafe {
            glfs_ftruncate(
                fd.raw.as_ptr(),
                size as off_t,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })
    }

    fn pread(&self, fd: &NativeFd, buf: &mut [u8], offset: i64) -> io::Result<usize> {
        check_len(unsafe {
            glfs_pread(
                fd.raw.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset as off_t,
                0,
                ptr::null_mut(),
            )
        })
    }

    fn pwrite(&self, fd: &NativeFd, buf: &[u8], offset: i64) -> io::Result<usize> {
        check_len(unsafe {
            glfs_pwrite(
                fd.raw.as_ptr(),
                buf.as_ptr().cast(),
                buf.len(),
                offset as off_t,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })
    }

    fn read(&self, fd: &NativeFd, buf: &mut [u8]) -> io::Result<usize> {
        check_len(unsafe { glfs_read(fd.raw.as_ptr(), buf.as_mut_ptr().cast(), buf.len(), 0) })
    }

    fn write(&self, fd: &NativeFd, buf: &[u8]) -> io::Result<usize> {
        check_len(unsafe { glfs_write(fd.raw.as_ptr(), buf.as_ptr().cast(), buf.len(), 0) })
    }

    fn lseek(&self, fd: &NativeFd, offset: i64, whence: i32) -> io::Result<i64> {
        let ret = unsafe { glfs_lseek(fd.raw.as_ptr(), offset as off_t, whence) };
        if ret < 0 {
            return Err(Errno::last().into());
        }
        Ok(ret as i64)
    }

    fn fallocate(&self, fd: &NativeFd, mode: i32, offset: i64, len: u64) -> io::Result<()> {
        let len = size_t::try_from(len).map_err(|_| io::Error::from(Errno::EFBIG))?;
        check(unsafe { glfs_fallocate(fd.raw.as_ptr(), mode, offset as off_t, len) })
    }

    fn fgetxattr(&self, fd: &NativeFd, name: &str, buf: &mut [u8]) -> io::Result<usize> {
        let name = c_string(name)?;
        check_len(unsafe {
            glfs_fgetxattr(
                fd.raw.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        })
    }

    fn fsetxattr(&self, fd: &NativeFd, name: &str, value: &[u8], flags: i32) -> io::Result<()> {
        let name = c_string(name)?;
        check(unsafe {
            glfs_fsetxattr(
                fd.raw.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        })
    }

    fn fremovexattr(&self, fd: &NativeFd, name: &str) -> io::Result<()> {
        let name = c_string(name)?;
        check(unsafe { glfs_fremovexattr(fd.raw.as_ptr(), name.as_ptr()) })
    }

    fn readdir(&self, fd: &NativeFd) -> io::Result<Option<RawDirent>> {
        // NULL means either end of directory or failure; only errno tells.
        Errno::clear();
        let entry = unsafe { glfs_readdir(fd.raw.as_ptr()) };
        match unsafe { entry.as_ref() } {
            Some(entry) => Ok(Some(raw_dirent(entry))),
            None if Errno::last_raw() == 0 => Ok(None),
            None => Err(Errno::last().into()),
        }
    }

    fn readdirplus(&self, fd: &NativeFd) -> io::Result<Option<(RawDirent, RawStat)>> {
        let mut st = unsafe { std::mem::zeroed::<stat>() };
        Errno::clear();
        let entry = unsafe { glfs_readdirplus(fd.raw.as_ptr(), &raw mut st) };
        match unsafe { entry.as_ref() } {
            Some(entry) => Ok(Some((raw_dirent(entry), raw_stat(&st)))),
            None if Errno::last_raw() == 0 => Ok(None),
            None => Err(Errno::last().into()),
        }
    }
}
