//! Integration tests for open descriptors: I/O, enumeration and closing

mod common;

use std::io::SeekFrom;
use std::thread;

use common::{mounted, sized_content};
use gfapi::error::HandleError;
use gfapi::{Error, ErrorCategory, FallocateMode, FileKind, Op, OpenFlags, XattrFlags};

// ==================== sequential and positioned I/O ====================

#[test]
fn test_sequential_writes_append_at_cursor() {
    let (_backend, volume) = mounted();
    let mut file = volume.create("/seq", OpenFlags::RDWR, 0o644).unwrap();
    assert_eq!(file.write(b"AB").unwrap(), 2);
    assert_eq!(file.write(b"CD").unwrap(), 2);

    let mut buf = [0u8; 8];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"ABCD");
}

#[test]
fn test_positioned_write_keeps_cursor() {
    let (_backend, volume) = mounted();
    let mut file = volume.create("/pos", OpenFlags::RDWR, 0o644).unwrap();
    file.write(b"ABCD").unwrap();
    file.write_at(b"X", 0).unwrap();
    file.write(b"E").unwrap();

    let mut buf = [0u8; 8];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"XBCDE");
}

#[test]
fn test_read_at_past_end_is_empty() {
    let (_backend, volume) = mounted();
    let file = volume.create("/short", OpenFlags::RDWR, 0o644).unwrap();
    file.write_at(b"abc", 0).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(file.read_at(&mut buf, 10).unwrap(), 0);
}

#[test]
fn test_zero_length_buffers() {
    let (_backend, volume) = mounted();
    let mut file = volume.create("/z", OpenFlags::RDWR, 0o644).unwrap();
    assert_eq!(file.write(&[]).unwrap(), 0);
    assert_eq!(file.read(&mut []).unwrap(), 0);
    assert_eq!(file.write_at(&[], 5).unwrap(), 0);
    assert_eq!(file.stat().unwrap().len(), 0);
}

#[test]
fn test_sequential_read_to_end() {
    let (_backend, volume) = mounted();
    let content = sized_content(10_000);
    let mut file = volume.create("/big", OpenFlags::RDWR, 0o644).unwrap();
    file.write(&content).unwrap();
    assert_eq!(file.seek(SeekFrom::Start(0)).unwrap(), 0);

    let mut read = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = file.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        read.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(read, content);
}

#[test]
fn test_append_mode_writes_at_end() {
    let (_backend, volume) = mounted();
    let file = volume.create("/log", OpenFlags::WRONLY, 0o644).unwrap();
    file.write_at(b"head", 0).unwrap();
    drop(file);

    let mut file = volume
        .open("/log", OpenFlags::WRONLY | OpenFlags::APPEND)
        .unwrap();
    file.write(b"-tail").unwrap();
    file.close().unwrap();

    let file = volume.open("/log", OpenFlags::RDONLY).unwrap();
    let mut buf = [0u8; 16];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"head-tail");
}

#[test]
fn test_write_to_read_only_descriptor() {
    let (_backend, volume) = mounted();
    volume.create("/ro", OpenFlags::WRONLY, 0o644).unwrap().close().unwrap();
    let file = volume.open("/ro", OpenFlags::RDONLY).unwrap();
    let err = file.write_at(b"x", 0).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidHandle);
    let path_err = err.as_path_error().unwrap();
    assert_eq!(path_err.op(), Op::Pwrite);
    assert_eq!(path_err.path(), "/ro");
}

// ==================== descriptor metadata ====================

#[test]
fn test_descriptor_metadata_calls() {
    let (_backend, volume) = mounted();
    let file = volume.create("/meta", OpenFlags::RDWR, 0o600).unwrap();
    file.write_at(b"0123456789", 0).unwrap();

    file.chmod(0o640).unwrap();
    file.chown(7, 8).unwrap();
    file.truncate(4).unwrap();
    file.sync().unwrap();

    let meta = file.stat().unwrap();
    assert_eq!(meta.name, "meta");
    assert_eq!(meta.permissions(), 0o640);
    assert_eq!((meta.uid, meta.gid), (7, 8));
    assert_eq!(meta.len(), 4);
    assert_eq!(meta, volume.stat("/meta").unwrap());
}

#[test]
fn test_descriptor_xattrs() {
    let (_backend, volume) = mounted();
    let file = volume.create("/fx", OpenFlags::RDWR, 0o644).unwrap();
    file.setxattr("user.tag", b"blue", XattrFlags::Create).unwrap();

    assert_eq!(file.getxattr("user.tag", &mut []).unwrap(), 4);
    assert_eq!(file.xattr("user.tag").unwrap(), b"blue");
    assert_eq!(file.xattr_names().unwrap(), ["user.tag"]);
    assert_eq!(volume.xattr("/fx", "user.tag").unwrap(), b"blue");

    file.removexattr("user.tag").unwrap();
    let err = file.xattr("user.tag").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NoData);
    assert_eq!(err.as_path_error().unwrap().op(), Op::Fgetxattr);
}

#[test]
fn test_allocate_out_of_space() {
    let backend = gfapi::MemoryBackend::with_limits(64 * 1024, 1024);
    let mut volume = gfapi::Volume::new(backend, "small");
    volume.init(&["h1"]).unwrap();
    volume.mount().unwrap();

    let file = volume.create("/f", OpenFlags::RDWR, 0o644).unwrap();
    file.allocate(FallocateMode::Default, 0, 32 * 1024).unwrap();
    let err = file
        .allocate(FallocateMode::Default, 0, 1024 * 1024)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
}

// ==================== directory enumeration ====================

fn populate(volume: &gfapi::Volume<gfapi::MemoryBackend>, dir: &str, count: usize) {
    volume.mkdir(dir, 0o755).unwrap();
    for i in 0..count {
        volume
            .create(&format!("{dir}/f{i}"), OpenFlags::WRONLY, 0o644)
            .unwrap()
            .close()
            .unwrap();
    }
}

#[test]
fn test_read_dir_pagination() {
    let (_backend, volume) = mounted();
    populate(&volume, "/five", 5);

    let mut dir = volume.open_dir("/five").unwrap();
    let first = dir.read_dir(2).unwrap();
    let second = dir.read_dir(3).unwrap();
    let rest = dir.read_dir(3).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 3);
    assert!(rest.is_empty());

    let mut names: Vec<_> = first.iter().chain(&second).map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, ["f0", "f1", "f2", "f3", "f4"]);
    assert!(first.iter().chain(&second).all(|e| e.file_type() == FileKind::Regular));
}

#[test]
fn test_read_dir_names_skips_dots() {
    let (_backend, volume) = mounted();
    populate(&volume, "/names", 3);

    let mut dir = volume.open_dir("/names").unwrap();
    let mut names = dir.read_dir_names(0).unwrap();
    names.sort();
    assert_eq!(names, ["f0", "f1", "f2"]);
    assert!(dir.read_dir_names(0).unwrap().is_empty());
}

#[test]
fn test_rewind_restarts_enumeration() {
    let (_backend, volume) = mounted();
    populate(&volume, "/again", 2);

    let mut dir = volume.open_dir("/again").unwrap();
    assert_eq!(dir.read_dir(0).unwrap().len(), 2);
    dir.seek(SeekFrom::Start(0)).unwrap();
    assert_eq!(dir.read_dir(0).unwrap().len(), 2);
}

#[test]
fn test_empty_directory() {
    let (_backend, volume) = mounted();
    volume.mkdir("/empty", 0o755).unwrap();
    let mut dir = volume.open_dir("/empty").unwrap();
    assert!(dir.read_dir(1).unwrap().is_empty());
    assert!(dir.read_dir_names(1).unwrap().is_empty());
}

#[test]
fn test_open_dir_on_file() {
    let (_backend, volume) = mounted();
    volume.create("/file", OpenFlags::WRONLY, 0o644).unwrap().close().unwrap();
    let err = volume.open_dir("/file").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotDirectory);
    assert_eq!(err.as_path_error().unwrap().op(), Op::OpenDir);
}

// ==================== closing ====================

#[test]
fn test_operations_after_close() {
    let (_backend, volume) = mounted();
    let mut file = volume.create("/c", OpenFlags::RDWR, 0o644).unwrap();
    let other = volume.create("/other", OpenFlags::RDWR, 0o644).unwrap();
    file.close().unwrap();

    let err = file.write_at(b"x", 0).unwrap_err();
    match err {
        Error::Handle(HandleError::Closed { op, ref path }) => {
            assert_eq!(op, Op::Pwrite);
            assert_eq!(path, "/c");
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::InvalidHandle);
    assert!(matches!(
        file.close(),
        Err(Error::Handle(HandleError::AlreadyClosed { .. }))
    ));

    // Other descriptors are unaffected.
    other.write_at(b"fine", 0).unwrap();
    assert_eq!(volume.open_descriptors(), 1);
}

#[test]
fn test_unlinked_file_stays_readable_while_open() {
    let (_backend, volume) = mounted();
    let mut file = volume.create("/gone", OpenFlags::RDWR, 0o644).unwrap();
    file.write(b"still here").unwrap();
    volume.unlink("/gone").unwrap();
    assert!(!volume.exists("/gone").unwrap());

    let mut buf = [0u8; 16];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"still here");
    file.close().unwrap();
}

// ==================== concurrency ====================

#[test]
fn test_concurrent_positioned_io() {
    const THREADS: usize = 8;
    const BLOCK: usize = 512;

    let (_backend, volume) = mounted();
    let file = volume.create("/shared", OpenFlags::RDWR, 0o644).unwrap();

    thread::scope(|scope| {
        for t in 0..THREADS {
            let file = &file;
            scope.spawn(move || {
                let block = vec![b'a' + t as u8; BLOCK];
                let offset = (t * BLOCK) as u64;
                assert_eq!(file.write_at(&block, offset).unwrap(), BLOCK);
                let mut back = vec![0u8; BLOCK];
                assert_eq!(file.read_at(&mut back, offset).unwrap(), BLOCK);
                assert_eq!(back, block);
            });
        }
    });

    assert_eq!(file.stat().unwrap().len(), (THREADS * BLOCK) as u64);
    let mut buf = vec![0u8; THREADS * BLOCK];
    file.read_at(&mut buf, 0).unwrap();
    for (t, chunk) in buf.chunks(BLOCK).enumerate() {
        assert!(chunk.iter().all(|&b| b == b'a' + t as u8));
    }
}

#[test]
fn test_concurrent_descriptors_on_one_volume() {
    let (_backend, volume) = mounted();
    volume.mkdir("/par", 0o755).unwrap();

    thread::scope(|scope| {
        for t in 0..4 {
            let volume = &volume;
            scope.spawn(move || {
                let path = format!("/par/t{t}");
                let mut file = volume.create(&path, OpenFlags::RDWR, 0o644).unwrap();
                file.write(path.as_bytes()).unwrap();
                file.close().unwrap();
            });
        }
    });

    assert_eq!(volume.read_dir("/par").unwrap().len(), 4);
    assert_eq!(volume.open_descriptors(), 0);
}
