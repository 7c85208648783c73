#![allow(dead_code)]

use std::sync::Once;

use gfapi::{MemoryBackend, Volume};

pub const TEST_VOLUME: &str = "gv0";
pub const TEST_SERVERS: &[&str] = &["server1", "server2"];

static TRACING: Once = Once::new();

/// Route crate logs to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A mounted in-memory volume together with its backend.
pub fn mounted() -> (MemoryBackend, Volume<MemoryBackend>) {
    init_tracing();
    let backend = MemoryBackend::new();
    let mut volume = Volume::new(backend.clone(), TEST_VOLUME);
    volume.init(TEST_SERVERS).unwrap();
    volume.mount().unwrap();
    (backend, volume)
}

/// Content of exactly `size` bytes from a repeating pattern.
pub fn sized_content(size: usize) -> Vec<u8> {
    let pattern = b"0123456789ABCDEF";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}
