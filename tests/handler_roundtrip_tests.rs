//! Write-then-read round trips around the per-entry memory cap, on disk.

use std::io::{Read, Write};
use std::sync::Arc;

use tmpstore::{ManualScheduler, StorageConfig, StorageHandler, StorageKey};

const CHUNK: usize = 128;

fn handler(dir: &std::path::Path) -> StorageHandler {
    let config = StorageConfig {
        directory: dir.to_path_buf(),
        ..StorageConfig::default()
    };
    let handler = StorageHandler::new(config, Arc::new(ManualScheduler::new())).expect("handler");
    handler.start().expect("start");
    handler
}

fn content(seed: u8, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    blake3::Hasher::new()
        .update(&[seed])
        .finalize_xof()
        .fill(&mut out);
    out
}

fn write_chunked(handler: &StorageHandler, key: StorageKey, data: &[u8]) {
    let mut out = handler
        .open_output_stream_with_length(key, 1)
        .expect("open output");
    for chunk in data.chunks(CHUNK) {
        out.write_all(chunk).expect("write");
    }
    out.close().expect("close");
}

fn read_all(handler: &StorageHandler, key: StorageKey) -> Vec<u8> {
    let mut input = handler.open_input_stream(key).expect("open input");
    let mut buf = [0u8; CHUNK];
    let mut out = Vec::new();
    loop {
        let n = input.read(&mut buf).expect("read");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    input.close().expect("close");
    out
}

fn round_trip(len: usize) -> (bool, u64) {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler(dir.path());
    let cap = handler.config().max_bytes_per_entry;
    let data = content(len as u8, len);

    let key = handler.create().unwrap();
    write_chunked(&handler, key, &data);

    let info = handler.inspect(key).unwrap();
    assert_eq!(info.content_length, len as u64);
    assert_eq!(info.content_length, info.memory_len as u64 + info.file_len);
    assert!(info.memory_capacity <= cap);
    assert_eq!(info.memory_capacity, info.memory_len);

    let back = read_all(&handler, key);
    assert_eq!(blake3::hash(&back), blake3::hash(&data));

    let spill = handler.config().spill_path(&key);
    assert_eq!(spill.exists(), info.file_used);
    handler.dispose_and_remove(key).unwrap();
    assert!(!spill.exists());
    (info.file_used, info.file_len)
}

#[test]
fn test_below_cap_stays_in_memory() {
    let cap = StorageConfig::default().max_bytes_per_entry;
    assert_eq!(round_trip(cap - 100), (false, 0));
}

#[test]
fn test_exactly_cap_stays_in_memory() {
    let cap = StorageConfig::default().max_bytes_per_entry;
    assert_eq!(round_trip(cap), (false, 0));
}

#[test]
fn test_above_cap_spills_overflow() {
    let cap = StorageConfig::default().max_bytes_per_entry;
    assert_eq!(round_trip(cap + 100), (true, 100));
}

#[test]
fn test_unbounded_open_reserves_up_to_cap() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler(dir.path());
    let cap = handler.config().max_bytes_per_entry;
    let key = handler.create().unwrap();

    let mut out = handler.open_output_stream(key).unwrap();
    assert_eq!(handler.stats().unwrap().allocated_bytes, cap);
    out.write_all(b"small").unwrap();
    out.close().unwrap();

    // Close shrinks the reservation to what was written.
    let info = handler.inspect(key).unwrap();
    assert_eq!(info.memory_capacity, 5);
    assert_eq!(handler.stats().unwrap().allocated_bytes, 5);
    assert_eq!(read_all(&handler, key), b"small");
}

#[test]
fn test_single_read_straddles_memory_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler(dir.path());
    let cap = handler.config().max_bytes_per_entry;
    let data = content(1, cap + 500);

    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream(key).unwrap();
    out.write_all(&data).unwrap();
    out.close().unwrap();

    let mut input = handler.open_input_stream(key).unwrap();
    let mut head = vec![0u8; cap - 10];
    input.read_exact(&mut head).unwrap();

    // One call crossing the boundary returns bytes from both tiers.
    let mut middle = [0u8; 64];
    let n = input.read(&mut middle).unwrap();
    assert!(n > 10, "read stopped at the memory boundary: {n}");
    assert_eq!(&middle[..n], &data[cap - 10..cap - 10 + n]);

    let mut rest = Vec::new();
    input.read_to_end(&mut rest).unwrap();
    assert_eq!(&rest[..], &data[cap - 10 + n..]);
}
