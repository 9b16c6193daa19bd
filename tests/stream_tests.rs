//! Stream behavior: lock lifetime, skip/available, and the in-memory spill store.

use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tmpstore::{ManualScheduler, MemorySpillStore, StorageConfig, StorageHandler};

fn setup(max_per_entry: usize) -> (Arc<StorageHandler>, MemorySpillStore) {
    let store = MemorySpillStore::new();
    let config = StorageConfig {
        directory: "spill".into(),
        max_bytes_per_entry: max_per_entry,
        max_bytes_total: max_per_entry * 4,
        ..StorageConfig::default()
    };
    let handler = StorageHandler::with_spill_store(
        config,
        Arc::new(ManualScheduler::new()),
        Arc::new(store.clone()),
    )
    .unwrap();
    handler.start().unwrap();
    (Arc::new(handler), store)
}

fn numbered(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_skip_and_available_cross_tiers() {
    let (handler, store) = setup(32);
    let key = handler.create().unwrap();
    let data = numbered(100);
    let mut out = handler.open_output_stream(key).unwrap();
    out.write_all(&data).unwrap();
    out.close().unwrap();
    assert_eq!(store.size(&handler.config().spill_path(&key)), Some(68));

    let mut input = handler.open_input_stream(key).unwrap();
    assert_eq!(input.content_length().unwrap(), 100);
    assert_eq!(input.available().unwrap(), 100);

    assert_eq!(input.skip(10).unwrap(), 10);
    assert_eq!(input.available().unwrap(), 90);

    // Crosses from memory into the file.
    assert_eq!(input.skip(40).unwrap(), 40);
    assert_eq!(input.available().unwrap(), 50);

    let mut rest = Vec::new();
    input.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &data[50..]);
    assert_eq!(input.available().unwrap(), 0);
    assert_eq!(input.skip(5).unwrap(), 0);
}

#[test]
fn test_skip_past_end_of_memory_only_entry() {
    let (handler, _) = setup(64);
    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream(key).unwrap();
    out.write_all(&numbered(20)).unwrap();
    out.close().unwrap();

    let mut input = handler.open_input_stream(key).unwrap();
    assert_eq!(input.skip(50).unwrap(), 20);
    assert_eq!(input.available().unwrap(), 0);
}

#[test]
fn test_write_exactly_filling_memory_then_more() {
    let (handler, _) = setup(16);
    let key = handler.create().unwrap();

    let mut out = handler.open_output_stream_with_length(key, 16).unwrap();
    out.write_all(&[1u8; 16]).unwrap();
    out.flush().unwrap();
    // Memory is full; the next byte flips the session to the file tier.
    out.write_all(&[2u8; 1]).unwrap();
    out.write_all(&[3u8; 3]).unwrap();
    out.close().unwrap();

    let info = handler.inspect(key).unwrap();
    assert_eq!(info.memory_len, 16);
    assert_eq!(info.file_len, 4);

    let mut back = Vec::new();
    handler
        .open_input_stream(key)
        .unwrap()
        .read_to_end(&mut back)
        .unwrap();
    assert_eq!(&back[..16], &[1u8; 16]);
    assert_eq!(&back[16..], &[2, 3, 3, 3]);
}

#[test]
fn test_empty_write_is_noop() {
    let (handler, _) = setup(16);
    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream_with_length(key, 0).unwrap();
    assert_eq!(out.write(&[]).unwrap(), 0);
    out.close().unwrap();

    let info = handler.inspect(key).unwrap();
    assert_eq!(info.memory_capacity, 0);
    assert_eq!(info.content_length, 0);
    assert!(!info.file_used);
}

#[test]
fn test_readers_share_the_entry() {
    let (handler, _) = setup(64);
    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream(key).unwrap();
    out.write_all(b"shared").unwrap();
    out.close().unwrap();

    let mut a = handler.open_input_stream(key).unwrap();
    let mut b = handler.open_input_stream(key).unwrap();
    let mut sa = String::new();
    let mut sb = String::new();
    a.read_to_string(&mut sa).unwrap();
    b.read_to_string(&mut sb).unwrap();
    assert_eq!(sa, "shared");
    assert_eq!(sb, "shared");
    assert_eq!(handler.inspect(key).unwrap().content_length, 6);
}

#[test]
fn test_open_writer_blocks_readers_until_closed() {
    let (handler, _) = setup(64);
    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream(key).unwrap();
    out.write_all(b"late").unwrap();

    let (tx, rx) = mpsc::channel();
    let reader = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || {
            let mut input = handler.open_input_stream(key).unwrap();
            let mut s = String::new();
            input.read_to_string(&mut s).unwrap();
            tx.send(s).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    out.close().unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    reader.join().unwrap();
}

#[test]
fn test_dropped_streams_release_their_locks() {
    let (handler, store) = setup(8);
    let key = handler.create().unwrap();
    {
        let mut out = handler.open_output_stream(key).unwrap();
        out.write_all(b"0123456789abcdef").unwrap();
    }
    let info = handler.inspect(key).unwrap();
    assert_eq!(info.memory_capacity, 8);
    assert_eq!(info.file_len, 8);
    {
        let _input = handler.open_input_stream(key).unwrap();
    }

    handler.dispose(key).unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_key_and_debug_output() {
    let (handler, _) = setup(8);
    let key = handler.create().unwrap();
    let mut out = handler.open_output_stream(key).unwrap();
    assert_eq!(out.key(), key);
    assert!(!out.is_closed());
    assert!(format!("{out:?}").contains("WriteStream"));
    out.close().unwrap();
    assert!(out.is_closed());
}
