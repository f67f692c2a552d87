//! §8 "Concurrency safety": many threads issuing (and sometimes cancelling)
//! overlapping reads against a dispatcher whose buffer pool is small enough
//! that most reads must wait for a buffer to free up. Every request must
//! resolve to exactly one outcome — the correct bytes, or a cancellation —
//! and the dispatcher must still be usable afterward (no deadlocked pool,
//! no stuck tracker entries).

use packed_chunk_store::prelude::*;
use rand::Rng;
use std::thread;
use tempfile::tempdir;

const CHUNK_COUNT: u8 = 50;
const CHUNK_SIZE: usize = 4096;
const THREAD_COUNT: usize = 16;
const READS_PER_THREAD: usize = 100;

fn id(byte: u8) -> ChunkId {
    let mut bytes = [0u8; 12];
    bytes[11] = byte;
    ChunkId::from_bytes(bytes)
}

#[test]
fn many_threads_with_random_cancels_resolve_exactly_once() {
    let dir = tempdir().unwrap();
    let settings = PackingSettings {
        block_size: CHUNK_SIZE as u32,
        ..PackingSettings::new(42)
    };
    let entries: Vec<(ChunkId, Vec<u8>)> = (0..CHUNK_COUNT).map(|i| (id(i + 1), vec![i; CHUNK_SIZE])).collect();
    let prefix = dir.path().join("concurrency");

    let mut store = PackedChunkStore::new(settings);
    for (chunk_id, data) in &entries {
        store.append(*chunk_id, data.clone(), WriteOptions::new());
    }
    store.flush(&prefix).unwrap();

    // Four small buffers forces the backend to queue and wait on the pool's
    // "buffer freed" condition under concurrent load (§5).
    let dispatcher_settings = DispatcherSettings {
        buffer_pool_memory: 4 * CHUNK_SIZE,
        read_buffer_size: CHUNK_SIZE,
        block_cache_capacity: 8,
        multithreaded: true,
        decode_workers: 2,
        io_workers: 2,
    };
    let dispatcher = Dispatcher::new(dispatcher_settings);
    dispatcher.mount(&prefix, 0, None, None).unwrap();

    thread::scope(|scope| {
        for _ in 0..THREAD_COUNT {
            let dispatcher = dispatcher.clone();
            let entries = &entries;
            scope.spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..READS_PER_THREAD {
                    let index = rng.gen_range(0..CHUNK_COUNT as usize);
                    let (chunk_id, expected) = &entries[index];

                    let mut batch = dispatcher.new_batch();
                    let request = batch.read(*chunk_id, ReadOptions::new(), Priority::Medium);
                    dispatcher.issue(batch);

                    if rng.gen_bool(0.1) {
                        request.cancel();
                    }

                    match request.get_result() {
                        Ok(RequestResult::Buffer(buf)) => assert_eq!(&buf, expected),
                        Ok(other) => panic!("unexpected result variant: {other:?}"),
                        Err(ErrorCode::Cancelled) => {}
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
            });
        }
    });

    // The pipeline must still be usable: no buffer or tracker-entry leak
    // left every subsequent read permanently stuck.
    let mut batch = dispatcher.new_batch();
    let request = batch.read(entries[0].0, ReadOptions::new(), Priority::Medium);
    dispatcher.issue(batch);
    match request.get_result().unwrap() {
        RequestResult::Buffer(buf) => assert_eq!(buf, entries[0].1),
        other => panic!("expected an owned buffer, got {other:?}"),
    }

    dispatcher.shutdown();
}
