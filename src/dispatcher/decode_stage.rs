//! The signature/decrypt/decompress step that turns a compressed block's
//! raw (still encrypted/compressed) bytes into the plaintext the dispatcher
//! scatters into client buffers.
//!
//! Modeled as a pure function plus a small worker-thread pool, mirroring
//! `crate::backend::io_backend`'s shape: the pool only exists to run CPU
//! work off the dispatcher thread when a block is compressed, encrypted, or
//! signed (§4.8); trivial blocks are decoded inline by the caller instead of
//! being submitted here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::warn;

use crate::codec::cipher::{self, CipherKey};
use crate::codec::compression::{self, CompressionMethod};
use crate::codec::hash::{self, Digest20};
use crate::tracker::CompressedBlockId;

pub struct DecodeJob {
    pub id: CompressedBlockId,
    /// The block's raw bytes: still (possibly) encrypted and compressed,
    /// padded up to the cipher block size.
    pub raw_bytes: Vec<u8>,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub method: CompressionMethod,
    pub decrypt_key: Option<CipherKey>,
    pub expected_signature: Option<Digest20>,
}

#[derive(Debug)]
pub enum DecodeFailure {
    SignatureMismatch { actual: Digest20 },
    DecompressionFailed(String),
}

pub struct DecodeOutcome {
    pub id: CompressedBlockId,
    pub result: std::result::Result<Vec<u8>, DecodeFailure>,
}

/// Runs the signature/decrypt/decompress pipeline over `job`. Pure aside
/// from CPU time; safe to call inline or from a worker thread.
pub fn run(job: DecodeJob) -> DecodeOutcome {
    let mut bytes = job.raw_bytes;

    if let Some(expected) = job.expected_signature {
        let actual = hash::hash(&bytes[..job.compressed_size as usize]);
        if actual != expected {
            return DecodeOutcome {
                id: job.id,
                result: Err(DecodeFailure::SignatureMismatch { actual }),
            };
        }
    }

    if let Some(key) = job.decrypt_key {
        cipher::decrypt_in_place(&mut bytes, &key);
    }

    let decoded = if matches!(job.method, CompressionMethod::Stored) {
        bytes.truncate(job.uncompressed_size as usize);
        bytes
    } else {
        let mut destination = vec![0u8; job.uncompressed_size as usize];
        match compression::decompress(&job.method, &bytes[..job.compressed_size as usize], &mut destination) {
            Ok(written) => {
                destination.truncate(written);
                destination
            }
            Err(e) => {
                return DecodeOutcome {
                    id: job.id,
                    result: Err(DecodeFailure::DecompressionFailed(format!("{e:?}"))),
                };
            }
        }
    };

    DecodeOutcome {
        id: job.id,
        result: Ok(decoded),
    }
}

struct Shared {
    queue: Mutex<Vec<DecodeJob>>,
    condvar: Condvar,
    stop: AtomicBool,
    outcomes: Sender<DecodeOutcome>,
}

/// A fixed pool of worker threads draining a FIFO queue of decode jobs.
/// Ordering across jobs doesn't matter (each produces an independent
/// outcome keyed by `CompressedBlockId`), so this is plain FIFO rather than
/// the raw-read priority queue.
pub struct DecodeStage {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DecodeStage {
    pub fn new(worker_count: usize, outcomes: Sender<DecodeOutcome>) -> Arc<Self> {
        let stage = Arc::new(DecodeStage {
            shared: Arc::new(Shared {
                queue: Mutex::new(Vec::new()),
                condvar: Condvar::new(),
                stop: AtomicBool::new(false),
                outcomes,
            }),
            workers: Mutex::new(Vec::new()),
        });
        let mut workers = stage.workers.lock().unwrap();
        for _ in 0..worker_count {
            let shared = stage.shared.clone();
            workers.push(std::thread::spawn(move || worker_loop(shared)));
        }
        drop(workers);
        stage
    }

    pub fn submit(&self, job: DecodeJob) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push(job);
        drop(queue);
        self.shared.condvar.notify_one();
    }

    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.condvar.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodeStage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(job) = queue.pop() {
                    break job;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };
        let outcome = run(job);
        if shared.outcomes.send(outcome).is_err() {
            warn!("decode stage: dispatcher outcome channel closed, dropping result");
            return;
        }
    }
}
