//! Platform-asynchronous file reads, modeled as a worker-thread pool that
//! pops raw-read work items off a priority queue and posts completions back
//! to the dispatcher over a channel.
//!
//! Positioned reads (`pread`/`ReadFile` with an explicit offset) stand in for
//! "platform asynchronous read" per §4.7 — the backend still bounds
//! concurrent outstanding reads by the buffer pool's capacity, and a cache
//! hit still completes without touching the file at all.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::{debug, trace, warn};

use crate::pool::{BlockCache, BufferPool, PoolBuffer};
use crate::queue::{PriorityQueue, Priority};
use crate::tracker::RawBlockKey;

/// Everything the backend needs to perform one raw-block read, without
/// reaching back into the dispatcher-owned tracker.
#[derive(Clone)]
pub struct BackendJob {
    pub key: RawBlockKey,
    pub file: Arc<File>,
    pub file_offset: u64,
    pub size: u32,
    pub priority: Priority,
    /// Mirrors `RawBlock::cacheable`: skip the block cache store when the
    /// read exactly covers the block's whole range.
    pub cacheable: bool,
}

/// Posted back to the dispatcher when a raw-block read (or cache hit)
/// finishes.
pub struct BackendCompletion {
    pub key: RawBlockKey,
    pub buffer: Option<PoolBuffer>,
    pub cache_hit: bool,
    pub failed: bool,
}

struct Shared {
    queue: Mutex<PriorityQueue<BackendJob>>,
    condvar: Condvar,
    stop: AtomicBool,
    pool: Arc<BufferPool>,
    cache: Arc<BlockCache>,
    completions: Sender<BackendCompletion>,
}

/// Owns the priority queue of outstanding raw reads and the worker thread(s)
/// draining it. Under a single-threaded host configuration, no worker
/// threads are spawned and [`IoBackend::pump_one`] is called inline by the
/// dispatcher instead (§9 "single-threaded host").
pub struct IoBackend {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

// `BackendJob` needs `Eq`/`Clone` to live in `PriorityQueue`; keys are unique
// per in-flight raw block, so equality by key is sufficient and avoids
// requiring `File`/`Priority` comparisons.
impl PartialEq for BackendJob {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for BackendJob {}

impl IoBackend {
    pub fn new(pool: Arc<BufferPool>, cache: Arc<BlockCache>, completions: Sender<BackendCompletion>) -> Arc<Self> {
        Arc::new(IoBackend {
            shared: Arc::new(Shared {
                queue: Mutex::new(PriorityQueue::new()),
                condvar: Condvar::new(),
                stop: AtomicBool::new(false),
                pool,
                cache,
                completions,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawns `worker_count` service threads. A `worker_count` of zero is
    /// valid (single-threaded host mode): nothing is spawned and the caller
    /// must drive completions via [`IoBackend::pump_one`].
    pub fn spawn_workers(self: &Arc<Self>, worker_count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..worker_count {
            let shared = self.shared.clone();
            workers.push(std::thread::spawn(move || worker_loop(shared)));
        }
    }

    pub fn submit(&self, jobs: Vec<BackendJob>) {
        if jobs.is_empty() {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        for job in jobs {
            let priority = job.priority;
            queue.push(job, priority);
        }
        drop(queue);
        self.shared.condvar.notify_all();
    }

    /// Re-sorts the queue after an out-of-band priority mutation, writing
    /// each updated priority into its still-queued `BackendJob` as it goes.
    /// `updates` pairs a raw-block key with its newly-raised priority; a
    /// queued job whose key isn't in `updates` keeps its current priority.
    pub fn reprioritize(&self, updates: &[(RawBlockKey, Priority)]) {
        if updates.is_empty() {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        queue.reheapify(|job| {
            if let Some((_, priority)) = updates.iter().find(|(key, _)| *key == job.key) {
                job.priority = *priority;
            }
            job.priority
        });
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Stops worker threads and joins them. Safe to call multiple times.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.condvar.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Pops and services exactly one job inline, blocking if the queue is
    /// empty and `block` is true. Used by the single-threaded dispatcher
    /// pump; returns `false` if nothing was available and `block` was false.
    pub fn pump_one(&self, block: bool) -> bool {
        let job = {
            let mut queue = self.shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.pop() {
                    break Some(job);
                }
                if !block || self.shared.stop.load(Ordering::SeqCst) {
                    break None;
                }
                queue = self.shared.condvar.wait(queue).unwrap();
            }
        };
        match job {
            Some(job) => {
                service_job(&self.shared, job);
                true
            }
            None => false,
        }
    }
}

impl Drop for IoBackend {
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
        service_job(&shared, job);
    }
}

fn service_job(shared: &Shared, job: BackendJob) {
    let mut buffer = shared.pool.alloc_blocking();

    if shared.cache.read(job.key, &mut buffer.data[..job.size as usize]) {
        trace!("block cache hit for {:?}", job.key);
        send_completion(shared, BackendCompletion {
            key: job.key,
            buffer: Some(buffer),
            cache_hit: true,
            failed: false,
        });
        return;
    }

    let failed = match read_at(&job.file, job.file_offset, &mut buffer.data[..job.size as usize]) {
        Ok(()) => false,
        Err(e) => {
            warn!("read failed for block {:?}: {e}", job.key);
            true
        }
    };

    if !failed && job.cacheable {
        shared.cache.store(job.key, &buffer.data[..job.size as usize]);
    }

    debug!("serviced raw block {:?} ({} bytes, failed={failed})", job.key, job.size);
    send_completion(shared, BackendCompletion {
        key: job.key,
        buffer: Some(buffer),
        cache_hit: false,
        failed,
    });
}

fn send_completion(shared: &Shared, completion: BackendCompletion) {
    if shared.completions.send(completion).is_err() {
        // The dispatcher side was dropped (shutdown in progress); the
        // buffer inside `completion` is dropped here and returned to no
        // one, which is fine since the whole backend is tearing down.
    }
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total = 0usize;
    while total < buf.len() {
        let read = file.seek_read(&mut buf[total..], offset + total as u64)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read",
            ));
        }
        total += read;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_at(_file: &File, _offset: u64, _buf: &mut [u8]) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "positioned reads are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn backend() -> (Arc<IoBackend>, crossbeam_channel::Receiver<BackendCompletion>) {
        let pool = Arc::new(BufferPool::new(4, 64));
        let cache = Arc::new(BlockCache::new(4));
        let (tx, rx) = unbounded();
        (IoBackend::new(pool, cache, tx), rx)
    }

    #[test]
    fn services_a_single_job_synchronously() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 64]).unwrap();
        let file = Arc::new(std::fs::File::open(tmp.path()).unwrap());

        let (backend, rx) = backend();
        backend.submit(vec![BackendJob {
            key: (0, 0),
            file,
            file_offset: 0,
            size: 64,
            priority: Priority::Medium,
            cacheable: true,
        }]);

        assert!(backend.pump_one(true));
        let completion = rx.recv().unwrap();
        assert_eq!(completion.key, (0, 0));
        assert!(!completion.failed);
        assert!(!completion.cache_hit);
        assert_eq!(completion.buffer.unwrap().data, vec![7u8; 64]);
    }

    #[test]
    fn cache_hit_skips_the_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        let file = Arc::new(std::fs::File::open(tmp.path()).unwrap());

        let (backend, rx) = backend();
        backend.shared.cache.store((0, 0), &[9u8; 64]);
        backend.submit(vec![BackendJob {
            key: (0, 0),
            file,
            file_offset: 0,
            size: 64,
            priority: Priority::Medium,
            cacheable: true,
        }]);

        backend.pump_one(true);
        let completion = rx.recv().unwrap();
        assert!(completion.cache_hit);
        assert_eq!(completion.buffer.unwrap().data, vec![9u8; 64]);
    }

    #[test]
    fn worker_thread_services_jobs_in_background() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[3u8; 32]).unwrap();
        let file = Arc::new(std::fs::File::open(tmp.path()).unwrap());

        let (backend, rx) = backend();
        backend.spawn_workers(1);
        backend.submit(vec![BackendJob {
            key: (1, 2),
            file,
            file_offset: 0,
            size: 32,
            priority: Priority::High,
            cacheable: false,
        }]);

        let completion = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(completion.key, (1, 2));
        backend.shutdown();
    }
}
