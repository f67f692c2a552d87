//! The dispatcher: resolves client reads against mounted containers, fans
//! them out into deduplicated raw/compressed-block work, and drives the
//! read -> decode -> scatter pipeline to completion (§4.8).
//!
//! The engine owns exactly one [`crate::tracker::RequestTracker`] and one
//! arena of in-flight resolved requests, both touched only from the
//! dispatcher's own worker (or, under a single-threaded host, only from
//! whichever thread calls [`Dispatcher::wake`]) — the `Mutex` around
//! [`EngineState`] exists for that single-owner discipline, not for
//! fine-grained concurrency.

pub mod batch;
pub mod decode_stage;
pub mod events;
pub mod request;
pub mod settings;

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use log::warn;
use rsa::RsaPublicKey;

pub use batch::{Batch, BatchCompletionEvent};
use batch::PendingRead;
pub use events::{Event, MountedContainerInfo, SignatureErrorInfo};
pub use request::{ReadOptions, Request, RequestResult, RequestShared, RequestStatus};
pub use settings::DispatcherSettings;

use crate::backend::{BackendCompletion, BackendJob, IoBackend};
use crate::chunk_id::ChunkId;
use crate::codec::cipher::{self, CipherKey};
use crate::container::{ContainerReader, MappedRegion, MountList, OpenMappedOptions};
use crate::dispatcher::decode_stage::{DecodeJob, DecodeOutcome, DecodeStage};
use crate::error::{ErrorCode, Result};
use crate::pool::{BlockCache, BufferPool};
use crate::queue::Priority;
use crate::tracker::{
    CompressedBlock, CompressedBlockId, RawBlock, RawBlockId, RequestBuffer, RequestTracker,
    ResolvedRequest, ResolvedRequestId,
};
use crate::utilities::arena::Arena;

struct InFlightRequest {
    resolved: ResolvedRequest,
    shared: Arc<RequestShared>,
}

struct EngineState {
    tracker: RequestTracker,
    resolved: Arena<InFlightRequest>,
}

/// The engine's handle to one mounted partition file, kept independent of
/// `MountList` so the dispatcher thread never needs the mount list's lock on
/// the hot completion path.
struct PartitionHandle {
    file: Arc<File>,
    file_size: u64,
}

pub struct Dispatcher {
    mounts: Arc<MountList>,
    settings: DispatcherSettings,
    pool: Arc<BufferPool>,
    cache: Arc<BlockCache>,
    backend: Arc<IoBackend>,
    decode_stage: Arc<DecodeStage>,
    signing_public_key: Option<RsaPublicKey>,

    file_table: Mutex<HashMap<u32, PartitionHandle>>,
    state: Mutex<EngineState>,

    batch_tx: Sender<Vec<PendingRead>>,
    batch_rx: Receiver<Vec<PendingRead>>,
    raw_completions_rx: Receiver<BackendCompletion>,
    decode_outcomes_rx: Receiver<DecodeOutcome>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    stop: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,

    pub on_container_mounted: Event<MountedContainerInfo>,
    pub on_signature_error: Event<SignatureErrorInfo>,
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> Arc<Self> {
        Self::with_signing_key(settings, None)
    }

    pub fn with_signing_key(settings: DispatcherSettings, signing_public_key: Option<RsaPublicKey>) -> Arc<Self> {
        let pool = Arc::new(BufferPool::new(settings.buffer_pool_capacity(), settings.read_buffer_size));
        let cache = Arc::new(BlockCache::new(settings.block_cache_capacity));

        let (raw_completions_tx, raw_completions_rx) = unbounded();
        let backend = IoBackend::new(pool.clone(), cache.clone(), raw_completions_tx);

        let (decode_outcomes_tx, decode_outcomes_rx) = unbounded();
        let decode_workers = if settings.multithreaded { settings.decode_workers } else { 0 };
        let decode_stage = DecodeStage::new(decode_workers, decode_outcomes_tx);

        if settings.multithreaded {
            backend.spawn_workers(settings.io_workers.max(1));
        }

        let (batch_tx, batch_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let dispatcher = Arc::new(Dispatcher {
            mounts: Arc::new(MountList::new()),
            settings,
            pool,
            cache,
            backend,
            decode_stage,
            signing_public_key,
            file_table: Mutex::new(HashMap::new()),
            state: Mutex::new(EngineState {
                tracker: RequestTracker::new(),
                resolved: Arena::new(),
            }),
            batch_tx,
            batch_rx,
            raw_completions_rx,
            decode_outcomes_rx,
            stop_tx,
            stop_rx,
            stop: AtomicBool::new(false),
            thread: Mutex::new(None),
            on_container_mounted: Event::new(),
            on_signature_error: Event::new(),
        });

        if dispatcher.settings.multithreaded {
            let worker = dispatcher.clone();
            let handle = std::thread::spawn(move || worker.run_loop());
            *dispatcher.thread.lock().unwrap() = Some(handle);
        }

        dispatcher
    }

    // ---- mounting -------------------------------------------------------

    pub fn mount(&self, path_prefix: &Path, order: i32, key_id: Option<[u8; 16]>, key: Option<CipherKey>) -> Result<u64> {
        let container_id = self.mounts.mount(path_prefix, order, key_id, key, self.signing_public_key.as_ref())?;

        let mut table = self.file_table.lock().unwrap();
        let info = self.mounts.with_readers(|readers| {
            readers.iter().find(|r| r.container_id() == container_id).map(|reader| {
                for i in 0..reader.partition_count() {
                    if let (Some(file_index), Some(file), Some(file_size)) =
                        (reader.partition_file_index(i), reader.partition_file(i), reader.partition_file_size(i))
                    {
                        table.insert(file_index, PartitionHandle { file, file_size });
                    }
                }
                MountedContainerInfo {
                    container_id,
                    short_name: reader.short_name().to_string(),
                }
            })
        });
        drop(table);

        if let Some(info) = info {
            self.on_container_mounted.fire(&info);
        }
        Ok(container_id)
    }

    pub fn unmount(&self, container_id: u64) -> bool {
        self.mounts.unmount(container_id)
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.mount_count()
    }

    pub fn does_chunk_exist(&self, id: ChunkId) -> bool {
        self.mounts.does_chunk_exist(id)
    }

    pub fn get_size(&self, id: ChunkId) -> Result<u64> {
        self.mounts.get_size(id)
    }

    pub fn open_mapped(&self, id: ChunkId, options: OpenMappedOptions) -> Result<MappedRegion> {
        self.mounts
            .resolve_with(id, |reader: &ContainerReader, _ol| reader.open_mapped(id, options))
            .unwrap_or(Err(ErrorCode::NotFound { chunk_id: id }))
    }

    // ---- issuing reads ----------------------------------------------------

    /// Hands a batch's queued reads to the dispatcher. Returns immediately;
    /// each `Request` completes asynchronously.
    pub fn issue_batch(&self, batch: Batch) {
        if batch.reads.is_empty() {
            return;
        }
        for read in &batch.reads {
            read.shared.set_status(RequestStatus::Waiting);
        }
        let _ = self.batch_tx.send(batch.reads);
        if !self.settings.multithreaded {
            self.wake();
        }
    }

    /// Drives the pipeline inline until nothing is pending. Only meaningful
    /// (and only necessary) under a single-threaded host configuration; a
    /// no-op background thread already does this continuously otherwise.
    pub fn wake(&self) {
        loop {
            let mut did_work = false;
            did_work |= self.drain_batches();
            did_work |= self.drain_raw_completions();
            did_work |= self.drain_decode_outcomes();
            self.scan_cancel_reprioritize();

            if !did_work {
                if self.settings.multithreaded || !self.backend.pump_one(false) {
                    break;
                }
                did_work = true;
            }
            let _ = did_work;
        }
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.backend.shutdown();
        self.decode_stage.shutdown();
    }

    // ---- background loop ---------------------------------------------------

    fn run_loop(self: Arc<Self>) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }

            let mut select = Select::new();
            let batch_idx = select.recv(&self.batch_rx);
            let raw_idx = select.recv(&self.raw_completions_rx);
            let decode_idx = select.recv(&self.decode_outcomes_rx);
            let stop_idx = select.recv(&self.stop_rx);
            let op = select.select();

            match op.index() {
                i if i == batch_idx => {
                    if let Ok(reads) = op.recv(&self.batch_rx) {
                        self.resolve_batch(reads);
                    }
                }
                i if i == raw_idx => {
                    if let Ok(completion) = op.recv(&self.raw_completions_rx) {
                        self.handle_raw_completion(completion);
                    }
                }
                i if i == decode_idx => {
                    if let Ok(outcome) = op.recv(&self.decode_outcomes_rx) {
                        self.handle_decode_outcome(outcome);
                    }
                }
                i if i == stop_idx => {
                    let _ = op.recv(&self.stop_rx);
                    return;
                }
                _ => unreachable!("Select only registered the four receivers above"),
            }

            self.drain_batches();
            self.drain_raw_completions();
            self.drain_decode_outcomes();
            self.scan_cancel_reprioritize();
        }
    }

    fn drain_batches(&self) -> bool {
        let mut did_work = false;
        while let Ok(reads) = self.batch_rx.try_recv() {
            did_work = true;
            self.resolve_batch(reads);
        }
        did_work
    }

    fn drain_raw_completions(&self) -> bool {
        let mut did_work = false;
        while let Ok(completion) = self.raw_completions_rx.try_recv() {
            did_work = true;
            self.handle_raw_completion(completion);
        }
        did_work
    }

    fn drain_decode_outcomes(&self) -> bool {
        let mut did_work = false;
        while let Ok(outcome) = self.decode_outcomes_rx.try_recv() {
            did_work = true;
            self.handle_decode_outcome(outcome);
        }
        did_work
    }

    // ---- resolution (process_incoming) -------------------------------------

    fn resolve_batch(&self, reads: Vec<PendingRead>) {
        let mut state = self.state.lock().unwrap();
        for read in reads {
            self.resolve_one(&mut state, read);
        }
    }

    fn resolve_one(&self, state: &mut EngineState, read: PendingRead) {
        if let Some(callback) = read.callback {
            read.shared.set_callback(callback);
        }
        read.shared.set_status(RequestStatus::Resolving);

        if read.shared.is_cancel_requested() {
            read.shared.complete(Err(ErrorCode::Cancelled));
            return;
        }
        if !read.chunk_id.is_valid() {
            read.shared.complete(Err(ErrorCode::InvalidParameter {
                reason: "chunk id is all-zero".to_string(),
            }));
            return;
        }

        let chunk_id = read.chunk_id;
        let options = read.options;
        let priority = read.priority;
        let shared = read.shared;

        let outcome = self
            .mounts
            .resolve_with(chunk_id, |reader, ol| self.build_request(state, reader, ol, &options, priority, shared.clone()));

        if outcome.is_none() {
            shared.complete(Err(ErrorCode::NotFound { chunk_id }));
        }
    }

    /// Fans a resolved chunk range out into raw/compressed-block work,
    /// registers the request in the resolved arena, and submits any newly
    /// discovered raw blocks to the backend. Completes `shared` directly for
    /// the zero-size and out-of-range cases.
    fn build_request(
        &self,
        state: &mut EngineState,
        reader: &ContainerReader,
        ol: crate::format::ChunkOffsetLength,
        options: &ReadOptions,
        priority: Priority,
        shared: Arc<RequestShared>,
    ) {
        let start = options.offset.min(ol.length);
        let size = if options.size == u64::MAX {
            ol.length - start
        } else {
            options.size.min(ol.length.saturating_sub(start))
        };
        if start + size > ol.length {
            shared.complete(Err(ErrorCode::InvalidParameter {
                reason: "offset + size exceeds chunk length".to_string(),
            }));
            return;
        }

        let resolved = match options.target_va {
            Some(ptr) => unsafe { ResolvedRequest::with_external_buffer(0, ol.offset + start, size, priority, ptr, size as usize) },
            None => ResolvedRequest::new(0, ol.offset + start, size, priority),
        };

        if size == 0 {
            let result = match resolved.buffer {
                RequestBuffer::Owned(v) => RequestResult::Buffer(v),
                RequestBuffer::External { len, .. } => RequestResult::WrittenToTarget { len },
            };
            shared.complete(Ok(result));
            return;
        }

        let absolute_offset = ol.offset + start;
        let block_size = reader.block_size() as u64;
        let begin_cb = (absolute_offset / block_size) as usize;
        let end_cb = ((absolute_offset + size - 1) / block_size) as usize;

        let resolved_id = ResolvedRequestId(state.resolved.insert(InFlightRequest { resolved, shared }));

        let mut backend_jobs: Vec<BackendJob> = Vec::new();
        let mut raised: Vec<RawBlockId> = Vec::new();

        for cb_index in begin_cb..=end_cb {
            let Some(entry) = reader.toc().compression_blocks.get(cb_index).copied() else {
                continue;
            };
            let (partition_index, partition_rel_offset) = reader.locate_encoded_offset(entry.offset);
            let Some(partition_file_index) = reader.partition_file_index(partition_index) else {
                continue;
            };
            let ckey = (partition_file_index, cb_index as u32);
            let method = reader.toc().method_names.method_for_index(entry.method_index);
            let raw_size = cipher::align_up(entry.compressed_size as usize, cipher::CIPHER_BLOCK_SIZE) as u32;

            let (compressed_id, is_new) = state.tracker.find_or_add_compressed(ckey, || {
                let mut block = CompressedBlock::new(ckey, entry.uncompressed_size, entry.compressed_size, method.clone(), raw_size, partition_rel_offset);
                block.container_short_name = reader.short_name().to_string();
                block.toc_block_index = cb_index as u32;
                if reader.requires_encryption_key() {
                    block.decrypt_key = reader.encryption_key().copied();
                }
                if reader.is_signed() {
                    block.expected_signature = reader.expected_block_hash(cb_index);
                }
                block
            });

            if is_new {
                self.plan_raw_blocks(
                    state,
                    reader,
                    partition_index,
                    partition_file_index,
                    partition_rel_offset,
                    raw_size,
                    compressed_id,
                    priority,
                    &mut backend_jobs,
                );
            }

            let block_start_abs = cb_index as u64 * block_size;
            let req_start = absolute_offset.max(block_start_abs);
            let req_end = (absolute_offset + size).min(block_start_abs + entry.uncompressed_size as u64);
            if req_end <= req_start {
                continue;
            }
            let len = (req_end - req_start) as u32;
            let src_offset_in_block = (req_start - block_start_abs) as u32;
            let dst_offset = req_start - absolute_offset;

            state.tracker.compressed_mut(compressed_id).scatters.push(crate::tracker::ScatterDescriptor {
                resolved: resolved_id,
                dst_offset,
                src_offset_in_block,
                size: len,
            });

            let (linked_raw_ids, just_raised) = state.tracker.add_read_requests_to_resolved(compressed_id, resolved_id, priority);
            raised.extend(just_raised);
            if let Some(in_flight) = state.resolved.try_get_mut(resolved_id.0) {
                in_flight.resolved.raw_block_refs.extend(linked_raw_ids);
                in_flight.resolved.compressed_block_refs.push(compressed_id);
                in_flight.resolved.unfinished_reads += 1;
            }
        }

        self.backend.submit(backend_jobs);

        if !raised.is_empty() {
            let updates: Vec<(crate::tracker::RawBlockKey, Priority)> = raised
                .iter()
                .map(|id| {
                    let raw = state.tracker.raw(*id);
                    (raw.key, raw.priority)
                })
                .collect();
            self.backend.reprioritize(&updates);
        }

        // A resolved request whose chunk range fell entirely within known
        // compression-block slots but produced no scatters (shouldn't
        // happen for a valid TOC, but a corrupt one could) would otherwise
        // hang forever waiting for reads that were never issued.
        if let Some(in_flight) = state.resolved.try_get(resolved_id.0) {
            if in_flight.resolved.unfinished_reads == 0 {
                self.complete_request(state, resolved_id);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_raw_blocks(
        &self,
        state: &mut EngineState,
        reader: &ContainerReader,
        partition_index: usize,
        partition_file_index: u32,
        partition_rel_offset: u64,
        raw_size: u32,
        compressed_id: CompressedBlockId,
        priority: Priority,
        backend_jobs: &mut Vec<BackendJob>,
    ) {
        let read_buffer_size = self.settings.read_buffer_size as u64;
        let partition_size = reader.partition_file_size(partition_index).unwrap_or(u64::MAX);

        let begin_rb = partition_rel_offset / read_buffer_size;
        let end_rb = (partition_rel_offset + raw_size as u64 - 1) / read_buffer_size;

        let mut raw_ids = Vec::new();
        for rb in begin_rb..=end_rb {
            let rkey = (partition_file_index, rb as u32);
            let rb_offset = rb * read_buffer_size;
            let rb_size = (partition_size.min(rb_offset + read_buffer_size).saturating_sub(rb_offset)) as u32;

            let overlap_start = partition_rel_offset.max(rb_offset);
            let overlap_end = (partition_rel_offset + raw_size as u64).min(rb_offset + rb_size as u64);
            let overlap_len = overlap_end.saturating_sub(overlap_start);
            let cacheable = overlap_len < rb_size as u64;

            let (raw_id, raw_is_new) = state.tracker.find_or_add_raw(rkey, || {
                let mut block = RawBlock::new(rkey, rb_offset, rb_size, priority);
                block.cacheable = cacheable;
                block
            });

            if raw_is_new {
                if let Some(handle) = self.file_table.lock().unwrap().get(&partition_file_index) {
                    backend_jobs.push(BackendJob {
                        key: rkey,
                        file: handle.file.clone(),
                        file_offset: rb_offset,
                        size: rb_size,
                        priority,
                        cacheable,
                    });
                }
            }

            let raw = state.tracker.raw_mut(raw_id);
            raw.compressed_blocks.push(compressed_id);
            raw.buffer_refcount += 1;
            raw_ids.push(raw_id);
        }

        let cb = state.tracker.compressed_mut(compressed_id);
        cb.raw_blocks = raw_ids;
        cb.unfinished_raw_blocks = cb.raw_blocks.len() as u32;
    }

    // ---- completion (process_completed) ------------------------------------

    fn handle_raw_completion(&self, completion: BackendCompletion) {
        let mut state = self.state.lock().unwrap();
        let Some(raw_id) = state.tracker.raw_id_for_key(completion.key) else {
            // Stale completion for a block already released (e.g. every
            // dependent request was cancelled before the read finished).
            return;
        };

        if completion.failed {
            state.tracker.raw_mut(raw_id).state.failed = true;
        }
        state.tracker.raw_mut(raw_id).buffer = completion.buffer;

        let compressed_ids = state.tracker.raw(raw_id).compressed_blocks.clone();
        let (raw_offset, raw_size, failed) = {
            let raw = state.tracker.raw(raw_id);
            (raw.file_offset, raw.size, raw.state.failed)
        };
        let raw_bytes = state
            .tracker
            .raw(raw_id)
            .buffer
            .as_ref()
            .map(|b| b.data[..raw_size as usize].to_vec());

        for cid in &compressed_ids {
            let (c_raw_offset, c_raw_size) = {
                let c = state.tracker.compressed(*cid);
                (c.raw_offset, c.raw_size)
            };
            if state.tracker.compressed(*cid).scratch.is_none() {
                state.tracker.compressed_mut(*cid).scratch = Some(vec![0u8; c_raw_size as usize]);
            }

            if failed {
                state.tracker.compressed_mut(*cid).failed = true;
            } else if let Some(bytes) = &raw_bytes {
                let overlap_start = raw_offset.max(c_raw_offset);
                let overlap_end = (raw_offset + raw_size as u64).min(c_raw_offset + c_raw_size as u64);
                if overlap_start < overlap_end {
                    let len = (overlap_end - overlap_start) as usize;
                    let src_off = (overlap_start - raw_offset) as usize;
                    let dst_off = (overlap_start - c_raw_offset) as usize;
                    let cb = state.tracker.compressed_mut(*cid);
                    cb.scratch.as_mut().unwrap()[dst_off..dst_off + len].copy_from_slice(&bytes[src_off..src_off + len]);
                }
            }

            let cb = state.tracker.compressed_mut(*cid);
            cb.unfinished_raw_blocks = cb.unfinished_raw_blocks.saturating_sub(1);
            if cb.unfinished_raw_blocks == 0 {
                if cb.failed || cb.cancelled {
                    self.finalize_compressed(&mut state, *cid, None);
                } else {
                    self.submit_decode(&mut state, *cid);
                }
            }

            // One `buffer_refcount` increment happened per compressed-block
            // consumer in `plan_raw_blocks`; mirror that here by decrementing
            // once per consumer processed, not once per completion event —
            // a raw block shared by several compressed blocks (the common
            // case once `read_buffer_size` exceeds the container's
            // compression block size) would otherwise never reach zero and
            // its pool buffer would never be freed.
            let raw = state.tracker.raw_mut(raw_id);
            raw.buffer_refcount = raw.buffer_refcount.saturating_sub(1);
            if raw.buffer_refcount == 0 {
                if let Some(buf) = raw.buffer.take() {
                    self.pool.free(buf);
                }
            }
        }
    }

    fn submit_decode(&self, state: &mut EngineState, cid: CompressedBlockId) {
        let cb = state.tracker.compressed(cid);
        let trivial = matches!(cb.method, crate::codec::compression::CompressionMethod::Stored)
            && cb.decrypt_key.is_none()
            && cb.expected_signature.is_none();

        let job = DecodeJob {
            id: cid,
            raw_bytes: cb.scratch.clone().unwrap_or_default(),
            compressed_size: cb.compressed_size,
            uncompressed_size: cb.uncompressed_size,
            method: cb.method.clone(),
            decrypt_key: cb.decrypt_key,
            expected_signature: cb.expected_signature,
        };

        if trivial || !self.settings.multithreaded {
            let outcome = decode_stage::run(job);
            self.finalize_compressed(state, cid, Some(outcome));
        } else {
            self.decode_stage.submit(job);
        }
    }

    fn handle_decode_outcome(&self, outcome: DecodeOutcome) {
        let mut state = self.state.lock().unwrap();
        self.finalize_compressed(&mut state, outcome.id, Some(outcome));
    }

    fn finalize_compressed(&self, state: &mut EngineState, cid: CompressedBlockId, outcome: Option<DecodeOutcome>) {
        let mut decoded: Option<Vec<u8>> = None;
        let mut signature_error: Option<SignatureErrorInfo> = None;

        if let Some(outcome) = outcome {
            match outcome.result {
                Ok(bytes) => decoded = Some(bytes),
                Err(crate::dispatcher::decode_stage::DecodeFailure::SignatureMismatch { .. }) => {
                    let cb = state.tracker.compressed_mut(cid);
                    cb.failed = true;
                    signature_error = Some(SignatureErrorInfo {
                        container_short_name: cb.container_short_name.clone(),
                        block_index: cb.toc_block_index,
                        chunk_id: None,
                    });
                }
                Err(crate::dispatcher::decode_stage::DecodeFailure::DecompressionFailed(reason)) => {
                    warn!("decompression failed for block {cid:?}: {reason}");
                    state.tracker.compressed_mut(cid).failed = true;
                }
            }
        }

        if let Some(info) = &signature_error {
            self.on_signature_error.fire(info);
        }

        let cb = state.tracker.compressed(cid);
        let failed = cb.failed;
        let cancelled = cb.cancelled;
        let scatters = cb.scatters.clone();

        for scatter in &scatters {
            let live_and_cancelled = match state.resolved.try_get(scatter.resolved.0) {
                Some(entry) => entry.shared.is_cancel_requested(),
                None => true,
            };

            if failed {
                if let Some(entry) = state.resolved.try_get_mut(scatter.resolved.0) {
                    entry.resolved.failed = true;
                }
            } else if !cancelled && !live_and_cancelled {
                if let Some(bytes) = &decoded {
                    let end = scatter.src_offset_in_block as usize + scatter.size as usize;
                    if end <= bytes.len() {
                        let slice = &bytes[scatter.src_offset_in_block as usize..end];
                        if let Some(entry) = state.resolved.try_get_mut(scatter.resolved.0) {
                            unsafe {
                                entry.resolved.buffer.write_at(scatter.dst_offset, slice);
                            }
                        }
                    }
                }
            }

            self.decrement_unfinished_reads(state, scatter.resolved);
        }
    }

    fn decrement_unfinished_reads(&self, state: &mut EngineState, resolved_id: ResolvedRequestId) {
        let Some(entry) = state.resolved.try_get_mut(resolved_id.0) else {
            return;
        };
        entry.resolved.unfinished_reads = entry.resolved.unfinished_reads.saturating_sub(1);
        if entry.resolved.unfinished_reads == 0 {
            self.complete_request(state, resolved_id);
        }
    }

    fn complete_request(&self, state: &mut EngineState, resolved_id: ResolvedRequestId) {
        let Some(_) = state.resolved.try_get(resolved_id.0) else {
            return;
        };
        let entry = state.resolved.remove(resolved_id.0);
        state
            .tracker
            .release_references(&entry.resolved.raw_block_refs, &entry.resolved.compressed_block_refs);

        let result = if entry.shared.is_cancel_requested() {
            Err(ErrorCode::Cancelled)
        } else if entry.resolved.failed {
            Err(ErrorCode::ReadError)
        } else {
            match entry.resolved.buffer {
                RequestBuffer::Owned(v) => Ok(RequestResult::Buffer(v)),
                RequestBuffer::External { len, .. } => Ok(RequestResult::WrittenToTarget { len }),
            }
        };
        entry.shared.complete(result);
    }

    // ---- cancellation / reprioritization -----------------------------------

    /// Scans live resolved requests for a cancel or priority-change request
    /// set by a client thread. This substitutes for a push-based list of
    /// cancel/reprioritize notices: since only a resolved request (not a
    /// not-yet-resolved `PendingRead`) can be targeted this way, and the
    /// resolved arena only ever holds on the order of the host's in-flight
    /// request count, a scan is cheap and avoids a second cross-thread
    /// channel per request.
    fn scan_cancel_reprioritize(&self) {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<u32> = state.resolved.iter().map(|(id, _)| id).collect();
        for id in ids {
            let Some(entry) = state.resolved.try_get(id) else { continue };
            let cancel_requested = entry.shared.is_cancel_requested();
            let requested_priority = entry.shared.priority();
            let current_priority = entry.resolved.priority;

            if cancel_requested {
                self.cancel_resolved(&mut state, ResolvedRequestId(id));
            } else if requested_priority != current_priority {
                self.reprioritize_resolved(&mut state, ResolvedRequestId(id), requested_priority);
            }
        }
    }

    fn cancel_resolved(&self, state: &mut EngineState, resolved_id: ResolvedRequestId) {
        let Some(entry) = state.resolved.try_get(resolved_id.0) else {
            return;
        };
        let raw_refs = entry.resolved.raw_block_refs.clone();
        if entry.resolved.unfinished_reads == 0 {
            self.complete_request(state, resolved_id);
            return;
        }

        let EngineState { tracker, resolved } = state;
        let outcome = tracker.cancel(&raw_refs, |rid| resolved.try_get(rid.0).map(|e| e.shared.is_cancel_requested()).unwrap_or(true));

        if !outcome.priority_raised.is_empty() {
            let updates: Vec<(crate::tracker::RawBlockKey, Priority)> = outcome
                .priority_raised
                .iter()
                .map(|id| {
                    let raw = tracker.raw(*id);
                    (raw.key, raw.priority)
                })
                .collect();
            self.backend.reprioritize(&updates);
        }
    }

    fn reprioritize_resolved(&self, state: &mut EngineState, resolved_id: ResolvedRequestId, new_priority: Priority) {
        let raw_refs = {
            let Some(entry) = state.resolved.try_get_mut(resolved_id.0) else {
                return;
            };
            entry.resolved.priority = new_priority;
            entry.resolved.raw_block_refs.clone()
        };

        let raised = state.tracker.reprioritize(&raw_refs, new_priority);
        if !raised.is_empty() {
            let updates: Vec<(crate::tracker::RawBlockKey, Priority)> = raised
                .iter()
                .map(|id| {
                    let raw = state.tracker.raw(*id);
                    (raw.key, raw.priority)
                })
                .collect();
            self.backend.reprioritize(&updates);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
